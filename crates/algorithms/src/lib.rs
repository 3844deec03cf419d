//! # Riverine Algorithms
//!
//! Watershed delineation from D8 flow grids:
//!
//! - **hydrology**: stream-network tree construction, link profiling,
//!   subbasin labeling, drainage-tree construction and basin merging
//! - **vector**: labeled-region boundary extraction, ring winding and
//!   abutting-polygon union helpers

pub mod hydrology;
pub mod vector;

pub(crate) mod maybe_rayon;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::hydrology::{
        build_drainage_tree, build_network, build_profile, delineate_subbasins,
        merge_basins_by_drainage, merge_drainage_tree, upstream_of_inlet, BuildNetwork,
        CoordinateNode, DelineateSubbasins, DrainageTree, DsNodeKind, Link, NetworkParams,
        Numbering, OutletLayer, StreamNetwork, Subbasin, SubbasinParams, SubbasinResult,
    };
    pub use crate::vector::{region_polygons, signed_area_cw, union_abutting};
    pub use riverine_core::prelude::*;
}
