//! Hydrology: watershed delineation from D8 flow grids
//!
//! The delineation pipeline runs in stages, each consuming the previous
//! stage's output:
//!
//! 1. [`build_network`] - partition the channel into a link tree
//! 2. [`build_profile`] - trace per-link lengths and elevations
//! 3. [`delineate_subbasins`] - label one subbasin per link and emit reaches
//! 4. [`build_drainage_tree`] / [`merge_basins_by_drainage`] - merge basin
//!    polygons along drainage, honoring outlet/inlet/reservoir points

pub mod d8;
pub mod drainage;
pub mod network;
pub mod outlets;
pub mod profile;
pub mod subbasins;

pub use drainage::{
    build_drainage_tree, merge_basins_by_drainage, merge_drainage_tree, upstream_of_inlet,
    DrainageTree,
};
pub use network::{
    build_network, BuildNetwork, CoordinateNode, Link, NetworkParams, StreamNetwork,
};
pub use outlets::{DsNodeKind, OutletLayer};
pub use profile::{build_profile, straight_length};
pub use subbasins::{
    delineate_subbasins, DelineateSubbasins, Numbering, Subbasin, SubbasinParams, SubbasinResult,
};
