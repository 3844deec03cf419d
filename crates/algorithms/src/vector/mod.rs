//! Vector helpers for basin geometry
//!
//! - Boundary extraction: labeled raster regions to polygons
//! - Winding: clockwise-positive signed area and ring normalization
//! - Abutting union: single-part polygon merging

mod boundary;
mod winding;

pub use boundary::region_polygons;
pub use winding::{ensure_clockwise, signed_area_cw, union_abutting};
