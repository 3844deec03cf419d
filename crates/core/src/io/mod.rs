//! I/O for rasters (GeoTIFF) and vector features (GeoJSON)

mod geojson;
mod native;

pub use geojson::{read_geojson_points, write_geojson};
pub use native::{read_geotiff, write_geotiff};
