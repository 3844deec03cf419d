//! # Riverine Core
//!
//! Core types and I/O for the riverine watershed delineation toolkit.
//!
//! This crate provides:
//! - `Raster<T>`: Generic raster grid type backed by `ndarray`
//! - `GeoTransform`: Affine transformation for georeferencing
//! - `Feature` / `FeatureCollection`: vector features with a typed field schema
//! - Error taxonomy shared by all delineation stages
//! - GeoTIFF and GeoJSON I/O

pub mod error;
pub mod io;
pub mod raster;
pub mod vector;

pub use error::{Error, Result};
pub use raster::{GeoTransform, Raster, RasterElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::raster::{GeoTransform, Raster, RasterElement};
    pub use crate::vector::{AttributeValue, Feature, FeatureCollection, FieldDef, FieldKind};
    pub use crate::Algorithm;
}

/// Core trait for all algorithms in riverine.
///
/// Algorithms are pure functions that transform input data according to parameters.
pub trait Algorithm {
    /// Input type for the algorithm
    type Input;
    /// Output type for the algorithm
    type Output;
    /// Parameters controlling algorithm behavior
    type Params: Default;
    /// Error type for algorithm execution
    type Error: std::error::Error;

    /// Returns the algorithm name
    fn name(&self) -> &'static str;

    /// Returns a description of what the algorithm does
    fn description(&self) -> &'static str;

    /// Execute the algorithm
    fn execute(
        &self,
        input: Self::Input,
        params: Self::Params,
    ) -> std::result::Result<Self::Output, Self::Error>;

    /// Execute with default parameters
    fn execute_default(&self, input: Self::Input) -> std::result::Result<Self::Output, Self::Error> {
        self.execute(input, Self::Params::default())
    }
}
