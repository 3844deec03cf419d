//! Error types for riverine

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for riverine operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Required input not found: {0}")]
    InputMissing(PathBuf),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch {
        er: usize,
        ec: usize,
        ar: usize,
        ac: usize,
    },

    #[error("Too many channel start pixels: found {found}, budget {budget} (threshold too low?)")]
    CapacityExceeded { found: usize, budget: usize },

    #[error("Subbasin {basin} has a multi-part polygon where a single part is required")]
    MultiPartPolygon { basin: i32 },

    #[error("Attribute field not found: {field}")]
    FieldNotFound { field: String },

    #[error("Inconsistent flow topology: {0}")]
    InvalidTopology(String),

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for riverine operations
pub type Result<T> = std::result::Result<T, Error>;
