//! Affine geotransformation for rasters

use serde::{Deserialize, Serialize};

/// Affine transformation coefficients for georeferencing rasters.
///
/// Converts between pixel coordinates (col, row) and geographic coordinates (x, y):
/// ```text
/// x = origin_x + col * pixel_width
/// y = origin_y + row * pixel_height
/// ```
///
/// For north-up images `pixel_height` is negative. Rotated transforms are not
/// supported; watershed delineation operates on axis-aligned grids.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner
    pub origin_y: f64,
    /// Pixel width (cell size in X direction)
    pub pixel_width: f64,
    /// Pixel height (cell size in Y direction, usually negative)
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Create a new GeoTransform (north-up image)
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
        }
    }

    /// Convert pixel coordinates to geographic coordinates of the pixel center
    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        let x = self.origin_x + (col as f64 + 0.5) * self.pixel_width;
        let y = self.origin_y + (row as f64 + 0.5) * self.pixel_height;
        (x, y)
    }

    /// Convert pixel coordinates to geographic coordinates (top-left corner)
    pub fn pixel_to_geo_corner(&self, col: usize, row: usize) -> (f64, f64) {
        let x = self.origin_x + col as f64 * self.pixel_width;
        let y = self.origin_y + row as f64 * self.pixel_height;
        (x, y)
    }

    /// Convert geographic coordinates to fractional pixel coordinates (col, row)
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let col = (x - self.origin_x) / self.pixel_width;
        let row = (y - self.origin_y) / self.pixel_height;
        (col, row)
    }

    /// Snap geographic coordinates to the containing cell, if inside the grid.
    ///
    /// Used to place outlet/inlet points onto flow-grid cells.
    pub fn geo_to_cell(&self, x: f64, y: f64, rows: usize, cols: usize) -> Option<(usize, usize)> {
        let (col, row) = self.geo_to_pixel(x, y);
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let (col, row) = (col.floor() as usize, row.floor() as usize);
        if row < rows && col < cols {
            Some((row, col))
        } else {
            None
        }
    }

    /// Cell size in the X direction
    pub fn cell_width(&self) -> f64 {
        self.pixel_width.abs()
    }

    /// Cell size in the Y direction
    pub fn cell_height(&self) -> f64 {
        self.pixel_height.abs()
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pixel_to_geo_roundtrip() {
        let gt = GeoTransform::new(100.0, 200.0, 10.0, -10.0);

        let (x, y) = gt.pixel_to_geo(5, 10);
        let (col, row) = gt.geo_to_pixel(x, y);

        assert_relative_eq!(col, 5.5, epsilon = 1e-10);
        assert_relative_eq!(row, 10.5, epsilon = 1e-10);
    }

    #[test]
    fn test_geo_to_cell_snapping() {
        let gt = GeoTransform::new(0.0, 10.0, 1.0, -1.0);

        // Center of cell (row 2, col 3)
        assert_eq!(gt.geo_to_cell(3.5, 7.5, 10, 10), Some((2, 3)));
        // Outside the grid
        assert_eq!(gt.geo_to_cell(-1.0, 5.0, 10, 10), None);
        assert_eq!(gt.geo_to_cell(5.0, 10.5, 10, 10), None);
    }
}
