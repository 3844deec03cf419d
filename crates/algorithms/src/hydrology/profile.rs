//! Per-link coordinate/elevation profiles
//!
//! Retraces every link of a stream network and fills in the physical part
//! of the shared coordinate list: cumulative length from the link start and
//! elevation at each traced cell. The root link's records come first and
//! positional indexing is preserved; downstream consumers rely on it.

use crate::hydrology::network::StreamNetwork;
use riverine_core::raster::Raster;
use riverine_core::{Error, Result};

/// Enrich the network's coordinate records with cumulative length and
/// elevation, returning the traced length of every link (indexed like
/// `network.links`).
///
/// Step lengths come from the elevation grid's cell sizes; dx and dy may
/// differ, diagonal steps use the hypotenuse.
pub fn build_profile(network: &mut StreamNetwork, dem: &Raster<f64>) -> Result<Vec<f64>> {
    if dem.shape() != network.shape {
        return Err(Error::SizeMismatch {
            er: network.shape.0,
            ec: network.shape.1,
            ar: dem.rows(),
            ac: dem.cols(),
        });
    }

    let dx = dem.transform().cell_width();
    let dy = dem.transform().cell_height();
    let mut lengths = Vec::with_capacity(network.links.len());

    for link in &network.links {
        let mut cumulative = 0.0;
        let mut prev: Option<(usize, usize)> = None;

        for i in link.start_coord..=link.end_coord {
            let (row, col) = network.coords[i].cell;
            if let Some((pr, pc)) = prev {
                let ddx = (col as f64 - pc as f64) * dx;
                let ddy = (row as f64 - pr as f64) * dy;
                cumulative += (ddx * ddx + ddy * ddy).sqrt();
            }
            network.coords[i].length = cumulative;
            network.coords[i].elevation = dem.get(row, col)?;
            prev = Some((row, col));
        }

        lengths.push(cumulative);
    }

    Ok(lengths)
}

/// Straight-line distance between a link's first and last coordinates.
pub fn straight_length(network: &StreamNetwork, link_idx: usize) -> f64 {
    let link = &network.links[link_idx];
    let a = &network.coords[link.start_coord];
    let b = &network.coords[link.end_coord];
    let ddx = b.x - a.x;
    let ddy = b.y - a.y;
    (ddx * ddx + ddy * ddy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrology::network::{build_network, NetworkParams};
    use approx::assert_relative_eq;
    use riverine_core::GeoTransform;

    fn sloping_dem(rows: usize, cols: usize) -> Raster<f64> {
        let mut dem = Raster::new(rows, cols);
        dem.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
        for row in 0..rows {
            for col in 0..cols {
                dem.set(row, col, (rows - row) as f64 * 10.0).unwrap();
            }
        }
        dem
    }

    fn straight_channel() -> (Raster<u8>, Raster<f64>) {
        let mut dirs = vec![0u8; 25];
        let mut areas = vec![0.5f64; 25];
        for row in 0..5 {
            dirs[row * 5 + 2] = 7;
            areas[row * 5 + 2] = (row + 1) as f64;
        }
        let mut fd = Raster::from_vec(dirs, 5, 5).unwrap();
        fd.set_transform(GeoTransform::new(0.0, 5.0, 1.0, -1.0));
        let mut ar = Raster::from_vec(areas, 5, 5).unwrap();
        ar.set_transform(GeoTransform::new(0.0, 5.0, 1.0, -1.0));
        (fd, ar)
    }

    #[test]
    fn test_profile_cumulative_length() {
        let (fd, ar) = straight_channel();
        let mut net =
            build_network(&fd, &ar, NetworkParams { threshold: 1.0, max_starts: None }).unwrap();
        let dem = sloping_dem(5, 5);

        let lengths = build_profile(&mut net, &dem).unwrap();
        assert_eq!(lengths.len(), 1);
        assert_relative_eq!(lengths[0], 4.0);

        // Cumulative length increases one cell height per step
        for (i, coord) in net.coords.iter().enumerate() {
            assert_relative_eq!(coord.length, i as f64);
        }

        // Elevation drops 10 per row
        assert_relative_eq!(net.coords[0].elevation, 50.0);
        assert_relative_eq!(net.coords[4].elevation, 10.0);
    }

    #[test]
    fn test_profile_shape_mismatch() {
        let (fd, ar) = straight_channel();
        let mut net =
            build_network(&fd, &ar, NetworkParams { threshold: 1.0, max_starts: None }).unwrap();
        let dem = sloping_dem(4, 4);
        assert!(matches!(
            build_profile(&mut net, &dem),
            Err(Error::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_straight_length_matches_traced_for_straight_links() {
        let (fd, ar) = straight_channel();
        let mut net =
            build_network(&fd, &ar, NetworkParams { threshold: 1.0, max_starts: None }).unwrap();
        let dem = sloping_dem(5, 5);
        let lengths = build_profile(&mut net, &dem).unwrap();

        assert_relative_eq!(straight_length(&net, 0), lengths[0]);
    }
}
