//! D8 flow-direction helpers shared by the delineation stages
//!
//! Direction encoding (compass-ordinal, starting east, counter-clockwise):
//! ```text
//!   4  3  2
//!   5  .  1
//!   6  7  8
//! ```
//! 0 = pit/undefined (no outflow), 1-8 = drains to that neighbor.

/// D8 neighbor offsets: (row_offset, col_offset), indexed to match the
/// direction encoding (1=E, 2=NE, ..., 8=SE)
pub const D8_OFFSETS: [(isize, isize); 8] = [
    (0, 1),   // 1: E
    (-1, 1),  // 2: NE
    (-1, 0),  // 3: N
    (-1, -1), // 4: NW
    (0, -1),  // 5: W
    (1, -1),  // 6: SW
    (1, 0),   // 7: S
    (1, 1),   // 8: SE
];

/// Opposite direction code for each D8 direction (index = code - 1)
pub const D8_OPPOSITE: [u8; 8] = [5, 6, 7, 8, 1, 2, 3, 4];

/// Whether a direction code is a valid outflow direction
pub fn is_flow_dir(dir: u8) -> bool {
    (1..=8).contains(&dir)
}

/// The cell downstream of (row, col) along `dir`, as signed coordinates.
///
/// Returns `None` for pit/undefined codes; callers decide what off-grid
/// coordinates mean.
pub fn downstream(row: usize, col: usize, dir: u8) -> Option<(isize, isize)> {
    if !is_flow_dir(dir) {
        return None;
    }
    let (dr, dc) = D8_OFFSETS[(dir - 1) as usize];
    Some((row as isize + dr, col as isize + dc))
}

/// The opposite-direction test: the neighbor sitting at `D8_OFFSETS[k]` from
/// a center cell drains into the center iff its own direction code is the
/// opposite of code `k + 1`.
pub fn drains_into_center(neighbor_dir: u8, k: usize) -> bool {
    is_flow_dir(neighbor_dir) && neighbor_dir == D8_OPPOSITE[k]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposite_directions() {
        assert_eq!(D8_OPPOSITE[0], 5); // E -> W
        assert_eq!(D8_OPPOSITE[2], 7); // N -> S
        assert_eq!(D8_OPPOSITE[4], 1); // W -> E
        assert_eq!(D8_OPPOSITE[6], 3); // S -> N
        for dir in 1..=8u8 {
            let opp = D8_OPPOSITE[(dir - 1) as usize];
            assert_eq!(D8_OPPOSITE[(opp - 1) as usize], dir);
        }
    }

    #[test]
    fn test_downstream_offsets() {
        assert_eq!(downstream(2, 2, 1), Some((2, 3))); // E
        assert_eq!(downstream(2, 2, 3), Some((1, 2))); // N
        assert_eq!(downstream(2, 2, 7), Some((3, 2))); // S
        assert_eq!(downstream(0, 0, 4), Some((-1, -1))); // NW off-grid
        assert_eq!(downstream(2, 2, 0), None);
        assert_eq!(downstream(2, 2, 9), None);
    }
}
