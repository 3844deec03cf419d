//! Stream network tree construction
//!
//! Partitions the channel implied by a D8 flow grid and an accumulated-area
//! grid into **links**: contiguous runs of cells between a channel start
//! pixel (or junction) and the next junction or the grid edge. Links carry
//! magnitude (count of contributing start pixels), a Strahler-style order,
//! and up/downstream cross references; per-link cell coordinates land in a
//! shared list indexed by inclusive `[start_coord, end_coord]` ranges.
//!
//! Junctions are resolved deferred: a merged downstream link is only created
//! once the magnitudes of all links arriving at the junction cell sum to the
//! junction's own magnitude. Junctions whose sum never matches are surfaced
//! with a warning and their contributors are left as roots of partial trees.

use crate::hydrology::d8;
use ndarray::Array2;
use riverine_core::raster::Raster;
use riverine_core::{Error, Result};
use std::collections::{HashMap, VecDeque};
use tracing::warn;

/// Parameters for stream network construction
#[derive(Debug, Clone)]
pub struct NetworkParams {
    /// Accumulated-area threshold (in area-grid units). Cells at or above
    /// the threshold are channel candidates. Default: 1000.0
    pub threshold: f64,
    /// Budget for channel start pixels. Exceeding it aborts with
    /// `CapacityExceeded`, signalling a threshold/raster mismatch.
    pub max_starts: Option<usize>,
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            threshold: 1000.0,
            max_starts: None,
        }
    }
}

/// One link of the stream network tree
#[derive(Debug, Clone)]
pub struct Link {
    /// Grid cell of the link's most upstream node
    pub start_cell: (usize, usize),
    /// Grid cell of the link's most downstream node (junction cells are
    /// shared with the downstream link)
    pub end_cell: (usize, usize),
    /// First index into the shared coordinate list
    pub start_coord: usize,
    /// Last index into the shared coordinate list (inclusive)
    pub end_coord: usize,
    /// Count of start pixels draining through this link
    pub magnitude: u32,
    /// Strahler-style order
    pub order: u32,
    /// Downstream link index, -1 for a root
    pub downstream: i32,
    /// Upstream link indices, -1 where absent
    pub upstream: [i32; 2],
    /// External control-point id at the link's downstream node, -1 if none
    pub ds_node_id: i32,
}

impl Link {
    /// A link with no physical length (single shared junction cell)
    pub fn is_zero_length(&self) -> bool {
        self.start_coord == self.end_coord
    }
}

/// One record of the shared coordinate list
#[derive(Debug, Clone)]
pub struct CoordinateNode {
    /// Grid cell this record was traced from
    pub cell: (usize, usize),
    /// Projected x of the cell center
    pub x: f64,
    /// Projected y of the cell center
    pub y: f64,
    /// Cumulative traced length from the link start (profile stage)
    pub length: f64,
    /// Elevation at the cell (profile stage)
    pub elevation: f64,
    /// Accumulated drainage area at the cell
    pub area: f64,
}

/// A stream network: ordered link tree plus the shared coordinate list.
///
/// The root link of each tree comes first, remaining links follow in the
/// order they were closed. Downstream consumers index coordinates by
/// position, so this ordering is load-bearing.
#[derive(Debug, Clone)]
pub struct StreamNetwork {
    pub links: Vec<Link>,
    pub coords: Vec<CoordinateNode>,
    /// (rows, cols) of the source grids
    pub shape: (usize, usize),
}

impl StreamNetwork {
    /// Indices of links with no downstream link
    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        self.links
            .iter()
            .enumerate()
            .filter(|(_, l)| l.downstream < 0)
            .map(|(i, _)| i)
    }
}

/// Per-cell trace state. Replaces the classic trick of negating direction
/// codes in place to mark visited cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellState {
    Unvisited,
    Traced,
    Junction,
}

/// A link head waiting to be traced
struct Head {
    cell: (usize, usize),
    upstream: [i32; 2],
    order: u32,
    magnitude: u32,
}

/// A closed link before output reordering
struct BuildLink {
    start: (usize, usize),
    end: (usize, usize),
    magnitude: u32,
    order: u32,
    downstream: i32,
    upstream: [i32; 2],
}

/// Stream network construction algorithm (struct form for the
/// [`riverine_core::Algorithm`] trait)
#[derive(Debug, Clone, Default)]
pub struct BuildNetwork;

impl riverine_core::Algorithm for BuildNetwork {
    type Input = (Raster<u8>, Raster<f64>);
    type Output = StreamNetwork;
    type Params = NetworkParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Stream Network"
    }

    fn description(&self) -> &'static str {
        "Build the stream-network link tree from D8 flow direction and accumulated area"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        build_network(&input.0, &input.1, params)
    }
}

/// Build the stream-network link tree.
///
/// # Arguments
/// * `flow_dir` - D8 flow direction raster (codes 1-8, 0 = undefined)
/// * `area` - accumulated drainage area raster, same shape
/// * `params` - channel threshold and start-pixel budget
///
/// # Errors
/// * `SizeMismatch` when the grids disagree on shape
/// * `CapacityExceeded` when start pixels outnumber the budget
/// * `InvalidTopology` when a downstream walk does not terminate
pub fn build_network(
    flow_dir: &Raster<u8>,
    area: &Raster<f64>,
    params: NetworkParams,
) -> Result<StreamNetwork> {
    flow_dir.check_same_shape(area)?;
    let (rows, cols) = flow_dir.shape();
    let ncells = rows * cols;

    let starts = find_start_pixels(flow_dir, area, params.threshold);
    if let Some(budget) = params.max_starts {
        if starts.len() > budget {
            return Err(Error::CapacityExceeded {
                found: starts.len(),
                budget,
            });
        }
    }

    // Magnitude pass: walk downstream from every start pixel, counting how
    // many start pixels pass through each cell.
    let mut magnitude = Array2::<u32>::zeros((rows, cols));
    for &(r, c) in &starts {
        let (mut row, mut col) = (r, c);
        let mut steps = 0usize;
        loop {
            magnitude[(row, col)] += 1;
            let dir = unsafe { flow_dir.get_unchecked(row, col) };
            let Some((nr, nc)) = d8::downstream(row, col, dir) else {
                break;
            };
            if nr < 0 || nc < 0 || nr as usize >= rows || nc as usize >= cols {
                break;
            }
            row = nr as usize;
            col = nc as usize;
            steps += 1;
            if steps > ncells {
                return Err(Error::InvalidTopology(format!(
                    "flow path from start pixel ({}, {}) does not terminate",
                    r, c
                )));
            }
        }
    }

    // Link building with deferred junction resolution.
    let mut state = Array2::from_elem((rows, cols), CellState::Unvisited);
    let mut links: Vec<BuildLink> = Vec::new();
    let mut pending: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
    let mut work: VecDeque<Head> = starts
        .iter()
        .map(|&cell| Head {
            cell,
            upstream: [-1, -1],
            order: 1,
            magnitude: 1,
        })
        .collect();

    while let Some(head) = work.pop_front() {
        let (mut row, mut col) = head.cell;
        let mut steps = 0usize;

        // Trace while the magnitude is unchanged; a change marks a junction
        // cell, which closes this link (inclusive) and heads the merged one.
        let (end, junction) = loop {
            if state[(row, col)] == CellState::Unvisited {
                state[(row, col)] = CellState::Traced;
            }
            let dir = unsafe { flow_dir.get_unchecked(row, col) };
            let Some((nr, nc)) = d8::downstream(row, col, dir) else {
                break ((row, col), None);
            };
            if nr < 0 || nc < 0 || nr as usize >= rows || nc as usize >= cols {
                break ((row, col), None);
            }
            let next = (nr as usize, nc as usize);
            if magnitude[next] != head.magnitude {
                break (next, Some(next));
            }
            (row, col) = next;
            steps += 1;
            if steps > ncells {
                return Err(Error::InvalidTopology(format!(
                    "link trace from ({}, {}) does not terminate",
                    head.cell.0, head.cell.1
                )));
            }
        };

        let id = links.len();
        links.push(BuildLink {
            start: head.cell,
            end,
            magnitude: head.magnitude,
            order: head.order,
            downstream: -1,
            upstream: head.upstream,
        });
        for us in head.upstream {
            if us >= 0 {
                links[us as usize].downstream = id as i32;
            }
        }

        let Some(junction_cell) = junction else {
            continue; // root: flow leaves the grid or hits an undefined cell
        };

        state[junction_cell] = CellState::Junction;
        pending.entry(junction_cell).or_default().push(id);

        let contributors = &pending[&junction_cell];
        let sum: u32 = contributors.iter().map(|&l| links[l].magnitude).sum();
        let target = magnitude[junction_cell];
        if sum < target {
            continue; // defer until the remaining contributors close
        }
        if sum > target {
            warn!(
                row = junction_cell.0,
                col = junction_cell.1,
                sum,
                target,
                "junction magnitude overshoot; accumulation grid inconsistent with flow grid"
            );
            continue;
        }

        let contributors = pending.remove(&junction_cell).unwrap_or_default();
        let (us, order) = fold_contributors(&mut links, junction_cell, &contributors);
        work.push_back(Head {
            cell: junction_cell,
            upstream: us,
            order,
            magnitude: target,
        });
    }

    for (&(r, c), contributors) in &pending {
        warn!(
            row = r,
            col = c,
            contributors = contributors.len(),
            "unresolved junction: contributing magnitudes never reached the junction magnitude"
        );
    }

    assemble(links, flow_dir, area, (rows, cols))
}

/// Identify channel start pixels.
///
/// A start pixel is at or above the threshold, carries a valid direction,
/// has no inflowing neighbor at or above the threshold (it is the most
/// upstream qualifying cell on its branch), and does not drain off-grid in
/// one step (a link of zero traceable length at the boundary is rejected).
fn find_start_pixels(
    flow_dir: &Raster<u8>,
    area: &Raster<f64>,
    threshold: f64,
) -> Vec<(usize, usize)> {
    let (rows, cols) = flow_dir.shape();
    let mut starts = Vec::new();

    for row in 0..rows {
        for col in 0..cols {
            let a = unsafe { area.get_unchecked(row, col) };
            if a.is_nan() || a < threshold {
                continue;
            }
            let dir = unsafe { flow_dir.get_unchecked(row, col) };
            let Some((nr, nc)) = d8::downstream(row, col, dir) else {
                continue;
            };
            if nr < 0 || nc < 0 || nr as usize >= rows || nc as usize >= cols {
                continue;
            }

            let mut headwater = true;
            for (k, &(dr, dc)) in d8::D8_OFFSETS.iter().enumerate() {
                let (qr, qc) = (row as isize + dr, col as isize + dc);
                let Some(neighbor_dir) = flow_dir.get_signed(qr, qc) else {
                    continue;
                };
                if !d8::drains_into_center(neighbor_dir, k) {
                    continue;
                }
                let neighbor_area = area
                    .get_signed(qr, qc)
                    .unwrap_or(f64::NAN);
                if !neighbor_area.is_nan() && neighbor_area >= threshold {
                    headwater = false;
                    break;
                }
            }
            if headwater {
                starts.push((row, col));
            }
        }
    }

    starts
}

/// Merged order at a junction: `max(o1, o2)`, incremented when equal.
fn merge_order(o1: u32, o2: u32) -> u32 {
    if o1 == o2 {
        o1 + 1
    } else {
        o1.max(o2)
    }
}

/// Reduce a junction's contributors to at most two upstream slots.
///
/// Junctions with more than two converging links are folded through
/// synthetic zero-length links at the junction cell, so every link keeps the
/// two-slot upstream shape.
fn fold_contributors(
    links: &mut Vec<BuildLink>,
    junction: (usize, usize),
    contributors: &[usize],
) -> ([i32; 2], u32) {
    debug_assert!(contributors.len() >= 2);

    let mut acc = contributors[0];
    for &next in &contributors[1..contributors.len() - 1] {
        let id = links.len();
        let folded = BuildLink {
            start: junction,
            end: junction,
            magnitude: links[acc].magnitude + links[next].magnitude,
            order: merge_order(links[acc].order, links[next].order),
            downstream: -1,
            upstream: [acc as i32, next as i32],
        };
        links.push(folded);
        links[acc].downstream = id as i32;
        links[next].downstream = id as i32;
        acc = id;
    }

    let last = contributors[contributors.len() - 1];
    let order = merge_order(links[acc].order, links[last].order);
    ([acc as i32, last as i32], order)
}

/// Reorder links root-first and populate the shared coordinate list.
fn assemble(
    links: Vec<BuildLink>,
    flow_dir: &Raster<u8>,
    area: &Raster<f64>,
    shape: (usize, usize),
) -> Result<StreamNetwork> {
    let (rows, cols) = shape;
    let ncells = rows * cols;
    let transform = *flow_dir.transform();

    let roots: Vec<usize> = (0..links.len())
        .filter(|&i| links[i].downstream < 0)
        .collect();
    let others: Vec<usize> = (0..links.len())
        .filter(|&i| links[i].downstream >= 0)
        .collect();

    let mut remap = vec![0i32; links.len()];
    for (new, &old) in roots.iter().chain(others.iter()).enumerate() {
        remap[old] = new as i32;
    }

    let mut out = StreamNetwork {
        links: Vec::with_capacity(links.len()),
        coords: Vec::new(),
        shape,
    };

    for &old in roots.iter().chain(others.iter()) {
        let bl = &links[old];
        let start_coord = out.coords.len();

        let (mut row, mut col) = bl.start;
        let mut steps = 0usize;
        loop {
            let (x, y) = transform.pixel_to_geo(col, row);
            out.coords.push(CoordinateNode {
                cell: (row, col),
                x,
                y,
                length: 0.0,
                elevation: 0.0,
                area: unsafe { area.get_unchecked(row, col) },
            });
            if (row, col) == bl.end {
                break;
            }
            let dir = unsafe { flow_dir.get_unchecked(row, col) };
            let next = d8::downstream(row, col, dir)
                .filter(|&(nr, nc)| nr >= 0 && nc >= 0 && (nr as usize) < rows && (nc as usize) < cols)
                .ok_or_else(|| {
                    Error::InvalidTopology(format!(
                        "link trace lost between ({}, {}) and ({}, {})",
                        bl.start.0, bl.start.1, bl.end.0, bl.end.1
                    ))
                })?;
            (row, col) = (next.0 as usize, next.1 as usize);
            steps += 1;
            if steps > ncells {
                return Err(Error::InvalidTopology(
                    "link coordinate trace does not terminate".to_string(),
                ));
            }
        }

        out.links.push(Link {
            start_cell: bl.start,
            end_cell: bl.end,
            start_coord,
            end_coord: out.coords.len() - 1,
            magnitude: bl.magnitude,
            order: bl.order,
            downstream: if bl.downstream < 0 {
                -1
            } else {
                remap[bl.downstream as usize]
            },
            upstream: bl.upstream.map(|u| if u < 0 { -1 } else { remap[u as usize] }),
            ds_node_id: -1,
        });
    }

    Ok(out)
}
