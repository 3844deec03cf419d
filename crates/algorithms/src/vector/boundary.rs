//! Labeled-region boundary extraction
//!
//! Converts the labeled subbasin raster into per-label polygons by walking
//! cell edges: every edge between a labeled cell and a differently-labeled
//! (or off-grid) cell contributes one directed segment, and the segments of
//! a label stitch into closed rings. The largest ring of a label becomes a
//! part exterior; contained rings become holes; remaining rings become
//! additional parts (flagged later by the merge engine).

use crate::maybe_rayon::*;
use geo::{Contains, LineString, MultiPolygon, Polygon};
use riverine_core::raster::Raster;
use std::collections::HashMap;

/// Grid corner in (col, row) order
type Corner = (usize, usize);

/// Extract boundary polygons for every non-zero label in the raster.
///
/// Coordinates are projected through the raster's geotransform (cell
/// corners, not centers).
pub fn region_polygons(raster: &Raster<i32>) -> HashMap<i32, MultiPolygon<f64>> {
    let (rows, cols) = raster.shape();
    let mut edges: HashMap<i32, Vec<(Corner, Corner)>> = HashMap::new();

    for row in 0..rows {
        for col in 0..cols {
            let label = unsafe { raster.get_unchecked(row, col) };
            if label == 0 {
                continue;
            }

            let differs = |r: isize, c: isize| raster.get_signed(r, c) != Some(label);
            let (r, c) = (row as isize, col as isize);
            let cell_edges = edges.entry(label).or_default();

            if differs(r - 1, c) {
                cell_edges.push(((col, row), (col + 1, row)));
            }
            if differs(r, c + 1) {
                cell_edges.push(((col + 1, row), (col + 1, row + 1)));
            }
            if differs(r + 1, c) {
                cell_edges.push(((col + 1, row + 1), (col, row + 1)));
            }
            if differs(r, c - 1) {
                cell_edges.push(((col, row + 1), (col, row)));
            }
        }
    }

    let transform = *raster.transform();
    let labeled: Vec<(i32, Vec<(Corner, Corner)>)> = edges.into_iter().collect();

    labeled
        .into_par_iter()
        .map(|(label, segs)| (label, stitch_label(segs, &transform)))
        .collect::<Vec<_>>()
        .into_iter()
        .collect()
}

/// Stitch one label's directed segments into rings and assemble parts.
fn stitch_label(
    segs: Vec<(Corner, Corner)>,
    transform: &riverine_core::GeoTransform,
) -> MultiPolygon<f64> {
    let mut outgoing: HashMap<Corner, Vec<Corner>> = HashMap::new();
    for (from, to) in &segs {
        outgoing.entry(*from).or_default().push(*to);
    }

    let mut rings: Vec<Vec<Corner>> = Vec::new();
    for (start, _) in &segs {
        let Some(first) = outgoing.get_mut(start).and_then(|v| v.pop()) else {
            continue;
        };
        let mut ring = vec![*start, first];
        let mut prev = *start;
        let mut cur = first;
        while cur != *start {
            // Every corner has matched in/out degree, so the walk closes
            let Some(next) = next_corner(&mut outgoing, prev, cur) else {
                break;
            };
            ring.push(next);
            prev = cur;
            cur = next;
        }
        if cur == *start {
            rings.push(ring);
        }
    }

    // Largest ring first so holes and extra parts attach to an exterior
    rings.sort_by(|a, b| pixel_ring_area(b).total_cmp(&pixel_ring_area(a)));

    let mut parts: Vec<Polygon<f64>> = Vec::new();
    for ring in rings {
        let coords: Vec<(f64, f64)> = ring
            .iter()
            .map(|&(col, row)| transform.pixel_to_geo_corner(col, row))
            .collect();
        let candidate = Polygon::new(LineString::from(coords), vec![]);

        match parts.iter_mut().find(|p| p.contains(&candidate)) {
            Some(part) => part.interiors_push(candidate.exterior().clone()),
            None => parts.push(candidate),
        }
    }

    MultiPolygon(parts)
}

/// Pick the next corner of a ring walk.
///
/// A corner shared by two boundary chains (two same-label cells touching
/// only diagonally) has two outgoing segments; the walk takes the turn that
/// keeps the labeled region on the same side, so the chains stitch into
/// separate simple rings instead of one self-touching ring.
fn next_corner(
    outgoing: &mut HashMap<Corner, Vec<Corner>>,
    prev: Corner,
    cur: Corner,
) -> Option<Corner> {
    let candidates = outgoing.get_mut(&cur)?;
    if candidates.is_empty() {
        return None;
    }
    let idx = if candidates.len() == 1 {
        0
    } else {
        let din = delta(prev, cur);
        candidates
            .iter()
            .enumerate()
            .max_by_key(|&(_, &to)| turn(din, delta(cur, to)))
            .map(|(i, _)| i)?
    };
    Some(candidates.swap_remove(idx))
}

fn delta(from: Corner, to: Corner) -> (isize, isize) {
    (to.0 as isize - from.0 as isize, to.1 as isize - from.1 as isize)
}

/// Cross product of the incoming and outgoing step. The labeled cell sits
/// on the right of every directed segment (row axis pointing down), so the
/// largest value is the turn that hugs the region.
fn turn(din: (isize, isize), dout: (isize, isize)) -> isize {
    din.0 * dout.1 - din.1 * dout.0
}

/// Unsigned shoelace area of a ring in pixel units
fn pixel_ring_area(ring: &[Corner]) -> f64 {
    let mut sum = 0.0;
    for window in ring.windows(2) {
        let ((x0, y0), (x1, y1)) = (window[0], window[1]);
        sum += x0 as f64 * y1 as f64 - x1 as f64 * y0 as f64;
    }
    (sum / 2.0).abs()
}
