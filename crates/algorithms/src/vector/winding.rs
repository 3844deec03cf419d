//! Ring winding and abutting-polygon union
//!
//! The merge engine's sign convention is clockwise-positive: a polygon whose
//! exterior ring runs clockwise (in y-up projected coordinates) has positive
//! signed area. Rings that come out counter-clockwise are reversed before
//! any union.

use geo::{BooleanOps, LineString, MultiPolygon, Polygon};
use riverine_core::{Error, Result};

/// Signed area of a polygon's exterior ring, positive for clockwise
/// orientation (y-up coordinates).
pub fn signed_area_cw(poly: &Polygon<f64>) -> f64 {
    ring_signed_area_cw(poly.exterior())
}

fn ring_signed_area_cw(ring: &LineString<f64>) -> f64 {
    let coords = &ring.0;
    if coords.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for window in coords.windows(2) {
        let (a, b) = (window[0], window[1]);
        sum += (b.x - a.x) * (b.y + a.y);
    }
    // Unclosed rings still sum the implicit closing edge
    let (first, last) = (coords[0], coords[coords.len() - 1]);
    if first != last {
        sum += (first.x - last.x) * (first.y + last.y);
    }
    sum / 2.0
}

/// Normalize a polygon to the clockwise-positive convention, reversing its
/// rings when the exterior's signed area is negative.
pub fn ensure_clockwise(poly: Polygon<f64>) -> Polygon<f64> {
    if signed_area_cw(&poly) >= 0.0 {
        return poly;
    }
    let exterior = reverse_ring(poly.exterior());
    let interiors: Vec<LineString<f64>> = poly.interiors().iter().map(reverse_ring).collect();
    Polygon::new(exterior, interiors)
}

fn reverse_ring(ring: &LineString<f64>) -> LineString<f64> {
    let mut coords = ring.0.clone();
    coords.reverse();
    LineString::from(coords)
}

/// Union two abutting single-part polygons into one single-part polygon.
///
/// Both operands are winding-normalized first. A union that comes out with
/// more than one part means the operands did not abut; that is reported as
/// `MultiPartPolygon` for the caller to log and skip.
pub fn union_abutting(a: Polygon<f64>, b: Polygon<f64>, basin: i32) -> Result<Polygon<f64>> {
    let a = ensure_clockwise(a);
    let b = ensure_clockwise(b);

    let merged: MultiPolygon<f64> = a.union(&b);
    let mut parts = merged.0;
    if parts.len() != 1 {
        return Err(Error::MultiPartPolygon { basin });
    }
    Ok(ensure_clockwise(parts.remove(0)))
}
