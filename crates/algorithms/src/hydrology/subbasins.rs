//! Subbasin labeling and reach attribute assembly
//!
//! Assigns one subbasin per network link: channel cells are stamped with the
//! link's basin number, then the label grows uphill over every cell whose D8
//! direction drains into an already-labeled cell. Junction cells belong to
//! the downstream link's basin.
//!
//! Alongside the labeled raster this stage emits the reach layer: one
//! line feature per link carrying the full reach attribute set, including
//! the DOUT distances measured along the channel to the terminal outlet.
//!
//! Expects a network that has been through [`build_profile`]; lengths and
//! elevations are read from the shared coordinate list.
//!
//! [`build_profile`]: crate::hydrology::profile::build_profile

use crate::hydrology::d8;
use crate::hydrology::network::StreamNetwork;
use crate::hydrology::profile::straight_length;
use geo_types::{Geometry, LineString};
use riverine_core::raster::Raster;
use riverine_core::vector::{AttributeValue, Feature, FeatureCollection, FieldKind};
use riverine_core::{Error, Result};
use std::collections::VecDeque;
use tracing::warn;

/// How subbasin numbers are assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Numbering {
    /// Number basins 1..n in downstream-first visit order
    Sequential,
    /// Stamp every link with the same basin number (single-watershed mode)
    Fixed(i32),
}

/// Parameters for subbasin delineation
#[derive(Debug, Clone)]
pub struct SubbasinParams {
    pub numbering: Numbering,
}

impl Default for SubbasinParams {
    fn default() -> Self {
        Self {
            numbering: Numbering::Sequential,
        }
    }
}

/// Per-link subbasin summary used by the merge stage
#[derive(Debug, Clone)]
pub struct Subbasin {
    /// Basin number stamped into the raster
    pub basin: i32,
    /// Index of the owning link in the network
    pub link: usize,
    /// External control-point id at the downstream node, -1 if none
    pub ds_node_id: i32,
    /// Basin number of the downstream subbasin, -1 for a root
    pub ds_basin: i32,
    /// Basin numbers of the upstream subbasins, -1 where absent
    pub us_basin: [i32; 2],
    /// Accumulated drainage area at the downstream end
    pub area: f64,
    pub magnitude: u32,
    pub order: u32,
    /// Traced channel length of the owning link
    pub length: f64,
    pub slope: f64,
}

/// Output of subbasin delineation
#[derive(Debug, Clone)]
pub struct SubbasinResult {
    /// Labeled grid: basin number per cell, 0 where unassigned
    pub raster: Raster<i32>,
    /// One line feature per link with the reach attribute set
    pub reaches: FeatureCollection,
    /// Per-link summaries, indexed like `network.links`
    pub subbasins: Vec<Subbasin>,
}

/// Subbasin delineation algorithm (struct form for the
/// [`riverine_core::Algorithm`] trait)
#[derive(Debug, Clone, Default)]
pub struct DelineateSubbasins;

impl riverine_core::Algorithm for DelineateSubbasins {
    type Input = (StreamNetwork, Raster<u8>);
    type Output = SubbasinResult;
    type Params = SubbasinParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Delineate Subbasins"
    }

    fn description(&self) -> &'static str {
        "Label one subbasin per network link and emit the reach layer"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        delineate_subbasins(&input.0, &input.1, params)
    }
}

/// Slope assigned where a link has no traceable length
const MIN_SLOPE: f64 = 1e-4;

/// Delineate one subbasin per link.
///
/// # Errors
/// * `SizeMismatch` when the flow grid disagrees with the network's shape
/// * `InvalidParameter` for `Numbering::Fixed(0)` (0 marks unassigned cells)
pub fn delineate_subbasins(
    network: &StreamNetwork,
    flow_dir: &Raster<u8>,
    params: SubbasinParams,
) -> Result<SubbasinResult> {
    if flow_dir.shape() != network.shape {
        return Err(Error::SizeMismatch {
            er: network.shape.0,
            ec: network.shape.1,
            ar: flow_dir.rows(),
            ac: flow_dir.cols(),
        });
    }
    if let Numbering::Fixed(0) = params.numbering {
        return Err(Error::InvalidParameter {
            name: "numbering",
            value: "Fixed(0)".to_string(),
            reason: "basin number 0 marks unassigned cells".to_string(),
        });
    }

    let (basin, visit_order) = assign_basin_numbers(network, params.numbering);
    let raster = label_cells(network, flow_dir, &basin, &visit_order);

    let lengths: Vec<f64> = network
        .links
        .iter()
        .map(|l| network.coords[l.end_coord].length)
        .collect();
    let dout_end = outlet_distances(network, &lengths);

    let reaches = reach_layer(network, &basin, &lengths, &dout_end);
    let subbasins = summarize(network, &basin, &lengths);

    Ok(SubbasinResult {
        raster,
        reaches,
        subbasins,
    })
}

/// Assign a basin number per link, downstream before upstream.
///
/// Returns the numbers (indexed like `network.links`) and the visit order.
/// Links unreachable from any root (corrupt cross references) are numbered
/// in a second pass and surfaced with a warning.
fn assign_basin_numbers(network: &StreamNetwork, numbering: Numbering) -> (Vec<i32>, Vec<usize>) {
    let n = network.links.len();
    let mut basin = vec![-1i32; n];
    let mut visit_order = Vec::with_capacity(n);
    let mut counter = 0i32;
    let next_id = |counter: &mut i32| match numbering {
        Numbering::Sequential => {
            *counter += 1;
            *counter
        }
        Numbering::Fixed(v) => v,
    };

    let mut stack: Vec<usize> = network.roots().collect();
    while let Some(i) = stack.pop() {
        if basin[i] >= 0 {
            continue;
        }
        basin[i] = next_id(&mut counter);
        visit_order.push(i);
        for &us in &network.links[i].upstream {
            if us >= 0 {
                stack.push(us as usize);
            }
        }
    }

    // Leftovers only appear when downstream references are inconsistent.
    let mut leftovers: VecDeque<usize> = (0..n).filter(|&i| basin[i] < 0).collect();
    if !leftovers.is_empty() {
        warn!(
            count = leftovers.len(),
            "links unreachable from any root; numbering them after their downstream links"
        );
    }
    let mut stalled = 0usize;
    while let Some(i) = leftovers.pop_front() {
        let ds = network.links[i].downstream;
        if ds < 0 || basin[ds as usize] >= 0 {
            basin[i] = next_id(&mut counter);
            visit_order.push(i);
            stalled = 0;
        } else {
            leftovers.push_back(i);
            stalled += 1;
            if stalled > leftovers.len() {
                warn!(
                    count = leftovers.len(),
                    "link cross references form a cycle; numbering remaining links as-is"
                );
                for j in leftovers {
                    basin[j] = next_id(&mut counter);
                    visit_order.push(j);
                }
                break;
            }
        }
    }

    (basin, visit_order)
}

/// Stamp channel cells and grow each label uphill.
fn label_cells(
    network: &StreamNetwork,
    flow_dir: &Raster<u8>,
    basin: &[i32],
    visit_order: &[usize],
) -> Raster<i32> {
    let mut raster: Raster<i32> = flow_dir.with_same_meta();
    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();

    // Channel cells first, downstream links before their tributaries, so a
    // shared junction cell lands in the downstream link's basin.
    for &i in visit_order {
        let link = &network.links[i];
        for ci in link.start_coord..=link.end_coord {
            let (row, col) = network.coords[ci].cell;
            if unsafe { raster.get_unchecked(row, col) } == 0 {
                raster.data_mut()[(row, col)] = basin[i];
                queue.push_back((row, col));
            }
        }
    }

    // Grow uphill: any unlabeled cell draining into a labeled one joins it.
    while let Some((row, col)) = queue.pop_front() {
        let label = unsafe { raster.get_unchecked(row, col) };
        for (k, &(dr, dc)) in d8::D8_OFFSETS.iter().enumerate() {
            let (qr, qc) = (row as isize + dr, col as isize + dc);
            if raster.get_signed(qr, qc) != Some(0) {
                continue;
            }
            let Some(neighbor_dir) = flow_dir.get_signed(qr, qc) else {
                continue;
            };
            if d8::drains_into_center(neighbor_dir, k) {
                raster.data_mut()[(qr as usize, qc as usize)] = label;
                queue.push_back((qr as usize, qc as usize));
            }
        }
    }

    raster
}

/// Channel distance from every link's downstream end to its tree's outlet.
///
/// The root's end sits at the outlet (distance 0); an upstream link's end is
/// the downstream link's start, so its distance is the downstream link's
/// distance plus that link's traced length.
fn outlet_distances(network: &StreamNetwork, lengths: &[f64]) -> Vec<f64> {
    let mut dout_end = vec![0.0f64; network.links.len()];
    let mut stack: Vec<usize> = network.roots().collect();
    while let Some(i) = stack.pop() {
        for &us in &network.links[i].upstream {
            if us >= 0 {
                dout_end[us as usize] = dout_end[i] + lengths[i];
                stack.push(us as usize);
            }
        }
    }
    dout_end
}

/// Link index to the 1-based LINKNO attribute, -1 preserved.
fn linkno(idx: i32) -> i64 {
    if idx < 0 {
        -1
    } else {
        idx as i64 + 1
    }
}

/// Assemble the reach layer: one line feature per link.
fn reach_layer(
    network: &StreamNetwork,
    basin: &[i32],
    lengths: &[f64],
    dout_end: &[f64],
) -> FeatureCollection {
    let mut fc = FeatureCollection::new();
    fc.add_field("DOUT_MID", FieldKind::Float);
    fc.add_field("DOUT_START", FieldKind::Float);
    fc.add_field("DOUT_END", FieldKind::Float);
    fc.add_field("WSNO", FieldKind::Int);
    fc.add_field("US_Cont_Area", FieldKind::Float);
    fc.add_field("Straight_Length", FieldKind::Float);
    fc.add_field("Slope", FieldKind::Float);
    fc.add_field("Drop", FieldKind::Float);
    fc.add_field("DS_Cont_Area", FieldKind::Float);
    fc.add_field("Magnitude", FieldKind::Int);
    fc.add_field("Length", FieldKind::Float);
    fc.add_field("Order", FieldKind::Int);
    fc.add_field("dsNodeID", FieldKind::Int);
    fc.add_field("USLINKNO2", FieldKind::Int);
    fc.add_field("USLINKNO1", FieldKind::Int);
    fc.add_field("DSLINKNO", FieldKind::Int);
    fc.add_field("LINKNO", FieldKind::Int);

    for (i, link) in network.links.iter().enumerate() {
        let mut coords: Vec<(f64, f64)> = (link.start_coord..=link.end_coord)
            .map(|ci| (network.coords[ci].x, network.coords[ci].y))
            .collect();
        if coords.len() == 1 {
            // Zero-length link at a folded junction: degenerate but valid
            coords.push(coords[0]);
        }

        let start = &network.coords[link.start_coord];
        let end = &network.coords[link.end_coord];
        let length = lengths[i];
        let drop = start.elevation - end.elevation;
        let slope = if length > 0.0 { drop / length } else { MIN_SLOPE };

        let mut f = Feature::new(Geometry::LineString(LineString::from(coords)));
        f.set_property("DOUT_MID", AttributeValue::Float(dout_end[i] + length / 2.0));
        f.set_property("DOUT_START", AttributeValue::Float(dout_end[i] + length));
        f.set_property("DOUT_END", AttributeValue::Float(dout_end[i]));
        f.set_property("WSNO", AttributeValue::Int(basin[i] as i64));
        f.set_property("US_Cont_Area", AttributeValue::Float(start.area));
        f.set_property(
            "Straight_Length",
            AttributeValue::Float(straight_length(network, i)),
        );
        f.set_property("Slope", AttributeValue::Float(slope));
        f.set_property("Drop", AttributeValue::Float(drop));
        f.set_property("DS_Cont_Area", AttributeValue::Float(end.area));
        f.set_property("Magnitude", AttributeValue::Int(link.magnitude as i64));
        f.set_property("Length", AttributeValue::Float(length));
        f.set_property("Order", AttributeValue::Int(link.order as i64));
        f.set_property("dsNodeID", AttributeValue::Int(link.ds_node_id as i64));
        f.set_property("USLINKNO2", AttributeValue::Int(linkno(link.upstream[1])));
        f.set_property("USLINKNO1", AttributeValue::Int(linkno(link.upstream[0])));
        f.set_property("DSLINKNO", AttributeValue::Int(linkno(link.downstream)));
        f.set_property("LINKNO", AttributeValue::Int(i as i64 + 1));
        fc.push(f);
    }

    fc
}

/// Build the per-link summaries consumed by the merge stage.
fn summarize(network: &StreamNetwork, basin: &[i32], lengths: &[f64]) -> Vec<Subbasin> {
    network
        .links
        .iter()
        .enumerate()
        .map(|(i, link)| {
            let start = &network.coords[link.start_coord];
            let end = &network.coords[link.end_coord];
            let length = lengths[i];
            let drop = start.elevation - end.elevation;
            Subbasin {
                basin: basin[i],
                link: i,
                ds_node_id: link.ds_node_id,
                ds_basin: if link.downstream < 0 {
                    -1
                } else {
                    basin[link.downstream as usize]
                },
                us_basin: link.upstream.map(|u| if u < 0 { -1 } else { basin[u as usize] }),
                area: end.area,
                magnitude: link.magnitude,
                order: link.order,
                length,
                slope: if length > 0.0 { drop / length } else { MIN_SLOPE },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrology::network::{build_network, NetworkParams};
    use crate::hydrology::profile::build_profile;
    use riverine_core::GeoTransform;

    fn grids(rows: usize, cols: usize, dirs: &[u8], areas: &[f64]) -> (Raster<u8>, Raster<f64>) {
        let mut fd = Raster::from_vec(dirs.to_vec(), rows, cols).unwrap();
        fd.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
        let mut ar = Raster::from_vec(areas.to_vec(), rows, cols).unwrap();
        ar.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
        (fd, ar)
    }

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

    /// Two order-1 channels converging at (2, 2), then straight south.
    fn converging() -> (Raster<u8>, Raster<f64>) {
        let mut dirs = vec![0u8; 25];
        let mut areas = vec![0.1f64; 25];
        let mut set = |r: usize, c: usize, d: u8, a: f64| {
            dirs[r * 5 + c] = d;
            areas[r * 5 + c] = a;
        };
        set(0, 1, 7, 1.0);
        set(1, 1, 8, 1.5);
        set(0, 3, 7, 1.0);
        set(1, 3, 6, 1.5);
        set(2, 2, 7, 4.0);
        set(3, 2, 7, 5.0);
        set(4, 2, 7, 6.0);
        let rows = 5;
        (
            {
                let mut fd = Raster::from_vec(dirs, rows, 5).unwrap();
                fd.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
                fd
            },
            {
                let mut ar = Raster::from_vec(areas, rows, 5).unwrap();
                ar.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
                ar
            },
        )
    }

    /// Three channels converging on the single cell (2, 2); the junction
    /// folds through a zero-length link.
    fn three_way() -> (Raster<u8>, Raster<f64>) {
        let mut dirs = vec![0u8; 25];
        let mut areas = vec![0.1f64; 25];
        let mut set = |r: usize, c: usize, d: u8, a: f64| {
            dirs[r * 5 + c] = d;
            areas[r * 5 + c] = a;
        };
        set(0, 2, 7, 1.0);
        set(1, 2, 7, 1.5);
        set(2, 0, 1, 1.0);
        set(2, 1, 1, 1.5);
        set(2, 4, 5, 1.0);
        set(2, 3, 5, 1.5);
        set(2, 2, 7, 6.0);
        set(3, 2, 7, 7.0);
        set(4, 2, 7, 8.0);
        grids(5, 5, &dirs, &areas)
    }

    fn delineated(
        fd: &Raster<u8>,
        ar: &Raster<f64>,
        params: SubbasinParams,
    ) -> (StreamNetwork, SubbasinResult) {
        let mut net = build_network(
            fd,
            ar,
            NetworkParams {
                threshold: 1.0,
                max_starts: None,
            },
        )
        .unwrap();
        let dem = sloping_dem(net.shape.0, net.shape.1);
        build_profile(&mut net, &dem).unwrap();
        let result = delineate_subbasins(&net, fd, params).unwrap();
        (net, result)
    }

    fn prop<'a>(fc: &'a FeatureCollection, i: usize, name: &str) -> &'a AttributeValue {
        fc.features[i].get_property(name).unwrap()
    }

    #[test]
    fn test_one_basin_per_link() {
        let (fd, ar) = converging();
        let (net, result) = delineated(&fd, &ar, SubbasinParams::default());

        assert_eq!(net.links.len(), 3);
        assert_eq!(result.subbasins.len(), 3);
        assert_eq!(result.reaches.len(), 3);

        let mut basins: Vec<i32> = result.subbasins.iter().map(|s| s.basin).collect();
        basins.sort_unstable();
        assert_eq!(basins, vec![1, 2, 3]);

        // Root link is written first and numbered first
        assert_eq!(result.subbasins[0].basin, 1);
        assert_eq!(result.subbasins[0].ds_basin, -1);
        for s in &result.subbasins[1..] {
            assert_eq!(s.ds_basin, 1);
        }
    }

    #[test]
    fn test_junction_cell_belongs_downstream() {
        let (fd, ar) = converging();
        let (net, result) = delineated(&fd, &ar, SubbasinParams::default());

        let junction = net.links[0].start_cell;
        assert_eq!(junction, (2, 2));
        assert_eq!(result.raster.get(junction.0, junction.1).unwrap(), 1);
    }

    #[test]
    fn test_reach_attributes() {
        let (fd, ar) = converging();
        let (net, result) = delineated(&fd, &ar, SubbasinParams::default());
        let fc = &result.reaches;

        assert_eq!(fc.fields.len(), 17);
        assert_eq!(fc.fields[0].name, "DOUT_MID");
        assert_eq!(fc.fields[16].name, "LINKNO");

        // Root: two cells of outlet distance, cross references by LINKNO
        assert_eq!(prop(fc, 0, "LINKNO").as_int(), Some(1));
        assert_eq!(prop(fc, 0, "DSLINKNO").as_int(), Some(-1));
        assert_eq!(prop(fc, 0, "WSNO").as_int(), Some(1));
        assert_eq!(prop(fc, 0, "Magnitude").as_int(), Some(2));
        assert_eq!(prop(fc, 0, "Order").as_int(), Some(2));
        assert_eq!(prop(fc, 0, "DOUT_END").as_float(), Some(0.0));
        let root_len = prop(fc, 0, "Length").as_float().unwrap();
        assert!((root_len - 2.0).abs() < 1e-12);
        assert_eq!(prop(fc, 0, "DOUT_START").as_float(), Some(root_len));

        let us1 = prop(fc, 0, "USLINKNO1").as_int().unwrap();
        let us2 = prop(fc, 0, "USLINKNO2").as_int().unwrap();
        assert!(us1 > 0 && us2 > 0 && us1 != us2);

        for i in [us1 as usize - 1, us2 as usize - 1] {
            assert_eq!(prop(fc, i, "DSLINKNO").as_int(), Some(1));
            // Tributary ends at the junction: its outlet distance is the
            // root's start distance
            assert_eq!(prop(fc, i, "DOUT_END").as_float(), Some(root_len));
            let len = prop(fc, i, "Length").as_float().unwrap();
            let mid = prop(fc, i, "DOUT_MID").as_float().unwrap();
            assert!((mid - (root_len + len / 2.0)).abs() < 1e-12);

            // dem drops 10 per row over sqrt(2)+1 of traced length
            let drop = prop(fc, i, "Drop").as_float().unwrap();
            assert!((drop - 20.0).abs() < 1e-12);
            let slope = prop(fc, i, "Slope").as_float().unwrap();
            assert!((slope - drop / len).abs() < 1e-12);
        }
    }

    #[test]
    fn test_zero_length_reach_gets_slope_floor() {
        let (fd, ar) = three_way();
        let (net, result) = delineated(&fd, &ar, SubbasinParams::default());

        assert_eq!(net.links.len(), 5);
        let zero: Vec<usize> = net
            .links
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_zero_length())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(zero.len(), 1);
        let i = zero[0];

        // The folded link still gets a reach feature and a basin number
        let fc = &result.reaches;
        assert_eq!(fc.len(), 5);
        assert_eq!(prop(fc, i, "Length").as_float(), Some(0.0));
        assert_eq!(prop(fc, i, "Straight_Length").as_float(), Some(0.0));
        assert_eq!(prop(fc, i, "Drop").as_float(), Some(0.0));
        assert_eq!(prop(fc, i, "Slope").as_float(), Some(1e-4));
        assert_eq!(prop(fc, i, "Magnitude").as_int(), Some(2));
        assert!(prop(fc, i, "WSNO").as_int().unwrap() > 0);
        assert_eq!(result.subbasins[i].slope, 1e-4);
        assert_eq!(result.subbasins[i].length, 0.0);
    }

    #[test]
    fn test_flood_fill_covers_hillslopes() {
        // Straight channel down column 2; hillslope cells drain toward it
        let mut dirs = vec![0u8; 25];
        let mut areas = vec![0.5f64; 25];
        for row in 0..5 {
            dirs[row * 5] = 1; // E
            dirs[row * 5 + 1] = 1; // E
            dirs[row * 5 + 2] = 7; // S
            dirs[row * 5 + 3] = 5; // W
            dirs[row * 5 + 4] = 5; // W
            areas[row * 5 + 2] = (row + 1) as f64 * 3.0;
        }
        let (fd, ar) = grids(5, 5, &dirs, &areas);
        let (_, result) = delineated(&fd, &ar, SubbasinParams::default());

        for row in 0..5 {
            for col in 0..5 {
                assert_eq!(result.raster.get(row, col).unwrap(), 1);
            }
        }
    }

    #[test]
    fn test_fixed_numbering() {
        let (fd, ar) = converging();
        let (_, result) = delineated(
            &fd,
            &ar,
            SubbasinParams {
                numbering: Numbering::Fixed(5),
            },
        );

        assert!(result.subbasins.iter().all(|s| s.basin == 5));
        let junction = result.raster.get(2, 2).unwrap();
        assert_eq!(junction, 5);
    }

    #[test]
    fn test_algorithm_interface() {
        use riverine_core::Algorithm;
        let (fd, ar) = converging();
        let mut net = build_network(
            &fd,
            &ar,
            NetworkParams {
                threshold: 1.0,
                max_starts: None,
            },
        )
        .unwrap();
        build_profile(&mut net, &sloping_dem(5, 5)).unwrap();

        let result = DelineateSubbasins.execute_default((net, fd)).unwrap();
        assert_eq!(result.subbasins.len(), 3);
    }

    #[test]
    fn test_fixed_zero_rejected() {
        let (fd, ar) = converging();
        let mut net = build_network(
            &fd,
            &ar,
            NetworkParams {
                threshold: 1.0,
                max_starts: None,
            },
        )
        .unwrap();
        let dem = sloping_dem(5, 5);
        build_profile(&mut net, &dem).unwrap();

        let err = delineate_subbasins(
            &net,
            &fd,
            SubbasinParams {
                numbering: Numbering::Fixed(0),
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }
}
