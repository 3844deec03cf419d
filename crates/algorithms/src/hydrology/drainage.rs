//! Drainage trees and basin merging
//!
//! A drainage tree collects the subbasins that drain through a chosen root
//! subbasin, honoring control points: descent stops at any upstream subbasin
//! whose downstream node carries an outlet, inlet or reservoir mark (point
//! sources pass through). Merging a tree unions the member basin polygons
//! bottom-up into one watershed polygon.
//!
//! `merge_basins_by_drainage` drives the whole stage: it picks the merge
//! candidates (tree roots and marked outlet/reservoir links), skips anything
//! upstream of an inlet, merges each tree, and emits the watershed layer
//! with cross references between merged watersheds.

use crate::hydrology::outlets::{DsNodeKind, OutletLayer};
use crate::hydrology::subbasins::Subbasin;
use crate::vector::{ensure_clockwise, union_abutting};
use geo::{MultiPolygon, Polygon};
use riverine_core::vector::{AttributeValue, Feature, FeatureCollection, FieldKind};
use riverine_core::{Error, Result};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// One node of a drainage tree
#[derive(Debug, Clone)]
struct DrainageNode {
    /// Index into the subbasin list
    value: usize,
    left: Option<usize>,
    right: Option<usize>,
}

/// Arena-allocated drainage tree rooted at a merge candidate.
///
/// Nodes are stored in pre-order, so a node's children always sit at higher
/// indices than the node itself.
#[derive(Debug, Clone)]
pub struct DrainageTree {
    nodes: Vec<DrainageNode>,
    root: usize,
}

impl DrainageTree {
    /// Number of subbasins in the tree
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Subbasin indices in pre-order (root first)
    pub fn values(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i];
            out.push(node.value);
            // Right pushed first so the left child is visited first
            if let Some(r) = node.right {
                stack.push(r);
            }
            if let Some(l) = node.left {
                stack.push(l);
            }
        }
        out
    }
}

/// Whether descent should stop at this upstream subbasin.
///
/// A non-root subbasin with a marked downstream node starts its own
/// watershed unless the mark is a point source. Without an outlets layer
/// every mark is treated as an outlet.
fn stops_descent(sub: &Subbasin, outlets: Option<&OutletLayer>) -> bool {
    if sub.ds_node_id < 0 {
        return false;
    }
    match outlets {
        None => true,
        Some(layer) => layer.classify(sub.ds_node_id) != DsNodeKind::PointSource,
    }
}

/// Build the drainage tree rooted at subbasin `root`.
///
/// Returns `None` when `root` is out of range.
pub fn build_drainage_tree(
    subbasins: &[Subbasin],
    outlets: Option<&OutletLayer>,
    root: usize,
) -> Option<DrainageTree> {
    if root >= subbasins.len() {
        return None;
    }
    let by_basin: HashMap<i32, usize> = subbasins
        .iter()
        .enumerate()
        .map(|(i, s)| (s.basin, i))
        .collect();

    let mut tree = DrainageTree {
        nodes: vec![DrainageNode {
            value: root,
            left: None,
            right: None,
        }],
        root: 0,
    };

    // (node index, child slot) pairs still to expand
    let mut stack: Vec<usize> = vec![0];
    while let Some(node_idx) = stack.pop() {
        let sub_idx = tree.nodes[node_idx].value;
        let us_basin = subbasins[sub_idx].us_basin;
        for (slot, &us) in us_basin.iter().enumerate() {
            if us < 0 {
                continue;
            }
            let Some(&child_sub) = by_basin.get(&us) else {
                continue;
            };
            if stops_descent(&subbasins[child_sub], outlets) {
                continue;
            }
            let child_idx = tree.nodes.len();
            tree.nodes.push(DrainageNode {
                value: child_sub,
                left: None,
                right: None,
            });
            if slot == 0 {
                tree.nodes[node_idx].left = Some(child_idx);
            } else {
                tree.nodes[node_idx].right = Some(child_idx);
            }
            stack.push(child_idx);
        }
    }

    Some(tree)
}

/// Merge a drainage tree's basin polygons into one watershed polygon.
///
/// Works bottom-up: at every node the upstream children are unioned first,
/// then that result with the node's own polygon. Polygons are looked up by
/// basin number and winding-normalized before use. Multi-part member
/// polygons are logged and skipped; a union that comes out multi-part is
/// logged and the first operand carried, so a bad basin cannot poison the
/// rest of the watershed. Returns `None` when no member contributed a
/// polygon.
pub fn merge_drainage_tree(
    tree: &DrainageTree,
    subbasins: &[Subbasin],
    polygons: &HashMap<i32, MultiPolygon<f64>>,
) -> Option<Polygon<f64>> {
    let single_part = |basin: i32| -> Option<Polygon<f64>> {
        let mp = polygons.get(&basin)?;
        if mp.0.len() != 1 {
            warn!(basin, parts = mp.0.len(), "multi-part basin polygon skipped in merge");
            return None;
        }
        Some(ensure_clockwise(mp.0[0].clone()))
    };

    // Children sit at higher indices, so a reverse scan is a post-order.
    // At each node the two child results are unioned first, then that
    // result is unioned with the node's own polygon.
    let mut merged: Vec<Option<Polygon<f64>>> = vec![None; tree.nodes.len()];
    for i in (0..tree.nodes.len()).rev() {
        let node = &tree.nodes[i];
        let basin = subbasins[node.value].basin;

        let left = node.left.and_then(|c| merged[c].take());
        let right = node.right.and_then(|c| merged[c].take());
        let children = match (left, right) {
            (Some(a), Some(b)) => match union_abutting(a.clone(), b, basin) {
                Ok(u) => Some(u),
                Err(Error::MultiPartPolygon { .. }) => {
                    warn!(basin, "non-abutting upstream polygons; keeping the first branch");
                    Some(a)
                }
                Err(_) => Some(a),
            },
            (one, None) | (None, one) => one,
        };

        merged[i] = match (children, single_part(basin)) {
            (Some(c), Some(own)) => match union_abutting(c, own.clone(), basin) {
                Ok(u) => Some(u),
                Err(Error::MultiPartPolygon { .. }) => {
                    warn!(basin, "non-abutting basin polygons; keeping the downstream part");
                    Some(own)
                }
                Err(_) => Some(own),
            },
            (c, None) => c,
            (None, own) => own,
        };
    }

    merged[tree.root].take()
}

/// Whether subbasin `idx` drains through an inlet point.
///
/// Walks the downstream chain; any link whose downstream node carries an
/// inlet mark puts everything at and above it outside the merged watershed
/// layer.
///
/// # Errors
/// `InvalidTopology` when the downstream chain revisits a subbasin.
pub fn upstream_of_inlet(
    subbasins: &[Subbasin],
    outlets: Option<&OutletLayer>,
    idx: usize,
) -> Result<bool> {
    let Some(layer) = outlets else {
        return Ok(false);
    };
    let by_basin: HashMap<i32, usize> = subbasins
        .iter()
        .enumerate()
        .map(|(i, s)| (s.basin, i))
        .collect();

    let mut visited = HashSet::new();
    let mut cur = idx;
    loop {
        if !visited.insert(cur) {
            return Err(Error::InvalidTopology(format!(
                "downstream chain from basin {} revisits basin {}",
                subbasins[idx].basin, subbasins[cur].basin
            )));
        }
        let sub = &subbasins[cur];
        if sub.ds_node_id >= 0 && layer.classify(sub.ds_node_id) == DsNodeKind::Inlet {
            return Ok(true);
        }
        if sub.ds_basin < 0 {
            return Ok(false);
        }
        match by_basin.get(&sub.ds_basin) {
            Some(&next) => cur = next,
            None => return Ok(false),
        }
    }
}

/// Merge basin polygons along drainage into the watershed layer.
///
/// Merge candidates are tree roots and subbasins whose downstream node is an
/// outlet or reservoir; candidates upstream of an inlet are skipped. Every
/// emitted feature carries the merged polygon plus cross references to the
/// neighboring merged watersheds, resolved after all merges.
pub fn merge_basins_by_drainage(
    subbasins: &[Subbasin],
    polygons: &HashMap<i32, MultiPolygon<f64>>,
    outlets: Option<&OutletLayer>,
) -> Result<FeatureCollection> {
    let mut candidates: Vec<usize> = Vec::new();
    for (i, sub) in subbasins.iter().enumerate() {
        let marked = sub.ds_node_id >= 0
            && match outlets {
                None => true,
                Some(layer) => matches!(
                    layer.classify(sub.ds_node_id),
                    DsNodeKind::Outlet | DsNodeKind::Reservoir
                ),
            };
        if !(sub.ds_basin < 0 || marked) {
            continue;
        }
        if upstream_of_inlet(subbasins, outlets, i)? {
            continue;
        }
        candidates.push(i);
    }

    // First pass: build and merge every candidate tree.
    struct Watershed {
        id: i32,
        root: usize,
        members: Vec<usize>,
        polygon: Polygon<f64>,
        reservoir: bool,
    }
    let mut watersheds: Vec<Watershed> = Vec::new();
    for &root in &candidates {
        let Some(tree) = build_drainage_tree(subbasins, outlets, root) else {
            continue;
        };
        let members = tree.values();
        let Some(polygon) = merge_drainage_tree(&tree, subbasins, polygons) else {
            warn!(
                basin = subbasins[root].basin,
                "no polygon produced for watershed; skipping"
            );
            continue;
        };
        let reservoir = subbasins[root].ds_node_id >= 0
            && outlets
                .map(|l| l.classify(subbasins[root].ds_node_id) == DsNodeKind::Reservoir)
                .unwrap_or(false);
        watersheds.push(Watershed {
            id: watersheds.len() as i32 + 1,
            root,
            members,
            polygon,
            reservoir,
        });
    }

    // Second pass: resolve cross references between merged watersheds.
    let mut owner: HashMap<i32, i32> = HashMap::new();
    for ws in &watersheds {
        for &m in &ws.members {
            owner.insert(subbasins[m].basin, ws.id);
        }
    }
    let ds_ws: Vec<i32> = watersheds
        .iter()
        .map(|ws| {
            let ds_basin = subbasins[ws.root].ds_basin;
            if ds_basin < 0 {
                -1
            } else {
                owner.get(&ds_basin).copied().unwrap_or(-1)
            }
        })
        .collect();
    let mut us_ws: Vec<[i32; 2]> = vec![[-1, -1]; watersheds.len()];
    for (i, ws) in watersheds.iter().enumerate() {
        if ds_ws[i] < 0 {
            continue;
        }
        let target = (ds_ws[i] - 1) as usize;
        let slots = &mut us_ws[target];
        if slots[0] < 0 {
            slots[0] = ws.id;
        } else if slots[1] < 0 {
            slots[1] = ws.id;
        } else {
            warn!(
                watershed = ds_ws[i],
                "more than two upstream watersheds; extra references dropped"
            );
        }
    }

    let mut fc = FeatureCollection::new();
    fc.add_field("MWShapeID", FieldKind::Int);
    fc.add_field("LinkIDs", FieldKind::String);
    fc.add_field("OutletID", FieldKind::Int);
    fc.add_field("DSWSID", FieldKind::Int);
    fc.add_field("USWSID1", FieldKind::Int);
    fc.add_field("USWSID2", FieldKind::Int);
    fc.add_field("Reservoir", FieldKind::Int);

    for (i, ws) in watersheds.into_iter().enumerate() {
        let link_ids = ws
            .members
            .iter()
            .map(|&m| (subbasins[m].link + 1).to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut f = Feature::new(geo_types::Geometry::Polygon(ws.polygon));
        f.set_property("MWShapeID", AttributeValue::Int(ws.id as i64));
        f.set_property("LinkIDs", AttributeValue::String(link_ids));
        f.set_property(
            "OutletID",
            AttributeValue::Int(subbasins[ws.root].ds_node_id as i64),
        );
        f.set_property("DSWSID", AttributeValue::Int(ds_ws[i] as i64));
        f.set_property("USWSID1", AttributeValue::Int(us_ws[i][0] as i64));
        f.set_property("USWSID2", AttributeValue::Int(us_ws[i][1] as i64));
        f.set_property(
            "Reservoir",
            AttributeValue::Int(if ws.reservoir { 1 } else { 0 }),
        );
        fc.push(f);
    }

    Ok(fc)
}
