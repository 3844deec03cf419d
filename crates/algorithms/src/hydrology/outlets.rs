//! Outlet point layers and control-point classification
//!
//! An outlets layer is a point feature collection describing hydrologic
//! control points: watershed outlets, inlets, reservoirs and point sources.
//! Field names are resolved once when the layer is opened; the id field is
//! `MWShapeID` or, failing that, `ID`, and the boolean-like integer flags
//! `INLET`, `RES` and `PTSOURCE` are each optional.

use crate::hydrology::network::StreamNetwork;
use riverine_core::vector::FeatureCollection;
use riverine_core::{Error, GeoTransform, Result};
use std::collections::HashMap;

/// Classification of a hydrologic control point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsNodeKind {
    Outlet,
    Inlet,
    Reservoir,
    PointSource,
}

/// An opened outlets layer with resolved fields
#[derive(Debug, Clone, Default)]
pub struct OutletLayer {
    /// (x, y, node id) per point, in feature order
    points: Vec<(f64, f64, i32)>,
    kinds: HashMap<i32, DsNodeKind>,
}

impl OutletLayer {
    /// Open an outlets layer from a point feature collection.
    ///
    /// Fails with `FieldNotFound` when neither `MWShapeID` nor `ID` is
    /// declared. Points without geometry or without an id value are skipped.
    pub fn from_features(fc: &FeatureCollection) -> Result<Self> {
        let id_field = if fc.has_field("MWShapeID") {
            "MWShapeID"
        } else if fc.has_field("ID") {
            "ID"
        } else {
            return Err(Error::FieldNotFound {
                field: "MWShapeID or ID".to_string(),
            });
        };

        let mut layer = OutletLayer::default();

        for feature in fc.iter() {
            let Some(id) = feature.get_property(id_field).and_then(|v| v.as_int()) else {
                continue;
            };
            let id = id as i32;

            let flag = |name: &str| {
                feature
                    .get_property(name)
                    .and_then(|v| v.as_int())
                    .unwrap_or(0)
                    != 0
            };
            let kind = if flag("INLET") {
                DsNodeKind::Inlet
            } else if flag("RES") {
                DsNodeKind::Reservoir
            } else if flag("PTSOURCE") {
                DsNodeKind::PointSource
            } else {
                DsNodeKind::Outlet
            };
            layer.kinds.insert(id, kind);

            if let Some(geo_types::Geometry::Point(p)) = &feature.geometry {
                layer.points.push((p.x(), p.y(), id));
            }
        }

        Ok(layer)
    }

    /// Classify a node id. Unknown ids are plain outlets.
    pub fn classify(&self, id: i32) -> DsNodeKind {
        self.kinds.get(&id).copied().unwrap_or(DsNodeKind::Outlet)
    }

    /// Number of points carried by the layer
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Snap every point onto a grid cell and stamp its id onto the link
    /// whose downstream node sits at that cell. Points outside the grid are
    /// ignored.
    pub fn assign_node_ids(
        &self,
        network: &mut StreamNetwork,
        transform: &GeoTransform,
    ) {
        let (rows, cols) = network.shape;
        let mut by_cell: HashMap<(usize, usize), i32> = HashMap::new();
        for &(x, y, id) in &self.points {
            if let Some(cell) = transform.geo_to_cell(x, y, rows, cols) {
                by_cell.insert(cell, id);
            }
        }

        for link in &mut network.links {
            if let Some(&id) = by_cell.get(&link.end_cell) {
                link.ds_node_id = id;
            }
        }
    }
}
