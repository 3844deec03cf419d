//! End-to-end delineation on a synthetic grid: two tributaries converge,
//! every hillslope cell drains to the channel, and the merged watershed
//! covers the whole grid.

use riverine_algorithms::prelude::*;
use riverine_core::GeoTransform;

/// 5x5 grid: tributaries down columns 1 and 3 converge at (2, 2), the main
/// stem continues south, and every other cell drains sideways into the
/// nearest channel.
fn synthetic_basin() -> (Raster<u8>, Raster<f64>, Raster<f64>) {
    let rows = 5;
    let cols = 5;
    #[rustfmt::skip]
    let dirs: Vec<u8> = vec![
        1, 7, 5, 7, 5,
        1, 8, 5, 6, 5,
        1, 1, 7, 5, 5,
        1, 1, 7, 5, 5,
        1, 1, 7, 5, 5,
    ];
    let mut areas = vec![0.1f64; rows * cols];
    areas[1] = 1.0; // tributary heads
    areas[3] = 1.0;
    areas[6] = 1.5;
    areas[8] = 1.5;
    areas[12] = 4.0; // junction and main stem
    areas[17] = 5.0;
    areas[22] = 6.0;

    let transform = GeoTransform::new(0.0, rows as f64, 1.0, -1.0);
    let mut fd = Raster::from_vec(dirs, rows, cols).unwrap();
    fd.set_transform(transform);
    let mut ar = Raster::from_vec(areas, rows, cols).unwrap();
    ar.set_transform(transform);

    let mut dem = Raster::new(rows, cols);
    dem.set_transform(transform);
    for row in 0..rows {
        for col in 0..cols {
            dem.set(row, col, (rows - row) as f64 * 10.0).unwrap();
        }
    }
    (fd, ar, dem)
}

#[test]
fn test_full_pipeline_single_watershed() {
    let (fd, ar, dem) = synthetic_basin();

    let mut network = build_network(
        &fd,
        &ar,
        NetworkParams {
            threshold: 1.0,
            max_starts: None,
        },
    )
    .unwrap();
    assert_eq!(network.links.len(), 3);
    assert_eq!(network.roots().count(), 1);

    build_profile(&mut network, &dem).unwrap();

    let result = delineate_subbasins(&network, &fd, SubbasinParams::default()).unwrap();
    assert_eq!(result.subbasins.len(), 3);
    assert_eq!(result.reaches.len(), 3);

    // Every cell drains to the channel, so every cell is labeled
    for row in 0..5 {
        for col in 0..5 {
            assert_ne!(result.raster.get(row, col).unwrap(), 0);
        }
    }

    let polygons = region_polygons(&result.raster);
    assert_eq!(polygons.len(), 3);

    let merged = merge_basins_by_drainage(&result.subbasins, &polygons, None).unwrap();
    assert_eq!(merged.len(), 1);

    let ws = &merged.features[0];
    assert_eq!(ws.get_property("MWShapeID").and_then(|v| v.as_int()), Some(1));
    assert_eq!(ws.get_property("DSWSID").and_then(|v| v.as_int()), Some(-1));
    assert_eq!(ws.get_property("Reservoir").and_then(|v| v.as_int()), Some(0));

    // All three links belong to the single merged watershed
    let link_ids = match ws.get_property("LinkIDs") {
        Some(AttributeValue::String(s)) => s.clone(),
        other => panic!("expected LinkIDs string, got {:?}", other),
    };
    let mut ids: Vec<&str> = link_ids.split(',').collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["1", "2", "3"]);

    // The merged polygon covers the whole grid, clockwise-positive
    match ws.geometry.as_ref().unwrap() {
        geo_types::Geometry::Polygon(poly) => {
            let area = signed_area_cw(poly);
            assert!(area > 0.0);
            assert!((area - 25.0).abs() < 1e-9);
        }
        other => panic!("expected polygon, got {:?}", other),
    }
}

#[test]
fn test_pipeline_with_inlet_excludes_upstream() {
    let (fd, ar, dem) = synthetic_basin();

    let mut network = build_network(
        &fd,
        &ar,
        NetworkParams {
            threshold: 1.0,
            max_starts: None,
        },
    )
    .unwrap();
    build_profile(&mut network, &dem).unwrap();

    // Inlet point at the junction cell (2, 2): both tributaries end there
    let mut points = FeatureCollection::new();
    points.add_field("MWShapeID", FieldKind::Int);
    points.add_field("INLET", FieldKind::Int);
    let mut f = Feature::new(geo_types::Geometry::Point(geo_types::Point::new(2.5, 2.5)));
    f.set_property("MWShapeID", AttributeValue::Int(9));
    f.set_property("INLET", AttributeValue::Int(1));
    points.push(f);
    let outlets = OutletLayer::from_features(&points).unwrap();
    outlets.assign_node_ids(&mut network, fd.transform());

    let result = delineate_subbasins(&network, &fd, SubbasinParams::default()).unwrap();
    let polygons = region_polygons(&result.raster);
    let merged = merge_basins_by_drainage(&result.subbasins, &polygons, Some(&outlets)).unwrap();

    // Only the main stem survives: the tributaries sit upstream of the inlet
    assert_eq!(merged.len(), 1);
    let ws = &merged.features[0];
    assert_eq!(
        ws.get_property("LinkIDs"),
        Some(&AttributeValue::String("1".to_string()))
    );
}
