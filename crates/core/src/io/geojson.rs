//! GeoJSON reading/writing for vector feature collections
//!
//! Writing supports the geometry types the delineation pipeline emits
//! (Point, LineString, Polygon, MultiPolygon). Reading is limited to point
//! collections, which is all the pipeline consumes (outlet layers).

use crate::error::{Error, Result};
use crate::vector::{AttributeValue, Feature, FeatureCollection, FieldKind};
use geo_types::{Geometry, LineString, Point, Polygon};
use serde_json::{json, Map, Value};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

fn ring_coords(ring: &LineString<f64>) -> Value {
    Value::Array(
        ring.0
            .iter()
            .map(|c| json!([c.x, c.y]))
            .collect(),
    )
}

fn polygon_rings(poly: &Polygon<f64>) -> Value {
    let mut rings = vec![ring_coords(poly.exterior())];
    rings.extend(poly.interiors().iter().map(ring_coords));
    Value::Array(rings)
}

fn geometry_to_json(geom: &Geometry<f64>) -> Result<Value> {
    let v = match geom {
        Geometry::Point(p) => json!({
            "type": "Point",
            "coordinates": [p.x(), p.y()],
        }),
        Geometry::LineString(ls) => json!({
            "type": "LineString",
            "coordinates": ring_coords(ls),
        }),
        Geometry::Polygon(poly) => json!({
            "type": "Polygon",
            "coordinates": polygon_rings(poly),
        }),
        Geometry::MultiPolygon(mp) => json!({
            "type": "MultiPolygon",
            "coordinates": Value::Array(mp.0.iter().map(polygon_rings).collect()),
        }),
        other => {
            return Err(Error::UnsupportedDataType(format!(
                "GeoJSON output not supported for {:?}",
                other
            )))
        }
    };
    Ok(v)
}

fn attribute_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Null => Value::Null,
        AttributeValue::Int(v) => json!(v),
        AttributeValue::Float(v) => json!(v),
        AttributeValue::String(v) => json!(v),
    }
}

/// Write a feature collection to a GeoJSON file.
///
/// Properties follow the collection's declared field order; undeclared
/// attributes are not written.
pub fn write_geojson<P: AsRef<Path>>(fc: &FeatureCollection, path: P) -> Result<()> {
    let mut features = Vec::with_capacity(fc.len());

    for feature in fc.iter() {
        let geometry = match &feature.geometry {
            Some(g) => geometry_to_json(g)?,
            None => Value::Null,
        };

        let mut properties = Map::new();
        for field in &fc.fields {
            let value = feature
                .get_property(&field.name)
                .map(attribute_to_json)
                .unwrap_or(Value::Null);
            properties.insert(field.name.clone(), value);
        }

        features.push(json!({
            "type": "Feature",
            "geometry": geometry,
            "properties": Value::Object(properties),
        }));
    }

    let doc = json!({
        "type": "FeatureCollection",
        "features": Value::Array(features),
    });

    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer(&mut writer, &doc).map_err(|e| Error::Other(e.to_string()))?;
    writer.flush()?;
    Ok(())
}

fn json_to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                AttributeValue::Int(i)
            } else {
                AttributeValue::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => AttributeValue::String(s.clone()),
        Value::Bool(b) => AttributeValue::Int(*b as i64),
        _ => AttributeValue::Null,
    }
}

/// Read a GeoJSON file of point features.
///
/// The field schema is inferred from the first feature's properties; types
/// seen later that disagree are still stored per-feature, the schema only
/// drives name resolution and output ordering.
pub fn read_geojson_points<P: AsRef<Path>>(path: P) -> Result<FeatureCollection> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::InputMissing(path.to_path_buf()));
    }

    let reader = BufReader::new(File::open(path)?);
    let doc: Value =
        serde_json::from_reader(reader).map_err(|e| Error::Other(e.to_string()))?;

    let features = doc
        .get("features")
        .and_then(|f| f.as_array())
        .ok_or_else(|| Error::Other("GeoJSON document has no features array".to_string()))?;

    let mut fc = FeatureCollection::new();

    for raw in features {
        let geometry = raw.get("geometry").unwrap_or(&Value::Null);
        let gtype = geometry.get("type").and_then(|t| t.as_str()).unwrap_or("");
        if gtype != "Point" {
            return Err(Error::UnsupportedDataType(format!(
                "Expected Point features, got {}",
                gtype
            )));
        }

        let coords = geometry
            .get("coordinates")
            .and_then(|c| c.as_array())
            .ok_or_else(|| Error::Other("Point feature without coordinates".to_string()))?;
        if coords.len() < 2 {
            return Err(Error::Other("Point coordinates must have x and y".to_string()));
        }
        let x = coords[0].as_f64().unwrap_or(f64::NAN);
        let y = coords[1].as_f64().unwrap_or(f64::NAN);

        let mut feature = Feature::new(Geometry::Point(Point::new(x, y)));

        if let Some(props) = raw.get("properties").and_then(|p| p.as_object()) {
            for (name, value) in props {
                let attr = json_to_attribute(value);
                if fc.features.is_empty() && !fc.has_field(name) {
                    let kind = match &attr {
                        AttributeValue::Int(_) => FieldKind::Int,
                        AttributeValue::Float(_) => FieldKind::Float,
                        _ => FieldKind::String,
                    };
                    fc.add_field(name.clone(), kind);
                }
                feature.set_property(name.clone(), attr);
            }
        }

        fc.push(feature);
    }

    Ok(fc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::FieldKind;

    #[test]
    fn test_geojson_roundtrip_points() {
        let dir = std::env::temp_dir().join("riverine_geojson_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("outlets.geojson");

        let mut fc = FeatureCollection::new();
        fc.add_field("ID", FieldKind::Int);
        fc.add_field("INLET", FieldKind::Int);

        let mut f = Feature::new(Geometry::Point(Point::new(12.5, 47.25)));
        f.set_property("ID", AttributeValue::Int(3));
        f.set_property("INLET", AttributeValue::Int(1));
        fc.push(f);

        write_geojson(&fc, &path).unwrap();
        let read = read_geojson_points(&path).unwrap();

        assert_eq!(read.len(), 1);
        let feature = &read.features[0];
        assert_eq!(feature.get_property("ID").and_then(|v| v.as_int()), Some(3));
        assert_eq!(
            feature.get_property("INLET").and_then(|v| v.as_int()),
            Some(1)
        );
        match feature.geometry.as_ref().unwrap() {
            Geometry::Point(p) => {
                assert!((p.x() - 12.5).abs() < 1e-12);
                assert!((p.y() - 47.25).abs() < 1e-12);
            }
            other => panic!("expected point, got {:?}", other),
        }
    }

    #[test]
    fn test_read_missing_file() {
        let err = read_geojson_points("/nonexistent/outlets.geojson").unwrap_err();
        assert!(matches!(err, Error::InputMissing(_)));
    }
}
