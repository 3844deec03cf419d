//! Vector feature model
//!
//! Features carry a `geo-types` geometry plus an attribute row. A
//! `FeatureCollection` additionally carries an ordered field schema so that
//! attribute lookup by name is resolved once, at open time, instead of being
//! re-scanned per feature.

use crate::error::{Error, Result};
use geo_types::Geometry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Attribute value types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Null,
    Int(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    /// Interpret the value as an integer, if possible
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            AttributeValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Interpret the value as a float, if possible
    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(v) => Some(*v as f64),
            AttributeValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// Declared type of an attribute field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Int,
    Float,
    String,
}

/// An attribute field declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A geographic feature with geometry and attributes
#[derive(Debug, Clone)]
pub struct Feature {
    /// Feature geometry
    pub geometry: Option<Geometry<f64>>,
    /// Feature attributes
    pub properties: HashMap<String, AttributeValue>,
}

impl Feature {
    /// Create a new feature with geometry
    pub fn new(geometry: Geometry<f64>) -> Self {
        Self {
            geometry: Some(geometry),
            properties: HashMap::new(),
        }
    }

    /// Create a feature with no geometry
    pub fn empty() -> Self {
        Self {
            geometry: None,
            properties: HashMap::new(),
        }
    }

    /// Set an attribute
    pub fn set_property(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.properties.insert(key.into(), value);
    }

    /// Get an attribute
    pub fn get_property(&self, key: &str) -> Option<&AttributeValue> {
        self.properties.get(key)
    }
}

/// Collection of features with an ordered field schema
#[derive(Debug, Clone, Default)]
pub struct FeatureCollection {
    pub fields: Vec<FieldDef>,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an attribute field. Declaration order is preserved in output.
    pub fn add_field(&mut self, name: impl Into<String>, kind: FieldKind) {
        self.fields.push(FieldDef::new(name, kind));
    }

    /// Resolve a field name to its schema index.
    pub fn field_index(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| Error::FieldNotFound {
                field: name.to_string(),
            })
    }

    /// Whether a field with this name is declared
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }
}

impl IntoIterator for FeatureCollection {
    type Item = Feature;
    type IntoIter = std::vec::IntoIter<Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::Point;

    #[test]
    fn test_field_schema_lookup() {
        let mut fc = FeatureCollection::new();
        fc.add_field("LINKNO", FieldKind::Int);
        fc.add_field("Slope", FieldKind::Float);

        assert_eq!(fc.field_index("LINKNO").unwrap(), 0);
        assert_eq!(fc.field_index("Slope").unwrap(), 1);
        assert!(matches!(
            fc.field_index("WSNO"),
            Err(Error::FieldNotFound { .. })
        ));
    }

    #[test]
    fn test_feature_attributes() {
        let mut f = Feature::new(Geometry::Point(Point::new(1.0, 2.0)));
        f.set_property("ID", AttributeValue::Int(7));
        assert_eq!(f.get_property("ID").and_then(|v| v.as_int()), Some(7));
        assert_eq!(f.get_property("ID").and_then(|v| v.as_float()), Some(7.0));
        assert!(f.get_property("missing").is_none());
    }
}
