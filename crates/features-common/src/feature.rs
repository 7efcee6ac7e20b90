//! GeoJSON features with links and (optionally ordered) properties.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate};
use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Value of a single feature property.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Date without time component, serialized as `YYYY-MM-DD`.
    Date(NaiveDate),
    /// Full timestamp, serialized as RFC 3339.
    Timestamp(DateTime<FixedOffset>),
    /// Multiple relation values.
    List(Vec<String>),
}

impl PropertyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    /// String form used when splitting relation values.
    pub fn as_plain_string(&self) -> String {
        match self {
            PropertyValue::Null => String::new(),
            PropertyValue::Bool(v) => v.to_string(),
            PropertyValue::Int(v) => v.to_string(),
            PropertyValue::Float(v) => v.to_string(),
            PropertyValue::Text(v) => v.clone(),
            PropertyValue::Date(v) => v.to_string(),
            PropertyValue::Timestamp(v) => v.to_rfc3339(),
            PropertyValue::List(v) => v.join(","),
        }
    }
}

/// Properties of a feature, either unordered (keys reported alphabetically)
/// or in insertion order as configured per collection.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureProperties {
    Unordered(BTreeMap<String, PropertyValue>),
    Ordered(IndexMap<String, PropertyValue>),
}

impl Default for FeatureProperties {
    fn default() -> Self {
        FeatureProperties::Unordered(BTreeMap::new())
    }
}

impl FeatureProperties {
    pub fn new(ordered: bool) -> Self {
        if ordered {
            FeatureProperties::Ordered(IndexMap::new())
        } else {
            FeatureProperties::Unordered(BTreeMap::new())
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: PropertyValue) {
        match self {
            FeatureProperties::Unordered(map) => {
                map.insert(key.into(), value);
            }
            FeatureProperties::Ordered(map) => {
                map.insert(key.into(), value);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        match self {
            FeatureProperties::Unordered(map) => map.get(key),
            FeatureProperties::Ordered(map) => map.get(key),
        }
    }

    pub fn delete(&mut self, key: &str) {
        match self {
            FeatureProperties::Unordered(map) => {
                map.remove(key);
            }
            FeatureProperties::Ordered(map) => {
                map.shift_remove(key);
            }
        }
    }

    /// Set a relation and, for ordered properties, place it before the first
    /// key starting with `existing_key_prefix` (like "building.href" before "building_fid").
    pub fn set_relation(&mut self, key: impl Into<String>, value: PropertyValue, existing_key_prefix: &str) {
        let key = key.into();
        self.set(key.clone(), value);

        if let FeatureProperties::Ordered(map) = self {
            let Some(from) = map.get_index_of(&key) else {
                return;
            };
            let target = map
                .keys()
                .position(|k| *k != key && k.starts_with(existing_key_prefix));
            if let Some(to) = target {
                if to < from {
                    map.move_index(from, to);
                }
            }
        }
    }

    pub fn keys(&self) -> Vec<String> {
        match self {
            FeatureProperties::Unordered(map) => map.keys().cloned().collect(),
            FeatureProperties::Ordered(map) => map.keys().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FeatureProperties::Unordered(map) => map.len(),
            FeatureProperties::Ordered(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Serialize for FeatureProperties {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FeatureProperties::Unordered(map) => map.serialize(serializer),
            FeatureProperties::Ordered(map) => map.serialize(serializer),
        }
    }
}

/// Link according to RFC 8288.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Link {
    pub rel: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub r#type: String,
    pub href: String,
}

/// A GeoJSON Feature. The id is required: numeric fid or external UUID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feature {
    pub id: String,
    pub geometry: Option<geojson::Geometry>,
    pub properties: FeatureProperties,
    pub links: Vec<Link>,
}

impl Feature {
    pub fn new(ordered_properties: bool) -> Self {
        Self {
            properties: FeatureProperties::new(ordered_properties),
            ..Default::default()
        }
    }

    /// Set the geometry, rounding coordinates to `max_decimals` when given.
    pub fn set_geom(&mut self, geom: Option<geo_types::Geometry<f64>>, max_decimals: Option<u32>) {
        self.geometry = geom.map(|geom| {
            let mut value = geojson::Value::from(&geom);
            if let Some(decimals) = max_decimals {
                round_value(&mut value, decimals);
            }
            geojson::Geometry::new(value)
        });
    }
}

impl Serialize for Feature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.links.is_empty() { 4 } else { 5 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("type", "Feature")?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("geometry", &self.geometry)?;
        map.serialize_entry("properties", &self.properties)?;
        if !self.links.is_empty() {
            map.serialize_entry("links", &self.links)?;
        }
        map.end()
    }
}

/// A GeoJSON FeatureCollection with links.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCollection {
    pub timestamp: Option<String>,
    pub links: Vec<Link>,
    pub features: Vec<Feature>,
    pub number_returned: usize,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            number_returned: features.len(),
            features,
            ..Default::default()
        }
    }
}

impl Serialize for FeatureCollection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", "FeatureCollection")?;
        if let Some(timestamp) = &self.timestamp {
            map.serialize_entry("timeStamp", timestamp)?;
        }
        if !self.links.is_empty() {
            map.serialize_entry("links", &self.links)?;
        }
        map.serialize_entry("features", &self.features)?;
        map.serialize_entry("numberReturned", &self.number_returned)?;
        map.end()
    }
}

fn round_value(value: &mut geojson::Value, decimals: u32) {
    let factor = 10_f64.powi(decimals as i32);
    let round = |position: &mut Vec<f64>| {
        for c in position.iter_mut() {
            *c = (*c * factor).round() / factor;
        }
    };

    match value {
        geojson::Value::Point(p) => round(p),
        geojson::Value::MultiPoint(points) | geojson::Value::LineString(points) => {
            points.iter_mut().for_each(round)
        }
        geojson::Value::MultiLineString(lines) | geojson::Value::Polygon(lines) => lines
            .iter_mut()
            .flat_map(|line| line.iter_mut())
            .for_each(round),
        geojson::Value::MultiPolygon(polygons) => polygons
            .iter_mut()
            .flat_map(|polygon| polygon.iter_mut())
            .flat_map(|ring| ring.iter_mut())
            .for_each(round),
        geojson::Value::GeometryCollection(geometries) => {
            for geometry in geometries.iter_mut() {
                round_value(&mut geometry.value, decimals);
            }
        }
    }
}
