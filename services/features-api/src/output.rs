//! GeoJSON documents written to stdout.

use anyhow::Result;
use serde_json::{json, Value};

use features_common::{Cursors, Feature, FeatureCollection};

/// FeatureCollection with the cursors to the previous and next page.
pub fn features_document(fc: &FeatureCollection, cursors: &Cursors) -> Result<Value> {
    let mut document = serde_json::to_value(fc)?;
    if let Value::Object(map) = &mut document {
        let mut pagination = serde_json::Map::new();
        if cursors.has_prev {
            pagination.insert("prev".to_string(), json!(cursors.prev.as_str()));
        }
        if cursors.has_next {
            pagination.insert("next".to_string(), json!(cursors.next.as_str()));
        }
        map.insert("cursors".to_string(), Value::Object(pagination));
    }
    Ok(document)
}

pub fn feature_document(feature: &Feature) -> Result<Value> {
    Ok(serde_json::to_value(feature)?)
}
