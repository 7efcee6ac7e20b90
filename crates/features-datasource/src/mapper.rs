//! Maps generic result rows to features.

use chrono::{DateTime, FixedOffset, Timelike, Utc};

use features_common::schema::is_feature_relation;
use features_common::{
    Feature, FeaturesError, FeaturesResult, PrevNextFid, Profile, PropertyValue, Schema, MAXX_FIELD, MAXY_FIELD,
    MINX_FIELD, MINY_FIELD, NEXT_FID, PREV_FID,
};

use crate::config::FeaturePropertiesConfig;
use crate::value::{RowSet, Value};

/// Decodes backend-native geometry bytes.
pub type MapGeom = fn(&[u8]) -> FeaturesResult<Option<geo_types::Geometry<f64>>>;

/// Output formatting of mapped values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatOpts {
    pub max_decimals: Option<u32>,
    pub force_utc: bool,
}

/// Everything needed to map the rows of one collection.
pub struct MapOptions<'a> {
    pub fid_column: &'a str,
    pub external_fid_column: &'a str,
    pub geom_column: &'a str,
    pub prop_config: Option<&'a FeaturePropertiesConfig>,
    pub schema: &'a Schema,
    pub map_geom: MapGeom,
    pub profile: &'a Profile,
    pub format: FormatOpts,
}

/// Map rows to features, including the prev/next fid of the page when present.
pub fn map_rows_to_features(
    rows: &RowSet,
    opts: &MapOptions<'_>,
) -> FeaturesResult<(Vec<Feature>, Option<PrevNextFid>)> {
    let ordered = opts.prop_config.is_some_and(|c| c.properties_in_specific_order);
    let mut features = Vec::with_capacity(rows.rows.len());
    let mut prev_next: Option<PrevNextFid> = None;

    for (row_index, row) in rows.rows.iter().enumerate() {
        let mut feature = Feature::new(ordered);
        let first_row = row_index == 0;
        let row_prev_next = map_columns_to_feature(first_row, &mut feature, &rows.columns, row, rows.non_strict_numerics, opts)?;
        if first_row {
            prev_next = row_prev_next;
        }
        features.push(feature);
    }
    Ok((features, prev_next))
}

/// Map rows of (fid, prevfid, nextfid) to feature ids.
pub fn map_rows_to_feature_ids(rows: &RowSet) -> FeaturesResult<(Vec<i64>, Option<PrevNextFid>)> {
    let mut ids = Vec::with_capacity(rows.rows.len());
    let mut prev_next = None;

    for (row_index, row) in rows.rows.iter().enumerate() {
        if row.len() != 3 {
            return Err(FeaturesError::MappingError(format!(
                "expected 3 columns (fid, prevfid, nextfid), got {}",
                row.len()
            )));
        }
        ids.push(to_fid(&row[0], "fid")?);
        if row_index == 0 {
            prev_next = Some(PrevNextFid {
                prev: to_fid(&row[1], PREV_FID)?,
                next: to_fid(&row[2], NEXT_FID)?,
            });
        }
    }
    Ok((ids, prev_next))
}

fn map_columns_to_feature(
    first_row: bool,
    feature: &mut Feature,
    columns: &[String],
    values: &[Value],
    non_strict_numerics: bool,
    opts: &MapOptions<'_>,
) -> FeaturesResult<Option<PrevNextFid>> {
    let mut prev_next = PrevNextFid::default();
    let mut has_prev_next = false;

    for (column, value) in columns.iter().zip(values) {
        let column = column.as_str();
        if column == opts.fid_column {
            feature.id = value.to_id_string();
        } else if column == opts.geom_column {
            map_geometry(feature, column, value, opts)?;
        } else if matches!(column, MINX_FIELD | MINY_FIELD | MAXX_FIELD | MAXY_FIELD) {
            // only there for the spatial index
        } else if column == PREV_FID {
            if first_row {
                prev_next.prev = to_fid(value, column)?;
                has_prev_next = true;
            }
        } else if column == NEXT_FID {
            if first_row {
                prev_next.next = to_fid(value, column)?;
                has_prev_next = true;
            }
        } else {
            let property = map_value(column, value, non_strict_numerics, opts)?;
            feature.properties.set(column, property);
        }
    }

    map_external_fid(columns, values, feature, opts);
    Ok(has_prev_next.then_some(prev_next))
}

fn map_geometry(feature: &mut Feature, column: &str, value: &Value, opts: &MapOptions<'_>) -> FeaturesResult<()> {
    match value {
        Value::Null => {
            feature.properties.set(column, PropertyValue::Null);
            Ok(())
        }
        Value::Bytes(bytes) => {
            let geom = (opts.map_geom)(bytes).map_err(|e| match e {
                FeaturesError::GeometryDecode(msg) => FeaturesError::GeometryDecode(msg),
                other => FeaturesError::GeometryDecode(other.to_string()),
            })?;
            feature.set_geom(geom, opts.format.max_decimals);
            Ok(())
        }
        other => Err(FeaturesError::GeometryDecode(format!(
            "failed to read geometry column '{}' as bytes, got {:?}",
            column, other
        ))),
    }
}

fn map_value(column: &str, value: &Value, non_strict_numerics: bool, opts: &MapOptions<'_>) -> FeaturesResult<PropertyValue> {
    Ok(match value {
        Value::Null => PropertyValue::Null,
        Value::Bytes(bytes) => PropertyValue::Text(String::from_utf8(bytes.clone()).map_err(|e| {
            FeaturesError::MappingError(format!("column '{}' holds bytes that aren't valid UTF-8: {}", column, e))
        })?),
        Value::Int(v) => PropertyValue::Int(*v),
        Value::Float(v) => map_float(*v, non_strict_numerics),
        Value::Text(v) => PropertyValue::Text(v.clone()),
        Value::Bool(v) => PropertyValue::Bool(*v),
        Value::Timestamp(ts) => map_timestamp(column, *ts, opts),
        Value::Unsupported(type_name) => {
            return Err(FeaturesError::UnexpectedType {
                column: column.to_string(),
                type_name: type_name.clone(),
            })
        }
    })
}

/// Whole floats become integers, but only for storage without strict
/// column types where an integer may have been stored as a real. A genuine
/// float that happens to be whole is misclassified as well.
fn map_float(v: f64, non_strict_numerics: bool) -> PropertyValue {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if non_strict_numerics && v.is_finite() && v.fract() == 0.0 && v.abs() <= MAX_EXACT {
        PropertyValue::Int(v as i64)
    } else {
        PropertyValue::Float(v)
    }
}

fn map_timestamp(column: &str, ts: DateTime<FixedOffset>, opts: &MapOptions<'_>) -> PropertyValue {
    let ts = if opts.format.force_utc {
        ts.with_timezone(&Utc).fixed_offset()
    } else {
        ts
    };
    // a value stored in a date column can still carry a time
    let midnight = ts.hour() == 0 && ts.minute() == 0 && ts.second() == 0 && ts.nanosecond() == 0;
    if opts.schema.is_date(column) && midnight {
        PropertyValue::Date(ts.date_naive())
    } else {
        PropertyValue::Timestamp(ts)
    }
}

fn map_external_fid(columns: &[String], values: &[Value], feature: &mut Feature, opts: &MapOptions<'_>) {
    if opts.external_fid_column.is_empty() {
        return;
    }
    for (column, value) in columns.iter().zip(values) {
        let column = column.as_str();
        if column == opts.external_fid_column {
            // replace feature id with the external one
            feature.id = value.to_id_string();
            feature.properties.delete(column);
        } else if is_feature_relation(column, opts.external_fid_column) {
            let current = feature.properties.get(column).cloned().unwrap_or(PropertyValue::Null);
            let relation = opts.profile.map_relation(column, &current, opts.external_fid_column);
            feature.properties.delete(column);
            if !relation.name.is_empty() {
                let prefix = relation.name_without_profile.clone();
                feature.properties.set_relation(relation.name, relation.value, &prefix);
            }
        }
    }
}

fn to_fid(value: &Value, column: &str) -> FeaturesResult<i64> {
    match value {
        Value::Null => Ok(0),
        Value::Int(v) => Ok(*v),
        Value::Float(v) if v.fract() == 0.0 => Ok(*v as i64),
        other => Err(FeaturesError::UnexpectedType {
            column: column.to_string(),
            type_name: format!("{:?}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::TimeZone;
    use features_common::{FeatureRelation, Field, ProfileName};

    fn decode_point(bytes: &[u8]) -> FeaturesResult<Option<geo_types::Geometry<f64>>> {
        if bytes.len() != 2 {
            return Err(FeaturesError::GeometryDecode("bad point".to_string()));
        }
        Ok(Some(geo_types::Geometry::Point(geo_types::Point::new(
            bytes[0] as f64,
            bytes[1] as f64,
        ))))
    }

    fn schema() -> Schema {
        let field = |name: &str, t: &str| Field {
            name: name.to_string(),
            r#type: t.to_string(),
            ..Default::default()
        };
        let mut building = field("building_external_fid", "TEXT");
        building.feature_relation = Some(FeatureRelation {
            name: "building".to_string(),
            collection_id: "buildings".to_string(),
            is_array: false,
        });
        Schema {
            fields: vec![
                field("name", "TEXT"),
                field("valid_from", "DATE"),
                field("updated", "DATETIME"),
                field("count", "INTEGER"),
                building,
            ],
        }
    }

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn with_opts<T>(profile_name: ProfileName, f: impl FnOnce(&MapOptions<'_>) -> T) -> T {
        let schema = schema();
        let profile = Profile::new(profile_name, "https://example.com/api/", Arc::new(schema.clone()));
        let opts = MapOptions {
            fid_column: "fid",
            external_fid_column: "external_fid",
            geom_column: "geom",
            prop_config: None,
            schema: &schema,
            map_geom: decode_point,
            profile: &profile,
            format: FormatOpts::default(),
        };
        f(&opts)
    }

    fn page_rows() -> RowSet {
        RowSet {
            columns: columns(&["name", "minx", "fid", "prevfid", "nextfid", "geom"]),
            rows: vec![
                vec![
                    Value::Text("a".into()),
                    Value::Float(1.0),
                    Value::Int(1),
                    Value::Null,
                    Value::Int(3),
                    Value::Bytes(vec![1, 2]),
                ],
                vec![
                    Value::Text("b".into()),
                    Value::Float(1.0),
                    Value::Int(2),
                    Value::Int(99),
                    Value::Int(99),
                    Value::Null,
                ],
            ],
            non_strict_numerics: false,
        }
    }

    #[test]
    fn test_map_page_with_prev_next_from_first_row() {
        let (features, prev_next) = with_opts(ProfileName::RelAsKey, |opts| map_rows_to_features(&page_rows(), opts)).unwrap();

        assert_eq!(features.len(), 2);
        assert_eq!(features[0].id, "1");
        assert_eq!(prev_next, Some(PrevNextFid { prev: 0, next: 3 }));
        assert!(features[0].geometry.is_some());
        assert!(features[0].properties.get("minx").is_none());
        assert!(features[0].properties.get("prevfid").is_none());
    }

    #[test]
    fn test_null_geometry_is_null_property() {
        let (features, _) = with_opts(ProfileName::RelAsKey, |opts| map_rows_to_features(&page_rows(), opts)).unwrap();
        assert!(features[1].geometry.is_none());
        assert_eq!(features[1].properties.get("geom"), Some(&PropertyValue::Null));
    }

    #[test]
    fn test_mapping_is_idempotent() {
        let rows = page_rows();
        let first = with_opts(ProfileName::RelAsKey, |opts| map_rows_to_features(&rows, opts)).unwrap();
        let second = with_opts(ProfileName::RelAsKey, |opts| map_rows_to_features(&rows, opts)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_malformed_geometry_fails() {
        let rows = RowSet {
            columns: columns(&["fid", "geom"]),
            rows: vec![vec![Value::Int(1), Value::Bytes(vec![1, 2, 3])]],
            non_strict_numerics: false,
        };
        let result = with_opts(ProfileName::RelAsKey, |opts| map_rows_to_features(&rows, opts));
        assert!(matches!(result, Err(FeaturesError::GeometryDecode(_))));
    }

    #[test]
    fn test_unsupported_type_fails() {
        let rows = RowSet {
            columns: columns(&["fid", "name"]),
            rows: vec![vec![Value::Int(1), Value::Unsupported("INTERVAL".to_string())]],
            non_strict_numerics: false,
        };
        let result = with_opts(ProfileName::RelAsKey, |opts| map_rows_to_features(&rows, opts));
        assert!(matches!(result, Err(FeaturesError::UnexpectedType { .. })));
    }

    #[test]
    fn test_bytes_become_text() {
        let rows = RowSet {
            columns: columns(&["fid", "name"]),
            rows: vec![vec![Value::Int(1), Value::Bytes(b"Delft".to_vec())]],
            non_strict_numerics: false,
        };
        let (features, prev_next) = with_opts(ProfileName::RelAsKey, |opts| map_rows_to_features(&rows, opts)).unwrap();
        assert_eq!(features[0].properties.get("name"), Some(&PropertyValue::Text("Delft".into())));
        assert!(prev_next.is_none());
    }

    #[test]
    fn test_invalid_utf8_bytes_fail() {
        let rows = RowSet {
            columns: columns(&["fid", "name"]),
            rows: vec![vec![Value::Int(1), Value::Bytes(vec![0x44, 0xff, 0xfe])]],
            non_strict_numerics: false,
        };
        let result = with_opts(ProfileName::RelAsKey, |opts| map_rows_to_features(&rows, opts));
        assert!(matches!(result, Err(FeaturesError::MappingError(msg)) if msg.contains("'name'")));
    }

    // Known fidelity risk: a genuine whole float from non strict storage is
    // reported as an integer.
    #[test]
    fn test_whole_float_to_int_only_for_non_strict_storage() {
        let mut rows = RowSet {
            columns: columns(&["fid", "count"]),
            rows: vec![vec![Value::Int(1), Value::Float(3.0)], vec![Value::Int(2), Value::Float(3.5)]],
            non_strict_numerics: true,
        };
        let (features, _) = with_opts(ProfileName::RelAsKey, |opts| map_rows_to_features(&rows, opts)).unwrap();
        assert_eq!(features[0].properties.get("count"), Some(&PropertyValue::Int(3)));
        assert_eq!(features[1].properties.get("count"), Some(&PropertyValue::Float(3.5)));

        rows.non_strict_numerics = false;
        let (features, _) = with_opts(ProfileName::RelAsKey, |opts| map_rows_to_features(&rows, opts)).unwrap();
        assert_eq!(features[0].properties.get("count"), Some(&PropertyValue::Float(3.0)));
    }

    #[test]
    fn test_date_only_when_declared_and_midnight() {
        let midnight = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap().fixed_offset();
        let afternoon = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap().fixed_offset();
        let rows = RowSet {
            columns: columns(&["fid", "valid_from", "updated"]),
            rows: vec![
                vec![Value::Int(1), Value::Timestamp(midnight), Value::Timestamp(midnight)],
                vec![Value::Int(2), Value::Timestamp(afternoon), Value::Timestamp(afternoon)],
            ],
            non_strict_numerics: false,
        };
        let (features, _) = with_opts(ProfileName::RelAsKey, |opts| map_rows_to_features(&rows, opts)).unwrap();
        assert_eq!(
            features[0].properties.get("valid_from"),
            Some(&PropertyValue::Date(midnight.date_naive()))
        );
        assert_eq!(features[0].properties.get("updated"), Some(&PropertyValue::Timestamp(midnight)));
        assert_eq!(features[1].properties.get("valid_from"), Some(&PropertyValue::Timestamp(afternoon)));
    }

    #[test]
    fn test_force_utc() {
        let local = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .unwrap();
        let rows = RowSet {
            columns: columns(&["fid", "updated"]),
            rows: vec![vec![Value::Int(1), Value::Timestamp(local)]],
            non_strict_numerics: false,
        };
        let schema = schema();
        let profile = Profile::new(ProfileName::RelAsKey, "", Arc::new(schema.clone()));
        let opts = MapOptions {
            fid_column: "fid",
            external_fid_column: "",
            geom_column: "geom",
            prop_config: None,
            schema: &schema,
            map_geom: decode_point,
            profile: &profile,
            format: FormatOpts {
                max_decimals: None,
                force_utc: true,
            },
        };
        let (features, _) = map_rows_to_features(&rows, &opts).unwrap();
        match features[0].properties.get("updated") {
            Some(PropertyValue::Timestamp(ts)) => {
                assert_eq!(ts.offset().local_minus_utc(), 0);
                assert_eq!(ts.hour(), 10);
            }
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_external_fid_and_relations() {
        let rows = RowSet {
            columns: columns(&["fid", "name", "external_fid", "building_external_fid"]),
            rows: vec![vec![
                Value::Int(1),
                Value::Text("a".into()),
                Value::Text("a3f2e5c4-0000-0000-0000-000000000001".into()),
                Value::Text("b7c1d2e3-0000-0000-0000-000000000002".into()),
            ]],
            non_strict_numerics: false,
        };

        let (features, _) = with_opts(ProfileName::RelAsLink, |opts| map_rows_to_features(&rows, opts)).unwrap();
        let feature = &features[0];
        assert_eq!(feature.id, "a3f2e5c4-0000-0000-0000-000000000001");
        assert!(feature.properties.get("external_fid").is_none());
        assert!(feature.properties.get("building_external_fid").is_none());
        assert_eq!(
            feature.properties.get("building.href"),
            Some(&PropertyValue::Text(
                "https://example.com/api/collections/buildings/items/b7c1d2e3-0000-0000-0000-000000000002".into()
            ))
        );

        let (features, _) = with_opts(ProfileName::RelAsKey, |opts| map_rows_to_features(&rows, opts)).unwrap();
        assert_eq!(
            features[0].properties.get("building"),
            Some(&PropertyValue::Text("b7c1d2e3-0000-0000-0000-000000000002".into()))
        );
    }

    #[test]
    fn test_feature_ids() {
        let rows = RowSet {
            columns: columns(&["fid", "prevfid", "nextfid"]),
            rows: vec![
                vec![Value::Int(4), Value::Int(1), Value::Int(7)],
                vec![Value::Int(5), Value::Int(2), Value::Null],
            ],
            non_strict_numerics: false,
        };
        let (ids, prev_next) = map_rows_to_feature_ids(&rows).unwrap();
        assert_eq!(ids, vec![4, 5]);
        assert_eq!(prev_next, Some(PrevNextFid { prev: 1, next: 7 }));

        let wrong = RowSet {
            columns: columns(&["fid"]),
            rows: vec![vec![Value::Int(4)]],
            non_strict_numerics: false,
        };
        assert!(map_rows_to_feature_ids(&wrong).is_err());
    }
}
