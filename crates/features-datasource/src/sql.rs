//! Named parameters and common SQL fragments.
//!
//! Queries are written with `:name` placeholders. Before execution they are
//! compiled to the positional placeholders of the backend, so user input only
//! ever travels as bound parameters.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexSet;
use uuid::Uuid;

use features_common::{AxisOrder, FeaturesError, FeaturesResult, NEXT_FID, PREV_FID};

use crate::common::FeatureTable;
use crate::config::FeaturePropertiesConfig;
use crate::criteria::TemporalCriteria;

/// Value of a named parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    /// Expanded to one placeholder per element, for `in (...)` clauses.
    IntList(Vec<i64>),
}

/// Single value bound to a positional placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
}

impl BindValue {
    /// Timestamp as stored in GeoPackage text columns.
    pub fn timestamp_as_text(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// Parameters by name, e.g. `fid`, `limit`, `pf1`.
pub type NamedParams = BTreeMap<String, SqlParam>;

/// Positional placeholder syntax of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `?1`, `?2`, ... (SQLite)
    Question,
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
}

impl Placeholder {
    fn render(self, index: usize) -> String {
        match self {
            Placeholder::Question => format!("?{}", index),
            Placeholder::Dollar => format!("${}", index),
        }
    }
}

/// SQL ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<BindValue>,
}

/// Replace `:name` placeholders by positional ones.
///
/// Repeated names share one position. Quoted strings and identifiers are
/// left alone, as are `::type` casts.
pub fn compile_named(sql: &str, params: &NamedParams, placeholder: Placeholder) -> FeaturesResult<CompiledQuery> {
    let mut out = String::with_capacity(sql.len());
    let mut binds: Vec<BindValue> = Vec::new();
    let mut assigned: HashMap<&str, String> = HashMap::new();

    let bytes = sql.as_bytes();
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => {
                quote = Some(b);
                i += 1;
            }
            b':' if bytes.get(i + 1) == Some(&b':') => {
                i += 2;
            }
            b':' if bytes.get(i + 1).is_some_and(|c| c.is_ascii_alphabetic() || *c == b'_') => {
                let name_start = i + 1;
                let mut name_end = name_start;
                while name_end < bytes.len() && (bytes[name_end].is_ascii_alphanumeric() || bytes[name_end] == b'_') {
                    name_end += 1;
                }
                let name = &sql[name_start..name_end];

                out.push_str(&sql[start..i]);
                if let Some(rendered) = assigned.get(name) {
                    out.push_str(rendered);
                } else {
                    let value = params.get(name).ok_or_else(|| {
                        FeaturesError::MappingError(format!("missing value for named parameter '{}'", name))
                    })?;
                    let rendered = render_param(value, placeholder, &mut binds);
                    out.push_str(&rendered);
                    assigned.insert(name, rendered);
                }

                start = name_end;
                i = name_end;
            }
            _ => i += 1,
        }
    }
    out.push_str(&sql[start..]);

    Ok(CompiledQuery { sql: out, params: binds })
}

fn render_param(value: &SqlParam, placeholder: Placeholder, binds: &mut Vec<BindValue>) -> String {
    let mut push = |bind: BindValue| {
        binds.push(bind);
        placeholder.render(binds.len())
    };
    match value {
        SqlParam::Int(v) => push(BindValue::Int(*v)),
        SqlParam::Float(v) => push(BindValue::Float(*v)),
        SqlParam::Text(v) => push(BindValue::Text(v.clone())),
        SqlParam::Timestamp(v) => push(BindValue::Timestamp(*v)),
        SqlParam::Uuid(v) => push(BindValue::Uuid(*v)),
        // `in (null)` matches nothing
        SqlParam::IntList(list) if list.is_empty() => "null".to_string(),
        SqlParam::IntList(list) => list
            .iter()
            .map(|v| push(BindValue::Int(*v)))
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// Quote and join column names: `"a", "b"`.
pub fn columns_to_sql<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|c| format!("\"{}\"", c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the select clause: configured properties first, then the
/// remaining schema fields (unless excluded), the fid, optionally the
/// prev/next fid, and last the geometry as rendered by the backend.
pub fn select_columns(
    table: &FeatureTable,
    fid_column: &str,
    axis_order: AxisOrder,
    select_geom: &dyn Fn(AxisOrder, &FeatureTable) -> String,
    prop_config: Option<&FeaturePropertiesConfig>,
    include_prev_next: bool,
) -> String {
    let mut columns: IndexSet<&str> = IndexSet::new();
    let geom = table.geometry_column_name.as_str();

    if let Some(config) = prop_config {
        for prop in &config.properties {
            if prop != geom {
                columns.insert(prop);
            }
        }
        if !config.properties_exclude_unknown {
            for field in &table.schema.fields {
                if field.name != geom {
                    columns.insert(&field.name);
                }
            }
        }
    } else {
        for field in &table.schema.fields {
            if field.name != geom {
                columns.insert(&field.name);
            }
        }
    }

    columns.insert(fid_column);
    if include_prev_next {
        columns.insert(PREV_FID);
        columns.insert(NEXT_FID);
    }

    let columns: Vec<&str> = columns.into_iter().collect();
    let mut result = columns_to_sql(&columns);
    result.push_str(&select_geom(axis_order, table));
    result
}

/// Equality clause per property filter, values as `pf1..pfN` params.
///
/// `cast` renders an optional cast suffix for the placeholder, given the column name.
/// No LIKE support since wildcard searches can't use the index.
pub fn property_filters_to_sql(
    property_filters: &BTreeMap<String, String>,
    cast: &dyn Fn(&str) -> String,
) -> (String, NamedParams) {
    let mut sql = String::new();
    let mut params = NamedParams::new();
    for (position, (column, value)) in property_filters.iter().enumerate() {
        let name = format!("pf{}", position + 1);
        // column in double quotes in case it's a reserved keyword
        sql.push_str(&format!(" and \"{}\" = :{}{}", column, name, cast(column)));
        params.insert(name, SqlParam::Text(value.clone()));
    }
    (sql, params)
}

/// Features valid at the reference date: started on or before it and not yet ended.
pub fn temporal_criteria_to_sql(temporal: Option<&TemporalCriteria>, cast: &str) -> (String, NamedParams) {
    let mut params = NamedParams::new();
    let Some(temporal) = temporal else {
        return (String::new(), params);
    };
    params.insert(
        "referenceDate".to_string(),
        SqlParam::Timestamp(temporal.reference_date),
    );
    let sql = format!(
        " and \"{start}\" <= :referenceDate{cast} and (\"{end}\" >= :referenceDate{cast} or \"{end}\" is null)",
        start = temporal.start_date_property,
        end = temporal.end_date_property,
        cast = cast
    );
    (sql, params)
}
