//! Read SQLite rows into a [`RowSet`].

use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::query::Query;
use sqlx::{Column, Row, Sqlite, TypeInfo, ValueRef};

use features_common::{FeaturesError, FeaturesResult, Schema};

use crate::sql::BindValue;
use crate::value::{parse_text_timestamp, RowSet, Value};

/// Bind positional values, timestamps as text the way GeoPackages store them.
pub fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[BindValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            BindValue::Int(v) => query.bind(*v),
            BindValue::Float(v) => query.bind(*v),
            BindValue::Text(v) => query.bind(v.clone()),
            BindValue::Timestamp(v) => query.bind(BindValue::timestamp_as_text(v)),
            BindValue::Uuid(v) => query.bind(v.to_string()),
        };
    }
    query
}

/// Convert rows using the runtime storage class of each value. SQLite
/// doesn't enforce column types, so the declared type from the schema is
/// only used to recognize booleans and timestamps.
pub fn to_row_set(rows: &[SqliteRow], schema: &Schema) -> FeaturesResult<RowSet> {
    let columns: Vec<String> = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let mut result = Vec::with_capacity(rows.len());
    for row in rows {
        let mut values = Vec::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            let declared = schema.field(column).map(|f| f.r#type.to_lowercase());
            values.push(read_value(row, index, column, declared.as_deref())?);
        }
        result.push(values);
    }

    Ok(RowSet {
        columns,
        rows: result,
        non_strict_numerics: true,
    })
}

fn read_value(row: &SqliteRow, index: usize, column: &str, declared: Option<&str>) -> FeaturesResult<Value> {
    let raw = row.try_get_raw(index).map_err(|e| decode_error(column, e))?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage_class = raw.type_info().name().to_string();

    let value = match storage_class.as_str() {
        "INTEGER" => {
            let v: i64 = row.try_get_unchecked(index).map_err(|e| decode_error(column, e))?;
            match declared {
                Some("boolean") | Some("bool") => Value::Bool(v != 0),
                _ => Value::Int(v),
            }
        }
        "REAL" => Value::Float(row.try_get_unchecked(index).map_err(|e| decode_error(column, e))?),
        "TEXT" => {
            let v: String = row.try_get_unchecked(index).map_err(|e| decode_error(column, e))?;
            match declared {
                Some("date") | Some("datetime") | Some("timestamp") => {
                    parse_text_timestamp(&v).map(Value::Timestamp).unwrap_or(Value::Text(v))
                }
                _ => Value::Text(v),
            }
        }
        "BLOB" => Value::Bytes(row.try_get_unchecked(index).map_err(|e| decode_error(column, e))?),
        other => Value::Unsupported(other.to_string()),
    };
    Ok(value)
}

fn decode_error(column: &str, e: sqlx::Error) -> FeaturesError {
    FeaturesError::MappingError(format!("failed to read column '{}': {}", column, e))
}
