//! Read PostgreSQL rows into a [`RowSet`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use geozero::wkb::Wkb;
use geozero::ToGeo;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row, TypeInfo, ValueRef};
use uuid::Uuid;

use features_common::{FeaturesError, FeaturesResult};

use crate::sql::BindValue;
use crate::value::{utc_fixed, RowSet, Value};

pub fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[BindValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            BindValue::Int(v) => query.bind(*v),
            BindValue::Float(v) => query.bind(*v),
            BindValue::Text(v) => query.bind(v.clone()),
            BindValue::Timestamp(v) => query.bind(*v),
            BindValue::Uuid(v) => query.bind(*v),
        };
    }
    query
}

/// Convert rows by the column types reported by the server.
pub fn to_row_set(rows: &[PgRow]) -> FeaturesResult<RowSet> {
    let columns: Vec<String> = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let mut result = Vec::with_capacity(rows.len());
    for row in rows {
        let mut values = Vec::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            values.push(read_value(row, index, column)?);
        }
        result.push(values);
    }

    Ok(RowSet {
        columns,
        rows: result,
        non_strict_numerics: false,
    })
}

fn read_value(row: &PgRow, index: usize, column: &str) -> FeaturesResult<Value> {
    let raw = row.try_get_raw(index).map_err(|e| decode_error(column, e))?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();
    let get_err = |e| decode_error(column, e);

    let value = match type_name.as_str() {
        "INT2" => Value::Int(i64::from(row.try_get::<i16, _>(index).map_err(get_err)?)),
        "INT4" => Value::Int(i64::from(row.try_get::<i32, _>(index).map_err(get_err)?)),
        "INT8" => Value::Int(row.try_get::<i64, _>(index).map_err(get_err)?),
        "FLOAT4" => Value::Float(f64::from(row.try_get::<f32, _>(index).map_err(get_err)?)),
        "FLOAT8" => Value::Float(row.try_get::<f64, _>(index).map_err(get_err)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => Value::Text(row.try_get::<String, _>(index).map_err(get_err)?),
        "BOOL" => Value::Bool(row.try_get::<bool, _>(index).map_err(get_err)?),
        "BYTEA" => Value::Bytes(row.try_get::<Vec<u8>, _>(index).map_err(get_err)?),
        "UUID" => Value::Text(row.try_get::<Uuid, _>(index).map_err(get_err)?.to_string()),
        "DATE" => {
            let date: NaiveDate = row.try_get(index).map_err(get_err)?;
            Value::Timestamp(utc_fixed(date.and_time(chrono::NaiveTime::MIN)))
        }
        "TIMESTAMP" => {
            let ts: NaiveDateTime = row.try_get(index).map_err(get_err)?;
            Value::Timestamp(utc_fixed(ts))
        }
        "TIMESTAMPTZ" => {
            let ts: DateTime<Utc> = row.try_get(index).map_err(get_err)?;
            Value::Timestamp(ts.fixed_offset())
        }
        other => Value::Unsupported(other.to_string()),
    };
    Ok(value)
}

fn decode_error(column: &str, e: sqlx::Error) -> FeaturesError {
    FeaturesError::MappingError(format!("failed to read column '{}': {}", column, e))
}

/// Decode the WKB produced by `st_asbinary`.
pub fn decode_wkb(data: &[u8]) -> FeaturesResult<Option<geo_types::Geometry<f64>>> {
    if data.is_empty() {
        return Ok(None);
    }
    Wkb(data.to_vec())
        .to_geo()
        .map(Some)
        .map_err(|e| FeaturesError::GeometryDecode(e.to_string()))
}
