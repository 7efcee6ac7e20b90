//! Backend-neutral row values.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// A single column value as read from a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<FixedOffset>),
    Bool(bool),
    /// A value of a type the mapper can't represent, by type name.
    Unsupported(String),
}

impl Value {
    /// String form used for feature ids.
    pub fn to_id_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Text(v) => v.clone(),
            Value::Bytes(v) => String::from_utf8_lossy(v).into_owned(),
            Value::Timestamp(v) => v.to_rfc3339(),
            Value::Bool(v) => v.to_string(),
            Value::Unsupported(t) => t.clone(),
        }
    }
}

/// Rows of a result set with their column names.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Storage doesn't enforce column types, so integers may come back as floats.
    pub non_strict_numerics: bool,
}

impl RowSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Parse the textual timestamps found in SQLite files.
pub fn parse_text_timestamp(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts);
    }
    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(utc_fixed(naive));
        }
    }
    if let Ok(date) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(date);
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(utc_fixed)
}

/// Interpret a naive timestamp as UTC.
pub fn utc_fixed(naive: NaiveDateTime) -> DateTime<FixedOffset> {
    Utc.from_utc_datetime(&naive).fixed_offset()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_text_timestamps() {
        let ts = parse_text_timestamp("2024-01-15T10:30:00Z").unwrap();
        assert_eq!(ts.hour(), 10);

        let ts = parse_text_timestamp("2024-01-15 10:30:00.123").unwrap();
        assert_eq!(ts.minute(), 30);

        let ts = parse_text_timestamp("2024-01-15").unwrap();
        assert_eq!(ts.hour(), 0);
        assert_eq!(ts.offset().local_minus_utc(), 0);

        let ts = parse_text_timestamp("2024-01-15T10:30:00+02:00").unwrap();
        assert_eq!(ts.offset().local_minus_utc(), 7200);

        assert!(parse_text_timestamp("not a date").is_none());
    }

    #[test]
    fn test_id_string() {
        assert_eq!(Value::Int(42).to_id_string(), "42");
        assert_eq!(Value::Bytes(b"abc".to_vec()).to_id_string(), "abc");
    }
}
