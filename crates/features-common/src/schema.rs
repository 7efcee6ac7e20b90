//! Schema of a feature table as read from datasource catalogs.

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::error::{FeaturesError, FeaturesResult};

const REGEX_REMOVE_SEPARATORS: &str = "[^a-z0-9]?";

/// Ordered list of fields of a feature table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

/// A single column of a feature table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    /// Declared (datasource specific) type, e.g. `TEXT` or `timestamp with time zone`.
    pub r#type: String,
    pub description: String,
    pub is_required: bool,
    pub is_primary_geometry: bool,
    pub feature_relation: Option<FeatureRelation>,
}

/// JSON-Schema type and format of a field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TypeFormat {
    pub r#type: String,
    pub format: Option<String>,
}

impl TypeFormat {
    fn of(r#type: &str) -> Self {
        Self {
            r#type: r#type.to_string(),
            format: None,
        }
    }

    fn with_format(r#type: &str, format: impl Into<String>) -> Self {
        Self {
            r#type: r#type.to_string(),
            format: Some(format.into()),
        }
    }
}

impl Schema {
    /// Build a schema, dropping the fid and external fid columns since they
    /// identify a feature rather than being properties of it.
    pub fn new(fields: Vec<Field>, fid_column: &str, external_fid_column: &str) -> FeaturesResult<Self> {
        let primary_geometries = fields.iter().filter(|f| f.is_primary_geometry).count();
        if primary_geometries > 1 {
            return Err(FeaturesError::MetadataError(format!(
                "more than one primary geometry found, got {} fields marked as primary geometry",
                primary_geometries
            )));
        }

        let fields = fields
            .into_iter()
            .filter(|f| f.name != fid_column)
            .filter(|f| external_fid_column.is_empty() || f.name != external_fid_column)
            .collect();
        Ok(Self { fields })
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether the field is declared as a date (without time component).
    pub fn is_date(&self, name: &str) -> bool {
        self.field(name)
            .map(|f| f.r#type.eq_ignore_ascii_case("date"))
            .unwrap_or(false)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn primary_geometry(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.is_primary_geometry)
    }

    /// Lookup a relation by its derived name (e.g. 'building').
    pub fn find_feature_relation(&self, relation_name: &str) -> Option<&FeatureRelation> {
        self.fields
            .iter()
            .filter_map(|f| f.feature_relation.as_ref())
            .find(|rel| rel.name == relation_name)
    }
}

impl Field {
    /// JSON-Schema type and format for this field.
    pub fn to_json_schema_type_format(&self) -> TypeFormat {
        let lower = self.r#type.to_lowercase();
        match lower.as_str() {
            "boolean" | "bool" => TypeFormat::of("boolean"),
            "text" | "char" | "character" | "character varying" | "varchar" | "nvarchar"
            | "clob" => TypeFormat::of("string"),
            "int" | "integer" | "tinyint" | "smallint" | "mediumint" | "bigint" | "int2"
            | "int4" | "int8" => TypeFormat::of("integer"),
            "real" | "float" | "float4" => TypeFormat::with_format("number", "float"),
            "double" | "double precision" | "float8" | "numeric" | "decimal" => {
                TypeFormat::with_format("number", "double")
            }
            "uuid" => TypeFormat::with_format("string", "uuid"),
            "date" => TypeFormat::with_format("string", "date"),
            "time" => TypeFormat::with_format("string", "time"),
            "datetime" | "timestamp" | "timestamp with time zone"
            | "timestamp without time zone" => TypeFormat::with_format("string", "date-time"),
            "geometry" | "geometrycollection" => TypeFormat::with_format(&lower, "geometry-any"),
            "point" | "linestring" | "polygon" | "multipoint" | "multilinestring"
            | "multipolygon" => TypeFormat::with_format(&lower, format!("geometry-{}", lower)),
            _ if lower.starts_with("character varying") || lower.starts_with("varchar") => {
                TypeFormat::of("string")
            }
            _ => TypeFormat::of(&lower),
        }
    }
}

/// A reference from one feature to feature(s) in another collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeatureRelation {
    /// Name as shown in the output, e.g. 'building' for column 'building_external_fid'.
    pub name: String,
    /// Collection the relation points to.
    pub collection_id: String,
    /// True when the relation can point to multiple features.
    pub is_array: bool,
}

impl FeatureRelation {
    /// Derive a relation from a column name following the external fid naming convention.
    pub fn from_column(column_name: &str, external_fid_column: &str, collection_ids: &[String]) -> Option<Self> {
        if !is_feature_relation(column_name, external_fid_column) {
            return None;
        }
        let name = feature_relation_name(column_name, external_fid_column);
        let collection_id = find_referenced_collection(collection_ids, &name);
        Some(Self {
            name,
            collection_id,
            is_array: false,
        })
    }
}

/// A column is a relation when it contains the external fid column name
/// without being that column, e.g. 'building_external_fid'.
pub fn is_feature_relation(column_name: &str, external_fid_column: &str) -> bool {
    if external_fid_column.is_empty() || column_name == external_fid_column {
        return false;
    }
    column_name.contains(external_fid_column)
}

/// Strip the external fid (and a surrounding separator) from a column name:
/// 'building_external_fid' becomes 'building'.
pub fn feature_relation_name(column_name: &str, external_fid_column: &str) -> String {
    let pattern = format!(
        "{sep}{fid}{sep}",
        sep = REGEX_REMOVE_SEPARATORS,
        fid = regex::escape(external_fid_column)
    );
    match Regex::new(&pattern) {
        Ok(regex) => regex.replace_all(column_name, "").into_owned(),
        Err(_) => column_name.replace(external_fid_column, ""),
    }
}

/// Longest collection id wins, exact matches before prefix matches.
fn find_referenced_collection(collection_ids: &[String], name: &str) -> String {
    let mut sorted: Vec<&String> = collection_ids.iter().collect();
    sorted.sort_by(|a, b| b.len().cmp(&a.len()));

    if let Some(exact) = sorted.iter().find(|id| id.as_str() == name) {
        return exact.to_string();
    }
    if let Some(prefix) = sorted.iter().find(|id| name.starts_with(id.as_str())) {
        return prefix.to_string();
    }
    warn!(relation = name, "could not find collection for feature reference");
    String::new()
}
