//! Profiles (OGC API Features Part 5) for representing feature references.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::FeaturesError;
use crate::feature::PropertyValue;
use crate::schema::{feature_relation_name, Schema};

/// How a reference to another feature is represented in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProfileName {
    /// The feature id of the referenced feature.
    #[default]
    #[serde(rename = "rel-as-key")]
    RelAsKey,
    /// An HTTP(S) URI to the referenced feature.
    #[serde(rename = "rel-as-uri")]
    RelAsUri,
    /// An object with an `href` member.
    #[serde(rename = "rel-as-link")]
    RelAsLink,
}

impl ProfileName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileName::RelAsKey => "rel-as-key",
            ProfileName::RelAsUri => "rel-as-uri",
            ProfileName::RelAsLink => "rel-as-link",
        }
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileName {
    type Err = FeaturesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rel-as-key" => Ok(ProfileName::RelAsKey),
            "rel-as-uri" => Ok(ProfileName::RelAsUri),
            "rel-as-link" => Ok(ProfileName::RelAsLink),
            other => Err(FeaturesError::InvalidParameter {
                param: "profile".to_string(),
                message: format!("unsupported profile '{}'", other),
            }),
        }
    }
}

/// A relation column after applying a profile.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRelation {
    /// Property name to set, e.g. "building.href".
    pub name: String,
    /// Relation name without profile specific suffix, e.g. "building".
    pub name_without_profile: String,
    pub value: PropertyValue,
}

/// Profile bound to the base URL of the service and the schema of a collection.
#[derive(Debug, Clone)]
pub struct Profile {
    name: ProfileName,
    base_url: String,
    schema: Arc<Schema>,
}

impl Profile {
    pub fn new(name: ProfileName, base_url: impl Into<String>, schema: Arc<Schema>) -> Self {
        Self {
            name,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            schema,
        }
    }

    pub fn name(&self) -> ProfileName {
        self.name
    }

    /// Rename and reshape a relation column according to this profile.
    pub fn map_relation(&self, column_name: &str, value: &PropertyValue, external_fid_column: &str) -> MappedRelation {
        let relation_name = feature_relation_name(column_name, external_fid_column);
        let (name, format_as_url) = match self.name {
            ProfileName::RelAsLink => (format!("{}.href", relation_name), true),
            ProfileName::RelAsKey => (relation_name.clone(), false),
            ProfileName::RelAsUri => (relation_name.clone(), true),
        };
        let value = self.map_relation_value(value, format_as_url, &relation_name);

        MappedRelation {
            name,
            name_without_profile: relation_name,
            value,
        }
    }

    fn map_relation_value(&self, value: &PropertyValue, format_as_url: bool, relation_name: &str) -> PropertyValue {
        if value.is_null() {
            return PropertyValue::Null;
        }
        let Some(relation) = self.schema.find_feature_relation(relation_name) else {
            warn!(relation = relation_name, "relation not found in schema");
            return PropertyValue::Null;
        };

        let raw = value.as_plain_string();
        let mut result: Vec<String> = raw
            .split(',')
            .map(|v| {
                if format_as_url {
                    format!("{}/collections/{}/items/{}", self.base_url, relation.collection_id, v)
                } else {
                    v.to_string()
                }
            })
            .collect();

        if result.len() == 1 && !relation.is_array {
            PropertyValue::Text(result.remove(0))
        } else {
            PropertyValue::List(result)
        }
    }
}
