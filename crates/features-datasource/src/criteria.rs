//! Per-request selection criteria handed to a datasource.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use features_common::{BoundingBox, DecodedCursor, FeaturesError, FeaturesResult, Srid};

use crate::config::PropertyFilter;

/// Criteria used to select a page of features.
#[derive(Debug, Clone, Default)]
pub struct FeaturesCriteria {
    /// Pagination anchor, already validated against the filters checksum.
    pub cursor: DecodedCursor,
    pub limit: i64,

    /// SRID of the bbox.
    pub input_srid: Srid,
    /// SRID of the output geometries.
    pub output_srid: Srid,
    pub bbox: Option<BoundingBox>,

    /// Only set when the collection has temporal properties and a datetime was requested.
    pub temporal_criteria: Option<TemporalCriteria>,

    /// Column name to value. Sorted, so SQL and params are deterministic.
    pub property_filters: BTreeMap<String, String>,

    /// CQL filter, not supported.
    pub filter: Option<String>,
}

impl FeaturesCriteria {
    /// Reject criteria this engine can't answer.
    pub fn validate(&self) -> FeaturesResult<()> {
        if self.filter.is_some() {
            return Err(FeaturesError::Unsupported(
                "CQL filters are not supported".to_string(),
            ));
        }
        if self.limit < 1 {
            return Err(FeaturesError::InvalidParameter {
                param: "limit".to_string(),
                message: format!("limit must be at least 1, got {}", self.limit),
            });
        }
        Ok(())
    }
}

/// Select features valid at a reference date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalCriteria {
    pub reference_date: DateTime<Utc>,
    pub start_date_property: String,
    pub end_date_property: String,
}

/// Identifier of a single feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureId {
    /// The auto-incrementing feature id.
    Fid(i64),
    /// The external, stable identifier.
    External(Uuid),
}

impl FromStr for FeatureId {
    type Err = FeaturesError;

    /// A UUID is an external id, anything else must be an integer fid.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if let Ok(uuid) = Uuid::parse_str(raw) {
            return Ok(FeatureId::External(uuid));
        }
        raw.parse::<i64>()
            .map(FeatureId::Fid)
            .map_err(|_| FeaturesError::InvalidParameter {
                param: "featureId".to_string(),
                message: "feature ID must be a UUID or number".to_string(),
            })
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureId::Fid(fid) => write!(f, "{}", fid),
            FeatureId::External(uuid) => write!(f, "{}", uuid),
        }
    }
}

/// A configured property filter with its allowed values, static or derived from the datasource.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyFilterWithAllowedValues {
    pub filter: PropertyFilter,
    pub allowed_values: Option<Vec<String>>,
}

/// Property filters of a collection by filter name.
pub type PropertyFiltersWithAllowedValues = BTreeMap<String, PropertyFilterWithAllowedValues>;
