//! State and helpers shared by all datasource backends.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use features_common::{BoundingBox, FeaturesError, FeaturesResult, Schema};

use crate::config::{CollectionConfig, FeaturePropertiesConfig, SqlSettings};
use crate::criteria::{PropertyFilterWithAllowedValues, PropertyFiltersWithAllowedValues};
use crate::datasource::DatasourceOptions;
use crate::mapper::FormatOpts;
use crate::sql::CompiledQuery;
use crate::sqllog::SqlLog;

/// Metadata of a table holding features.
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    pub table_name: String,
    pub geometry_column_name: String,
    pub geometry_type: String,
    pub srs_id: Option<i64>,
    /// Extent as registered in the catalog, if any.
    pub bbox: Option<BoundingBox>,
    pub schema: Arc<Schema>,
}

/// Settings and per-collection metadata common to every backend.
#[derive(Debug, Clone)]
pub struct DatasourceCommon {
    pub transform_on_the_fly: bool,
    pub query_timeout: Duration,
    pub fid_column: String,
    pub external_fid_column: String,
    pub max_decimals: Option<u32>,
    pub force_utc: bool,
    pub sql_log: SqlLog,

    /// Collection id to feature table.
    pub tables: HashMap<String, Arc<FeatureTable>>,
    /// Collection id to its property filters.
    pub property_filters: HashMap<String, PropertyFiltersWithAllowedValues>,
    /// Collection id to configured properties.
    pub properties: HashMap<String, FeaturePropertiesConfig>,
}

impl DatasourceCommon {
    pub fn new(settings: &SqlSettings, transform_on_the_fly: bool, options: &DatasourceOptions) -> Self {
        Self {
            transform_on_the_fly,
            query_timeout: settings.query_timeout(),
            fid_column: settings.fid.clone(),
            external_fid_column: settings.external_fid_column().to_string(),
            max_decimals: options.max_decimals,
            force_utc: options.force_utc,
            sql_log: options.sql_log,
            tables: HashMap::new(),
            property_filters: HashMap::new(),
            properties: HashMap::new(),
        }
    }

    pub fn feature_table(&self, collection: &str) -> FeaturesResult<&Arc<FeatureTable>> {
        self.tables.get(collection).ok_or_else(|| {
            let mut available: Vec<String> = self.tables.keys().cloned().collect();
            available.sort();
            FeaturesError::CollectionNotFound {
                collection: collection.to_string(),
                available,
            }
        })
    }

    pub fn property_filters(&self, collection: &str) -> FeaturesResult<PropertyFiltersWithAllowedValues> {
        self.feature_table(collection)?;
        Ok(self.property_filters.get(collection).cloned().unwrap_or_default())
    }

    pub fn property_config(&self, collection: &str) -> Option<&FeaturePropertiesConfig> {
        self.properties.get(collection)
    }

    pub fn format_opts(&self) -> FormatOpts {
        FormatOpts {
            max_decimals: self.max_decimals,
            force_utc: self.force_utc,
        }
    }

    pub fn uses_external_fid(&self) -> bool {
        !self.external_fid_column.is_empty()
    }

    /// Run a query future, giving up after the configured timeout.
    pub async fn with_timeout<F, T>(&self, fut: F) -> FeaturesResult<T>
    where
        F: Future<Output = FeaturesResult<T>>,
    {
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(FeaturesError::Timeout),
        }
    }

    pub fn log_query(&self, query: &CompiledQuery, started: Instant) {
        self.sql_log.after(&query.sql, &query.params, started.elapsed());
    }
}

/// Wrap a failed query. A database error with `cancelled_code` means the
/// backend aborted the statement at its deadline.
pub fn query_error(query: &CompiledQuery, e: sqlx::Error, cancelled_code: &str) -> FeaturesError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(cancelled_code) {
            return FeaturesError::Timeout;
        }
    }
    FeaturesError::query(&query.sql, &query.params, e)
}

/// How the wanted columns must match the columns of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMatch {
    Exact,
    /// Index starts with the columns, in order.
    Prefix,
    /// Index contains the columns somewhere.
    Contains,
}

impl IndexMatch {
    pub fn matches(self, indexed_columns: &str, columns: &str) -> bool {
        indexed_columns == columns
            || match self {
                IndexMatch::Exact => false,
                IndexMatch::Prefix => indexed_columns.starts_with(columns),
                IndexMatch::Contains => indexed_columns.contains(columns),
            }
    }
}

/// Warn when a table backs more than one collection.
pub fn validate_uniqueness(tables: &HashMap<String, Arc<FeatureTable>>) {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    let mut ids: Vec<&String> = tables.keys().collect();
    ids.sort();
    for id in ids {
        let name = tables[id].table_name.as_str();
        if let Some(other) = seen.insert(name, id) {
            warn!(
                table = name,
                collections = ?[other, id.as_str()],
                "table is configured for more than one collection, \
                 when intended consider making the collection ids equal"
            );
        }
    }
}

/// Combine configured filters and their allowed values.
pub fn with_static_allowed_values(collection: &CollectionConfig) -> PropertyFiltersWithAllowedValues {
    collection
        .filters
        .properties
        .iter()
        .map(|pf| {
            (
                pf.name.clone(),
                PropertyFilterWithAllowedValues {
                    filter: pf.clone(),
                    allowed_values: pf.allowed_values.clone(),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FiltersConfig, PropertyFilter};

    fn collection(id: &str, table: Option<&str>) -> CollectionConfig {
        CollectionConfig {
            id: id.to_string(),
            table_name: table.map(String::from),
            filters: FiltersConfig::default(),
            temporal_properties: None,
            feature_properties: None,
        }
    }

    fn common() -> DatasourceCommon {
        let mut common = DatasourceCommon::new(&SqlSettings::default(), false, &DatasourceOptions::default());
        common.tables.insert(
            "addresses".to_string(),
            Arc::new(FeatureTable {
                table_name: "addresses".to_string(),
                ..Default::default()
            }),
        );
        common
    }

    #[test]
    fn test_index_match() {
        let indexed = "fid,minx,maxx,miny,maxy,valid_from,valid_to";
        assert!(IndexMatch::Prefix.matches(indexed, "fid,minx,maxx,miny,maxy"));
        assert!(!IndexMatch::Prefix.matches(indexed, "minx,maxx"));
        assert!(IndexMatch::Contains.matches(indexed, "valid_from"));
        assert!(!IndexMatch::Exact.matches(indexed, "fid"));
        assert!(IndexMatch::Exact.matches("fid", "fid"));
    }

    #[test]
    fn test_unknown_collection_lists_available() {
        let err = common().feature_table("roads").unwrap_err();
        match err {
            FeaturesError::CollectionNotFound { collection, available } => {
                assert_eq!(collection, "roads");
                assert_eq!(available, vec!["addresses".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_static_allowed_values() {
        let mut coll = collection("addresses", None);
        coll.filters.properties.push(PropertyFilter {
            name: "city".to_string(),
            description: None,
            index_required: true,
            allowed_values: Some(vec!["Delft".to_string()]),
            derive_allowed_values_from_datasource: false,
        });
        let filters = with_static_allowed_values(&coll);
        assert_eq!(filters["city"].allowed_values, Some(vec!["Delft".to_string()]));
    }

    #[tokio::test]
    async fn test_timeout_maps_to_error() {
        let mut common = common();
        common.query_timeout = Duration::from_millis(10);
        let result: FeaturesResult<()> = common
            .with_timeout(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(FeaturesError::Timeout)));
    }
}
