//! Configuration of collections and their datasources.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use features_common::{FeaturesError, FeaturesResult, Srid};

/// Features configuration, usually loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturesConfig {
    /// Public base URL of the service, used for relation URIs.
    #[serde(default)]
    pub base_url: String,

    /// Round coordinates in the output to this many decimals.
    #[serde(default)]
    pub max_decimals: Option<u32>,

    /// Convert timestamps to UTC in the output.
    #[serde(default)]
    pub force_utc: bool,

    #[serde(default)]
    pub limit: LimitConfig,

    pub collections: Vec<CollectionConfig>,

    pub datasources: DatasourcesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitConfig {
    #[serde(default = "default_limit")]
    pub default: i64,
    #[serde(default = "default_max_limit")]
    pub max: i64,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            default: default_limit(),
            max: default_max_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionConfig {
    pub id: String,

    /// Table backing this collection when it differs from the collection id.
    #[serde(default)]
    pub table_name: Option<String>,

    #[serde(default)]
    pub filters: FiltersConfig,

    #[serde(default)]
    pub temporal_properties: Option<TemporalProperties>,

    #[serde(default)]
    pub feature_properties: Option<FeaturePropertiesConfig>,
}

impl CollectionConfig {
    pub fn has_table_name(&self, table: &str) -> bool {
        self.table_name.as_deref() == Some(table)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiltersConfig {
    #[serde(default)]
    pub properties: Vec<PropertyFilter>,
}

/// An equality filter on a feature property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyFilter {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Fail at startup when the column isn't indexed.
    #[serde(default = "default_true")]
    pub index_required: bool,

    #[serde(default)]
    pub allowed_values: Option<Vec<String>>,

    #[serde(default)]
    pub derive_allowed_values_from_datasource: bool,
}

/// Columns holding the validity period of a feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalProperties {
    pub start_date: String,
    pub end_date: String,
}

/// Which properties to output, and in which order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturePropertiesConfig {
    #[serde(default)]
    pub properties: Vec<String>,

    /// Only output the configured properties.
    #[serde(default)]
    pub properties_exclude_unknown: bool,

    /// Output properties in the configured order instead of alphabetically.
    #[serde(default)]
    pub properties_in_specific_order: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourcesConfig {
    #[serde(rename = "defaultWGS84")]
    pub default_wgs84: DatasourceConfig,

    #[serde(default)]
    pub additional: Vec<AdditionalDatasource>,
}

/// Datasource holding the same collections in another coordinate system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalDatasource {
    /// e.g. "EPSG:28992"
    pub srs: String,

    #[serde(flatten)]
    pub datasource: DatasourceConfig,
}

impl AdditionalDatasource {
    pub fn srid(&self) -> FeaturesResult<Srid> {
        Srid::from_epsg(&self.srs)
    }
}

/// Exactly one backend per datasource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceConfig {
    #[serde(default)]
    pub geopackage: Option<GeoPackageConfig>,

    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
}

/// Backend selected by a [`DatasourceConfig`].
#[derive(Debug, Clone)]
pub enum BackendConfig<'a> {
    GeoPackage(&'a GeoPackageConfig),
    Postgres(&'a PostgresConfig),
}

impl DatasourceConfig {
    pub fn backend(&self) -> FeaturesResult<BackendConfig<'_>> {
        match (&self.geopackage, &self.postgres) {
            (Some(gpkg), None) => Ok(BackendConfig::GeoPackage(gpkg)),
            (None, Some(pg)) => Ok(BackendConfig::Postgres(pg)),
            (Some(_), Some(_)) => Err(FeaturesError::ConfigError(
                "datasource must configure either 'geopackage' or 'postgres', not both".to_string(),
            )),
            (None, None) => Err(FeaturesError::ConfigError(
                "unknown datasource config encountered, expected 'geopackage' or 'postgres'".to_string(),
            )),
        }
    }
}

/// Settings shared by all SQL backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SqlSettings {
    /// Feature id column, must be an auto-incrementing integer.
    #[serde(default = "default_fid")]
    pub fid: String,

    /// Column with a stable (UUID) identifier exposed instead of the fid.
    #[serde(default)]
    pub external_fid: Option<String>,

    /// Query timeout in seconds.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout: u64,
}

impl SqlSettings {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    pub fn external_fid_column(&self) -> &str {
        self.external_fid.as_deref().unwrap_or("")
    }
}

impl Default for SqlSettings {
    fn default() -> Self {
        Self {
            fid: default_fid(),
            external_fid: None,
            query_timeout: default_query_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeoPackageConfig {
    /// Path to the GeoPackage on local disk.
    pub file: PathBuf,

    #[serde(flatten)]
    pub settings: SqlSettings,

    /// Below this number of candidates in a bbox the rtree index is used,
    /// otherwise the btree spatial index.
    #[serde(default = "default_max_bbox_size_to_use_with_rtree", rename = "maxBBoxSizeToUseWithRTree")]
    pub max_bbox_size_to_use_with_rtree: i64,

    /// SQLite `cache_size` pragma.
    #[serde(default = "default_in_memory_cache_size")]
    pub in_memory_cache_size: i64,

    /// Traverse the spatial index once at startup.
    #[serde(default)]
    pub warm_up: bool,

    /// Load the SpatiaLite extension, required for bbox queries.
    #[serde(default = "default_true")]
    pub spatialite: bool,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl GeoPackageConfig {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            settings: SqlSettings::default(),
            max_bbox_size_to_use_with_rtree: default_max_bbox_size_to_use_with_rtree(),
            in_memory_cache_size: default_in_memory_cache_size(),
            warm_up: false,
            spatialite: true,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostgresConfig {
    #[serde(default = "default_pg_host")]
    pub host: String,

    #[serde(default = "default_pg_port")]
    pub port: u16,

    pub database_name: String,

    #[serde(default = "default_pg_schema")]
    pub schema: String,

    #[serde(default = "default_pg_ssl_mode")]
    pub ssl_mode: String,

    pub user: String,

    /// Password, falls back to the PGPASSWORD environment variable.
    #[serde(default)]
    pub pass: Option<String>,

    #[serde(flatten)]
    pub settings: SqlSettings,

    /// Fail at startup when a geometry column lacks a GIST index.
    #[serde(default = "default_true")]
    pub spatial_index_required: bool,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl FeaturesConfig {
    /// Parse configuration from a YAML document.
    pub fn from_yaml(yaml: &str) -> FeaturesResult<Self> {
        let config: FeaturesConfig = serde_yaml::from_str(yaml)
            .map_err(|e| FeaturesError::ConfigError(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> FeaturesResult<()> {
        if self.collections.is_empty() {
            return Err(FeaturesError::ConfigError("no collections configured".to_string()));
        }
        if self.limit.default < 1 || self.limit.max < self.limit.default {
            return Err(FeaturesError::ConfigError(format!(
                "invalid limit config: default {} and max {}",
                self.limit.default, self.limit.max
            )));
        }
        self.datasources.default_wgs84.backend()?;
        for additional in &self.datasources.additional {
            additional.srid()?;
            additional.datasource.backend()?;
        }
        Ok(())
    }

    pub fn collection(&self, id: &str) -> Option<&CollectionConfig> {
        self.collections.iter().find(|c| c.id == id)
    }

    pub fn collection_ids(&self) -> Vec<String> {
        self.collections.iter().map(|c| c.id.clone()).collect()
    }
}

fn default_true() -> bool {
    true
}

fn default_limit() -> i64 {
    10
}

fn default_max_limit() -> i64 {
    1000
}

fn default_fid() -> String {
    "fid".to_string()
}

fn default_query_timeout_secs() -> u64 {
    15
}

fn default_max_bbox_size_to_use_with_rtree() -> i64 {
    8000
}

fn default_in_memory_cache_size() -> i64 {
    -2000
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_host() -> String {
    "localhost".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_pg_schema() -> String {
    "public".to_string()
}

fn default_pg_ssl_mode() -> String {
    "disable".to_string()
}
