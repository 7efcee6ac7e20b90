//! The contract every features backend implements.

use std::sync::Arc;

use async_trait::async_trait;

use features_common::{AxisOrder, Cursors, Feature, FeatureCollection, FeaturesResult, Profile, Schema, Srid};

use crate::common::FeatureTable;
use crate::config::{BackendConfig, CollectionConfig, DatasourceConfig};
use crate::criteria::{FeatureId, FeaturesCriteria, PropertyFiltersWithAllowedValues};
use crate::geopackage::GeoPackage;
use crate::postgres::Postgres;
use crate::sqllog::SqlLog;

/// Holds all features of one or more collections in a specific coordinate system.
#[async_trait]
pub trait Datasource: Send + Sync {
    /// Ids of the features matching the criteria, with cursors for pagination.
    /// Used together with [`Datasource::get_features_by_id`].
    async fn get_feature_ids(&self, collection: &str, criteria: &FeaturesCriteria) -> FeaturesResult<(Vec<i64>, Cursors)>;

    /// Features with the given ids.
    async fn get_features_by_id(
        &self,
        collection: &str,
        feature_ids: &[i64],
        output_srid: Srid,
        axis_order: AxisOrder,
        profile: &Profile,
    ) -> FeaturesResult<FeatureCollection>;

    /// A page of features matching the criteria, with cursors for pagination.
    async fn get_features(
        &self,
        collection: &str,
        criteria: &FeaturesCriteria,
        axis_order: AxisOrder,
        profile: &Profile,
    ) -> FeaturesResult<(FeatureCollection, Cursors)>;

    /// A single feature, `None` when it doesn't exist.
    async fn get_feature(
        &self,
        collection: &str,
        feature_id: FeatureId,
        output_srid: Srid,
        axis_order: AxisOrder,
        profile: &Profile,
    ) -> FeaturesResult<Option<Feature>>;

    fn get_feature_table_metadata(&self, collection: &str) -> FeaturesResult<Arc<FeatureTable>>;

    fn get_schema(&self, collection: &str) -> FeaturesResult<Arc<Schema>> {
        Ok(self.get_feature_table_metadata(collection)?.schema.clone())
    }

    /// All configured property filters of the collection, with allowed values where known.
    fn get_property_filters_with_allowed_values(&self, collection: &str) -> FeaturesResult<PropertyFiltersWithAllowedValues>;

    /// Whether geometries can be reprojected by the datasource itself.
    fn supports_on_the_fly_transformation(&self) -> bool;

    async fn close(&self);
}

/// Options applied to every datasource created from one configuration.
#[derive(Debug, Clone, Default)]
pub struct DatasourceOptions {
    pub max_decimals: Option<u32>,
    pub force_utc: bool,
    pub sql_log: SqlLog,
}

/// Create the datasource for the configured backend.
pub async fn new_datasource(
    config: &DatasourceConfig,
    collections: &[CollectionConfig],
    options: &DatasourceOptions,
) -> FeaturesResult<Arc<dyn Datasource>> {
    match config.backend()? {
        BackendConfig::GeoPackage(gpkg) => {
            let datasource = GeoPackage::new(gpkg, collections, false, options).await?;
            Ok(Arc::new(datasource))
        }
        BackendConfig::Postgres(pg) => {
            let datasource = Postgres::new(pg, collections, true, options).await?;
            Ok(Arc::new(datasource))
        }
    }
}
