//! PostgreSQL/PostGIS datasource. Transforms geometries on the fly, so one
//! datasource serves every output coordinate system.

pub mod asserts;
pub mod metadata;
pub mod query;
pub mod rows;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgPool, Statement as _};
use tracing::{debug, info};

use features_common::{
    AxisOrder, Cursors, Feature, FeatureCollection, FeaturesError, FeaturesResult, Profile, Srid, NEXT_FID, PREV_FID,
};

use crate::common::{query_error, DatasourceCommon, FeatureTable};
use crate::config::{CollectionConfig, PostgresConfig};
use crate::criteria::{FeatureId, FeaturesCriteria, PropertyFiltersWithAllowedValues};
use crate::datasource::{Datasource, DatasourceOptions};
use crate::mapper::{map_rows_to_feature_ids, map_rows_to_features, MapOptions};
use crate::sql::{columns_to_sql, compile_named, select_columns, CompiledQuery, NamedParams, Placeholder, SqlParam};
use crate::stmt_cache::{PreparedStatementCache, DEFAULT_CAPACITY};
use crate::value::RowSet;

use self::query::{make_bbox_query, make_default_query, postgis_srid, qualified_table_name, select_postgres_geometry};
use self::rows::{bind_all, decode_wkb, to_row_set};

const APPLICATION_NAME: &str = "features-api";
/// SQLSTATE query_canceled, raised when `statement_timeout` expires.
const QUERY_CANCELED_CODE: &str = "57014";

pub struct Postgres {
    common: DatasourceCommon,
    pool: PgPool,
    stmt_cache: PreparedStatementCache<sqlx::Postgres>,
    schema: String,
}

impl Postgres {
    pub async fn new(
        config: &PostgresConfig,
        collections: &[CollectionConfig],
        transform_on_the_fly: bool,
        options: &DatasourceOptions,
    ) -> FeaturesResult<Self> {
        if !transform_on_the_fly {
            return Err(FeaturesError::ConfigError(
                "postgres datasources always transform coordinates on the fly".to_string(),
            ));
        }
        let mut common = DatasourceCommon::new(&config.settings, transform_on_the_fly, options);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(connect_options(config, common.query_timeout)?)
            .await
            .map_err(|e| {
                FeaturesError::DatabaseError(format!(
                    "failed to connect with database '{}' on {}:{}: {}",
                    config.database_name, config.host, config.port, e
                ))
            })?;

        let driver_metadata = metadata::read_driver_metadata(&pool).await?;
        info!(database = %config.database_name, "connected with database, {}", driver_metadata);

        common.tables = metadata::read_feature_tables(
            &pool,
            &config.schema,
            collections,
            &common.fid_column,
            &common.external_fid_column,
        )
        .await?;
        common.property_filters =
            metadata::read_property_filters_with_allowed_values(&pool, &config.schema, &common.tables, collections).await?;
        common.properties = collections
            .iter()
            .filter_map(|c| c.feature_properties.clone().map(|p| (c.id.clone(), p)))
            .collect();

        asserts::assert_indexes_exist(&pool, &config.schema, collections, &common.tables, config.spatial_index_required)
            .await?;

        Ok(Self {
            common,
            pool,
            stmt_cache: PreparedStatementCache::new(DEFAULT_CAPACITY),
            schema: config.schema.clone(),
        })
    }

    fn make_features_query(&self, table: &FeatureTable, select_clause: &str, criteria: &FeaturesCriteria) -> FeaturesResult<CompiledQuery> {
        let (sql, params) = if criteria.bbox.is_some() {
            make_bbox_query(&self.schema, table, &self.common.fid_column, select_clause, criteria)
        } else {
            make_default_query(&self.schema, table, &self.common.fid_column, select_clause, criteria)
        };
        compile_named(&sql, &params, Placeholder::Dollar)
    }

    fn select_clause(&self, collection: &str, table: &FeatureTable, axis_order: AxisOrder, prev_next: bool) -> String {
        select_columns(
            table,
            &self.common.fid_column,
            axis_order,
            &select_postgres_geometry,
            self.common.property_config(collection),
            prev_next,
        )
    }

    async fn fetch_cached(&self, query: &CompiledQuery) -> FeaturesResult<RowSet> {
        let stmt = self.stmt_cache.lookup(&self.pool, &query.sql).await?;
        let started = Instant::now();
        let rows = bind_all(stmt.query(), &query.params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error(query, e, QUERY_CANCELED_CODE))?;
        self.common.log_query(query, started);
        to_row_set(&rows)
    }

    async fn fetch(&self, query: &CompiledQuery) -> FeaturesResult<RowSet> {
        let started = Instant::now();
        let rows = bind_all(sqlx::query(&query.sql), &query.params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error(query, e, QUERY_CANCELED_CODE))?;
        self.common.log_query(query, started);
        to_row_set(&rows)
    }

    fn map_options<'a>(&'a self, collection: &str, table: &'a FeatureTable, profile: &'a Profile) -> MapOptions<'a> {
        MapOptions {
            fid_column: &self.common.fid_column,
            external_fid_column: &self.common.external_fid_column,
            geom_column: &table.geometry_column_name,
            prop_config: self.common.property_config(collection),
            schema: &table.schema,
            map_geom: decode_wkb,
            profile,
            format: self.common.format_opts(),
        }
    }
}

/// Read-only session options for the pool.
///
/// The server aborts statements running past `query_timeout`, so a timed out
/// request doesn't keep a backend busy. sqlx keeps the prepared statements in
/// a cache per connection, bounded like [`PreparedStatementCache`].
pub fn connect_options(config: &PostgresConfig, query_timeout: Duration) -> FeaturesResult<PgConnectOptions> {
    let ssl_mode: PgSslMode = config
        .ssl_mode
        .parse()
        .map_err(|e| FeaturesError::ConfigError(format!("invalid sslMode '{}': {}", config.ssl_mode, e)))?;
    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database_name)
        .username(&config.user)
        .ssl_mode(ssl_mode)
        .application_name(APPLICATION_NAME)
        .statement_cache_capacity(DEFAULT_CAPACITY)
        .options([
            ("default_transaction_read_only", "on".to_string()),
            ("statement_timeout", query_timeout.as_millis().to_string()),
        ]);
    if let Some(pass) = config.pass.clone().or_else(|| std::env::var("PGPASSWORD").ok()) {
        options = options.password(&pass);
    }
    Ok(options)
}

#[async_trait]
impl Datasource for Postgres {
    async fn get_feature_ids(&self, collection: &str, criteria: &FeaturesCriteria) -> FeaturesResult<(Vec<i64>, Cursors)> {
        let table = self.common.feature_table(collection)?.clone();
        let select_clause = columns_to_sql(&[self.common.fid_column.as_str(), PREV_FID, NEXT_FID]);
        let query = self.make_features_query(&table, &select_clause, criteria)?;

        let rows = self.common.with_timeout(self.fetch_cached(&query)).await?;
        let (ids, prev_next) = map_rows_to_feature_ids(&rows)?;
        let Some(prev_next) = prev_next else {
            return Ok((vec![], Cursors::default()));
        };
        Ok((ids, Cursors::new(prev_next, &criteria.cursor.filters_checksum)))
    }

    async fn get_features_by_id(
        &self,
        collection: &str,
        feature_ids: &[i64],
        output_srid: Srid,
        axis_order: AxisOrder,
        profile: &Profile,
    ) -> FeaturesResult<FeatureCollection> {
        if feature_ids.is_empty() {
            return Ok(FeatureCollection::default());
        }
        let table = self.common.feature_table(collection)?.clone();
        let select_clause = self.select_clause(collection, &table, axis_order, false);
        let sql = format!(
            "select {} from {} where \"{}\" in (:fids) order by \"{}\"",
            select_clause,
            qualified_table_name(&self.schema, &table),
            self.common.fid_column,
            self.common.fid_column
        );
        let params = NamedParams::from([
            ("fids".to_string(), SqlParam::IntList(feature_ids.to_vec())),
            ("outputSrid".to_string(), SqlParam::Int(i64::from(postgis_srid(output_srid).0))),
        ]);
        let query = compile_named(&sql, &params, Placeholder::Dollar)?;

        let rows = self.common.with_timeout(self.fetch(&query)).await?;
        let (features, _) = map_rows_to_features(&rows, &self.map_options(collection, &table, profile))?;
        Ok(FeatureCollection::new(features))
    }

    async fn get_features(
        &self,
        collection: &str,
        criteria: &FeaturesCriteria,
        axis_order: AxisOrder,
        profile: &Profile,
    ) -> FeaturesResult<(FeatureCollection, Cursors)> {
        let table = self.common.feature_table(collection)?.clone();
        let select_clause = self.select_clause(collection, &table, axis_order, true);
        let query = self.make_features_query(&table, &select_clause, criteria)?;

        let rows = self.common.with_timeout(self.fetch_cached(&query)).await?;
        if rows.is_empty() {
            return Ok((FeatureCollection::default(), Cursors::default()));
        }
        let (features, prev_next) = map_rows_to_features(&rows, &self.map_options(collection, &table, profile))?;
        let cursors = prev_next
            .map(|fid| Cursors::new(fid, &criteria.cursor.filters_checksum))
            .unwrap_or_default();
        Ok((FeatureCollection::new(features), cursors))
    }

    async fn get_feature(
        &self,
        collection: &str,
        feature_id: FeatureId,
        output_srid: Srid,
        axis_order: AxisOrder,
        profile: &Profile,
    ) -> FeaturesResult<Option<Feature>> {
        let table = self.common.feature_table(collection)?.clone();
        let (fid_column, fid_param) = match (feature_id, self.common.uses_external_fid()) {
            (FeatureId::Fid(fid), false) => (self.common.fid_column.as_str(), SqlParam::Int(fid)),
            (FeatureId::External(uuid), true) => (self.common.external_fid_column.as_str(), SqlParam::Uuid(uuid)),
            _ => {
                debug!(collection, %feature_id, "feature id doesn't match the identifier type of the collection");
                return Ok(None);
            }
        };
        let select_clause = self.select_clause(collection, &table, axis_order, false);
        let sql = format!(
            "select {} from {} where \"{}\" = :fid limit 1",
            select_clause,
            qualified_table_name(&self.schema, &table),
            fid_column
        );
        let params = NamedParams::from([
            ("fid".to_string(), fid_param),
            ("outputSrid".to_string(), SqlParam::Int(i64::from(postgis_srid(output_srid).0))),
        ]);
        let query = compile_named(&sql, &params, Placeholder::Dollar)?;

        let rows = self.common.with_timeout(self.fetch(&query)).await?;
        let (mut features, _) = map_rows_to_features(&rows, &self.map_options(collection, &table, profile))?;
        if features.len() != 1 {
            return Ok(None);
        }
        Ok(features.pop())
    }

    fn get_feature_table_metadata(&self, collection: &str) -> FeaturesResult<Arc<FeatureTable>> {
        self.common.feature_table(collection).cloned()
    }

    fn get_property_filters_with_allowed_values(&self, collection: &str) -> FeaturesResult<PropertyFiltersWithAllowedValues> {
        self.common.property_filters(collection)
    }

    fn supports_on_the_fly_transformation(&self) -> bool {
        self.common.transform_on_the_fly
    }

    async fn close(&self) {
        self.stmt_cache.close().await;
        self.pool.close().await;
    }
}
