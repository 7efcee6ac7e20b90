//! GeoPackage datasource, backed by a local SQLite file.

pub mod asserts;
pub mod encoding;
pub mod metadata;
pub mod query;
pub mod rows;
pub mod warmup;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Statement as _};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use features_common::{
    AxisOrder, Cursors, Feature, FeatureCollection, FeaturesError, FeaturesResult, Profile, Schema, Srid, NEXT_FID,
    PREV_FID,
};

use crate::common::{query_error, DatasourceCommon, FeatureTable};
use crate::config::{CollectionConfig, GeoPackageConfig};
use crate::criteria::{FeatureId, FeaturesCriteria, PropertyFiltersWithAllowedValues};
use crate::datasource::{Datasource, DatasourceOptions};
use crate::mapper::{map_rows_to_feature_ids, map_rows_to_features, MapOptions};
use crate::sql::{columns_to_sql, compile_named, select_columns, CompiledQuery, NamedParams, Placeholder, SqlParam};
use crate::stmt_cache::{PreparedStatementCache, DEFAULT_CAPACITY};
use crate::value::RowSet;

use self::query::{make_bbox_query, make_default_query, select_gpkg_geometry};
use self::rows::{bind_all, to_row_set};

/// Environment variable pointing at the directory holding mod_spatialite.
pub const SPATIALITE_LIBRARY_PATH: &str = "SPATIALITE_LIBRARY_PATH";

const SPATIALITE_MODULE: &str = "mod_spatialite";

/// SQLITE_INTERRUPT, returned when the progress handler aborts a statement.
const SQLITE_INTERRUPT_CODE: &str = "9";

/// Virtual machine instructions between deadline checks.
const PROGRESS_HANDLER_OPS: i32 = 1000;

/// Path of the SpatiaLite extension to load into every connection.
///
/// Resolved once when a GeoPackage is opened, never at process start.
pub fn spatialite_extension() -> String {
    match std::env::var(SPATIALITE_LIBRARY_PATH) {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir).join(SPATIALITE_MODULE).to_string_lossy().into_owned(),
        _ => SPATIALITE_MODULE.to_string(),
    }
}

/// Read-only connection to the GeoPackage file.
///
/// sqlx keeps the prepared statements in a cache per connection. It is
/// bounded like [`PreparedStatementCache`], so statements evicted from ours
/// are finalized there as well.
pub fn connect_options(config: &GeoPackageConfig) -> SqliteConnectOptions {
    let options = SqliteConnectOptions::new()
        .filename(&config.file)
        .read_only(true)
        .statement_cache_capacity(DEFAULT_CAPACITY)
        .pragma("cache_size", config.in_memory_cache_size.to_string());
    if config.spatialite {
        options.extension(spatialite_extension())
    } else {
        options
    }
}

/// Acquire a connection whose statements are interrupted once `deadline` has passed.
///
/// Dropping a fetch doesn't stop SQLite, the progress handler does. Every
/// acquisition installs its own handler, replacing the one left by the
/// previous user of the connection.
pub async fn acquire_with_deadline(
    pool: &SqlitePool,
    deadline: Option<Instant>,
) -> FeaturesResult<PoolConnection<Sqlite>> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| FeaturesError::DatabaseError(format!("failed to acquire GeoPackage connection: {}", e)))?;
    {
        let mut handle = conn
            .lock_handle()
            .await
            .map_err(|e| FeaturesError::DatabaseError(format!("failed to lock GeoPackage connection: {}", e)))?;
        match deadline {
            Some(deadline) => handle.set_progress_handler(PROGRESS_HANDLER_OPS, move || Instant::now() < deadline),
            None => handle.remove_progress_handler(),
        }
    }
    Ok(conn)
}

pub struct GeoPackage {
    common: DatasourceCommon,
    pool: SqlitePool,
    stmt_cache: PreparedStatementCache<Sqlite>,
    max_bbox_size_to_use_with_rtree: i64,
    spatialite: bool,
    warm_up: Option<JoinHandle<()>>,
}

impl GeoPackage {
    pub async fn new(
        config: &GeoPackageConfig,
        collections: &[CollectionConfig],
        transform_on_the_fly: bool,
        options: &DatasourceOptions,
    ) -> FeaturesResult<Self> {
        if transform_on_the_fly {
            return Err(FeaturesError::ConfigError(
                "on the fly transformation of coordinates is not supported for GeoPackages".to_string(),
            ));
        }
        let mut common = DatasourceCommon::new(&config.settings, transform_on_the_fly, options);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(connect_options(config))
            .await
            .map_err(|e| {
                FeaturesError::DatabaseError(format!("failed to open GeoPackage {}: {}", config.file.display(), e))
            })?;

        let driver_metadata = metadata::read_driver_metadata(&pool, config.spatialite).await?;
        info!(file = %config.file.display(), "connected with GeoPackage, {}", driver_metadata);

        common.tables =
            metadata::read_gpkg_contents(&pool, collections, &common.fid_column, &common.external_fid_column).await?;
        common.property_filters =
            metadata::read_property_filters_with_allowed_values(&pool, &common.tables, collections).await?;
        common.properties = collections
            .iter()
            .filter_map(|c| c.feature_properties.clone().map(|p| (c.id.clone(), p)))
            .collect();

        asserts::assert_indexes_exist(&pool, collections, &common.tables, &common.fid_column).await?;

        let warm_up = config
            .warm_up
            .then(|| warmup::spawn_warm_up(pool.clone(), &common.tables));

        Ok(Self {
            common,
            pool,
            stmt_cache: PreparedStatementCache::new(DEFAULT_CAPACITY),
            max_bbox_size_to_use_with_rtree: config.max_bbox_size_to_use_with_rtree,
            spatialite: config.spatialite,
            warm_up,
        })
    }

    fn make_features_query(
        &self,
        table: &FeatureTable,
        select_clause: &str,
        criteria: &FeaturesCriteria,
    ) -> FeaturesResult<CompiledQuery> {
        let (sql, params) = if criteria.bbox.is_some() {
            self.require_spatialite("bbox queries")?;
            make_bbox_query(
                table,
                &self.common.fid_column,
                select_clause,
                criteria,
                self.max_bbox_size_to_use_with_rtree,
            )?
        } else {
            make_default_query(table, &self.common.fid_column, select_clause, criteria)
        };
        compile_named(&sql, &params, Placeholder::Question)
    }

    fn select_clause(&self, collection: &str, table: &FeatureTable, axis_order: AxisOrder, prev_next: bool) -> FeaturesResult<String> {
        if axis_order == AxisOrder::YX {
            self.require_spatialite("swapping axis order")?;
        }
        Ok(select_columns(
            table,
            &self.common.fid_column,
            axis_order,
            &select_gpkg_geometry,
            self.common.property_config(collection),
            prev_next,
        ))
    }

    fn require_spatialite(&self, what: &str) -> FeaturesResult<()> {
        if self.spatialite {
            Ok(())
        } else {
            Err(FeaturesError::Unsupported(format!("{} require the SpatiaLite extension", what)))
        }
    }

    async fn acquire(&self) -> FeaturesResult<PoolConnection<Sqlite>> {
        acquire_with_deadline(&self.pool, Some(Instant::now() + self.common.query_timeout)).await
    }

    /// Run a query through the prepared statement cache.
    async fn fetch_cached(&self, query: &CompiledQuery, schema: &Schema) -> FeaturesResult<RowSet> {
        let stmt = self.stmt_cache.lookup(&self.pool, &query.sql).await?;
        let mut conn = self.acquire().await?;
        let started = Instant::now();
        let rows = bind_all(stmt.query(), &query.params)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| query_error(query, e, SQLITE_INTERRUPT_CODE))?;
        self.common.log_query(query, started);
        to_row_set(&rows, schema)
    }

    async fn fetch(&self, query: &CompiledQuery, schema: &Schema) -> FeaturesResult<RowSet> {
        let mut conn = self.acquire().await?;
        let started = Instant::now();
        let rows = bind_all(sqlx::query(&query.sql), &query.params)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| query_error(query, e, SQLITE_INTERRUPT_CODE))?;
        self.common.log_query(query, started);
        to_row_set(&rows, schema)
    }

    fn map_options<'a>(&'a self, collection: &str, table: &'a FeatureTable, profile: &'a Profile) -> MapOptions<'a> {
        MapOptions {
            fid_column: &self.common.fid_column,
            external_fid_column: &self.common.external_fid_column,
            geom_column: &table.geometry_column_name,
            prop_config: self.common.property_config(collection),
            schema: &table.schema,
            map_geom: encoding::decode_geometry,
            profile,
            format: self.common.format_opts(),
        }
    }
}

#[async_trait]
impl Datasource for GeoPackage {
    async fn get_feature_ids(&self, collection: &str, criteria: &FeaturesCriteria) -> FeaturesResult<(Vec<i64>, Cursors)> {
        let table = self.common.feature_table(collection)?.clone();
        let select_clause = columns_to_sql(&[self.common.fid_column.as_str(), PREV_FID, NEXT_FID]);
        let query = self.make_features_query(&table, &select_clause, criteria)?;

        let rows = self.common.with_timeout(self.fetch_cached(&query, &table.schema)).await?;
        if rows.is_empty() {
            return Ok((vec![], Cursors::default()));
        }
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
        _output_srid: Srid,
        axis_order: AxisOrder,
        profile: &Profile,
    ) -> FeaturesResult<FeatureCollection> {
        if feature_ids.is_empty() {
            return Ok(FeatureCollection::default());
        }
        let table = self.common.feature_table(collection)?.clone();
        let select_clause = self.select_clause(collection, &table, axis_order, false)?;
        let sql = format!(
            "select {} from \"{}\" where \"{}\" in (:fids) order by \"{}\"",
            select_clause, table.table_name, self.common.fid_column, self.common.fid_column
        );
        let params = NamedParams::from([("fids".to_string(), SqlParam::IntList(feature_ids.to_vec()))]);
        let query = compile_named(&sql, &params, Placeholder::Question)?;

        let rows = self.common.with_timeout(self.fetch(&query, &table.schema)).await?;
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
        let select_clause = self.select_clause(collection, &table, axis_order, true)?;
        let query = self.make_features_query(&table, &select_clause, criteria)?;

        let rows = self.common.with_timeout(self.fetch_cached(&query, &table.schema)).await?;
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
        _output_srid: Srid,
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
        let select_clause = self.select_clause(collection, &table, axis_order, false)?;
        let sql = format!(
            "select {} from \"{}\" where \"{}\" = :fid limit 1",
            select_clause, table.table_name, fid_column
        );
        let params = NamedParams::from([("fid".to_string(), fid_param)]);
        let query = compile_named(&sql, &params, Placeholder::Question)?;

        let rows = self.common.with_timeout(self.fetch(&query, &table.schema)).await?;
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
        if let Some(handle) = &self.warm_up {
            if !handle.is_finished() {
                warn!("closing GeoPackage while warm-up is still running");
                handle.abort();
            }
        }
        self.stmt_cache.close().await;
        self.pool.close().await;
    }
}
