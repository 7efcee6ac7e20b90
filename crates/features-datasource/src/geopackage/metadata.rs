//! Read feature tables, schemas and allowed filter values from the GeoPackage catalog.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{info, warn};

use features_common::{BoundingBox, FeatureRelation, FeaturesError, FeaturesResult, Field, Schema};

use crate::common::{validate_uniqueness, with_static_allowed_values, FeatureTable};
use crate::config::CollectionConfig;
use crate::criteria::PropertyFiltersWithAllowedValues;

/// Versions of the GeoPackage and the SQLite/SpatiaLite libraries.
pub async fn read_driver_metadata(pool: &SqlitePool, spatialite: bool) -> FeaturesResult<String> {
    let (sqlite_version,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .map_err(|e| FeaturesError::MetadataError(format!("failed to connect with GeoPackage: {}", e)))?;

    let spatialite_version = if spatialite {
        let (version, arch): (String, String) = sqlx::query_as("select spatialite_version(), spatialite_target_cpu()")
            .fetch_one(pool)
            .await
            .map_err(|e| FeaturesError::MetadataError(format!("failed to load SpatiaLite: {}", e)))?;
        format!("{} on {}", version, arch)
    } else {
        "disabled".to_string()
    };

    let user_version = sqlx::query_as::<_, (i64,)>("pragma user_version")
        .fetch_one(pool)
        .await
        .map(|(v,)| v.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    Ok(format!(
        "geopackage version: {}, sqlite version: {}, spatialite version: {}",
        user_version, sqlite_version, spatialite_version
    ))
}

type GpkgContentsRow = (
    String,
    Option<String>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<i64>,
    String,
    String,
);

/// Read `gpkg_contents` joined with `gpkg_geometry_columns`, matched to
/// collections by table name.
pub async fn read_gpkg_contents(
    pool: &SqlitePool,
    collections: &[CollectionConfig],
    fid_column: &str,
    external_fid_column: &str,
) -> FeaturesResult<HashMap<String, Arc<FeatureTable>>> {
    let query = r#"
select
    c.table_name, c.identifier,
    cast(c.min_x as real), cast(c.min_y as real), cast(c.max_x as real), cast(c.max_y as real),
    cast(c.srs_id as integer), gc.column_name, gc.geometry_type_name
from
    gpkg_contents c join gpkg_geometry_columns gc on c.table_name == gc.table_name
where
    c.data_type = 'features'"#;

    let rows: Vec<GpkgContentsRow> = sqlx::query_as(query).fetch_all(pool).await.map_err(|e| {
        FeaturesError::MetadataError(format!("failed to retrieve gpkg_contents using query: {}, error: {}", query, e))
    })?;

    let collection_ids: Vec<String> = collections.iter().map(|c| c.id.clone()).collect();
    let mut result = HashMap::new();
    for (table_name, _identifier, min_x, min_y, max_x, max_y, srs_id, geometry_column, geometry_type) in rows {
        if table_name.is_empty() {
            return Err(FeaturesError::MetadataError("feature table name is blank".to_string()));
        }
        let schema = read_schema(pool, &table_name, &geometry_column, fid_column, external_fid_column, &collection_ids)
            .await
            .map_err(|e| FeaturesError::MetadataError(format!("failed to read schema for table {}: {}", table_name, e)))?;

        let bbox = match (min_x, min_y, max_x, max_y) {
            (Some(min_x), Some(min_y), Some(max_x), Some(max_y)) => Some(BoundingBox::new(min_x, min_y, max_x, max_y)),
            _ => None,
        };
        let table = Arc::new(FeatureTable {
            table_name: table_name.clone(),
            geometry_column_name: geometry_column,
            geometry_type,
            srs_id,
            bbox,
            schema: Arc::new(schema),
        });

        for collection in collections {
            if collection.id == table_name || collection.has_table_name(&table_name) {
                result.insert(collection.id.clone(), table.clone());
            }
        }
    }

    if result.is_empty() {
        return Err(FeaturesError::MetadataError(
            "no records for 'features' found in gpkg_contents and/or gpkg_geometry_columns".to_string(),
        ));
    }
    for collection in collections {
        if !result.contains_key(&collection.id) {
            warn!(collection = %collection.id, "no feature table found for collection in GeoPackage");
        }
    }
    validate_uniqueness(&result);
    Ok(result)
}

async fn read_schema(
    pool: &SqlitePool,
    table_name: &str,
    geometry_column: &str,
    fid_column: &str,
    external_fid_column: &str,
    collection_ids: &[String],
) -> FeaturesResult<Schema> {
    let rows: Vec<(String, String, i64)> =
        sqlx::query_as(&format!("select name, type, \"notnull\" from pragma_table_info('{}')", table_name))
            .fetch_all(pool)
            .await
            .map_err(|e| FeaturesError::MetadataError(e.to_string()))?;

    let fields = rows
        .into_iter()
        .map(|(name, r#type, not_null)| Field {
            is_required: not_null == 1,
            is_primary_geometry: name == geometry_column,
            feature_relation: FeatureRelation::from_column(&name, external_fid_column, collection_ids),
            name,
            r#type,
            description: String::new(),
        })
        .collect();
    Schema::new(fields, fid_column, external_fid_column)
}

/// All configured property filters per collection, with allowed values
/// either static from config or derived from the table.
pub async fn read_property_filters_with_allowed_values(
    pool: &SqlitePool,
    tables: &HashMap<String, Arc<FeatureTable>>,
    collections: &[CollectionConfig],
) -> FeaturesResult<HashMap<String, PropertyFiltersWithAllowedValues>> {
    let mut result = HashMap::new();
    for collection in collections {
        let Some(table) = tables.get(&collection.id) else {
            continue;
        };
        let mut filters = with_static_allowed_values(collection);
        for pf in &collection.filters.properties {
            if pf.allowed_values.is_some() || !pf.derive_allowed_values_from_datasource {
                continue;
            }
            if !pf.index_required {
                warn!(
                    column = %pf.name,
                    "index is disabled for column, deriving allowed values may take a long time"
                );
            }
            let values = derive_allowed_values(pool, &table.table_name, &pf.name).await?;
            info!(collection = %collection.id, filter = %pf.name, count = values.len(), "derived allowed values");
            if let Some(entry) = filters.get_mut(&pf.name) {
                entry.allowed_values = Some(values);
            }
        }
        result.insert(collection.id.clone(), filters);
    }
    Ok(result)
}

async fn derive_allowed_values(pool: &SqlitePool, table_name: &str, column: &str) -> FeaturesResult<Vec<String>> {
    let query = format!(
        "select distinct cast(ft.\"{column}\" as text) from \"{table}\" ft where ft.\"{column}\" is not null order by 1",
        column = column,
        table = table_name
    );
    let rows: Vec<(String,)> = sqlx::query_as(&query).fetch_all(pool).await.map_err(|e| {
        FeaturesError::MetadataError(format!("failed to derive allowed values using query: {}, error: {}", query, e))
    })?;

    Ok(rows
        .into_iter()
        .map(|(v,)| v)
        .filter(|v| {
            let valid = !v.contains('\n');
            if !valid {
                warn!(column, "skipping allowed value containing a newline");
            }
            valid
        })
        .collect())
}
