//! Read feature tables and property filters from the PostgreSQL catalog.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use tracing::{info, warn};

use features_common::{FeatureRelation, FeaturesError, FeaturesResult, Field, Schema};

use crate::common::{validate_uniqueness, with_static_allowed_values, FeatureTable};
use crate::config::CollectionConfig;
use crate::criteria::PropertyFiltersWithAllowedValues;

pub async fn read_driver_metadata(pool: &PgPool) -> FeaturesResult<String> {
    let (pg_version, postgis_version): (String, String) = sqlx::query_as("select version(), postgis_version()")
        .fetch_one(pool)
        .await
        .map_err(|e| FeaturesError::MetadataError(format!("failed to connect with database: {}", e)))?;
    Ok(format!("postgresql version: {}, postgis version: {}", pg_version, postgis_version))
}

/// Read `geometry_columns` of the schema, matched to collections by table name.
pub async fn read_feature_tables(
    pool: &PgPool,
    schema_name: &str,
    collections: &[CollectionConfig],
    fid_column: &str,
    external_fid_column: &str,
) -> FeaturesResult<HashMap<String, Arc<FeatureTable>>> {
    let query = r#"
select f_table_name::text, f_geometry_column::text, type::text, srid::bigint
from geometry_columns
where f_table_schema = $1
order by f_table_name"#;

    let rows: Vec<(String, String, String, i64)> = sqlx::query_as(query)
        .bind(schema_name)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            FeaturesError::MetadataError(format!("failed to retrieve geometry_columns using query: {}, error: {}", query, e))
        })?;

    let collection_ids: Vec<String> = collections.iter().map(|c| c.id.clone()).collect();
    let mut result = HashMap::new();
    for (table_name, geometry_column, geometry_type, srid) in rows {
        let matching: Vec<&CollectionConfig> = collections
            .iter()
            .filter(|c| c.id == table_name || c.has_table_name(&table_name))
            .collect();
        if matching.is_empty() {
            continue;
        }
        let schema = read_schema(pool, schema_name, &table_name, &geometry_column, fid_column, external_fid_column, &collection_ids)
            .await
            .map_err(|e| FeaturesError::MetadataError(format!("failed to read schema for table {}: {}", table_name, e)))?;

        let table = Arc::new(FeatureTable {
            table_name: table_name.clone(),
            geometry_column_name: geometry_column,
            geometry_type,
            srs_id: Some(srid),
            bbox: None,
            schema: Arc::new(schema),
        });
        for collection in matching {
            result.insert(collection.id.clone(), table.clone());
        }
    }

    if result.is_empty() {
        return Err(FeaturesError::MetadataError(format!(
            "no feature tables found in geometry_columns of schema '{}'",
            schema_name
        )));
    }
    for collection in collections {
        if !result.contains_key(&collection.id) {
            warn!(collection = %collection.id, "no feature table found for collection in database");
        }
    }
    validate_uniqueness(&result);
    Ok(result)
}

async fn read_schema(
    pool: &PgPool,
    schema_name: &str,
    table_name: &str,
    geometry_column: &str,
    fid_column: &str,
    external_fid_column: &str,
    collection_ids: &[String],
) -> FeaturesResult<Schema> {
    let query = r#"
select a.attname::text,
       format_type(a.atttypid, a.atttypmod),
       a.attnotnull,
       coalesce(col_description(a.attrelid, a.attnum), '')
from pg_catalog.pg_attribute a
    join pg_catalog.pg_class c on a.attrelid = c.oid
    join pg_catalog.pg_namespace n on c.relnamespace = n.oid
where n.nspname = $1 and c.relname = $2 and a.attnum > 0 and not a.attisdropped
order by a.attnum"#;

    let rows: Vec<(String, String, bool, String)> = sqlx::query_as(query)
        .bind(schema_name)
        .bind(table_name)
        .fetch_all(pool)
        .await
        .map_err(|e| FeaturesError::MetadataError(e.to_string()))?;

    let fields = rows
        .into_iter()
        .map(|(name, r#type, not_null, description)| Field {
            is_required: not_null,
            is_primary_geometry: name == geometry_column,
            feature_relation: FeatureRelation::from_column(&name, external_fid_column, collection_ids),
            name,
            r#type,
            description,
        })
        .collect();
    Schema::new(fields, fid_column, external_fid_column)
}

pub async fn read_property_filters_with_allowed_values(
    pool: &PgPool,
    schema_name: &str,
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
            let query = format!(
                "select distinct cast(\"{column}\" as text) from \"{schema}\".\"{table}\" where \"{column}\" is not null order by 1",
                column = pf.name,
                schema = schema_name,
                table = table.table_name
            );
            let rows: Vec<(String,)> = sqlx::query_as(&query).fetch_all(pool).await.map_err(|e| {
                FeaturesError::MetadataError(format!("failed to derive allowed values using query: {}, error: {}", query, e))
            })?;
            let values: Vec<String> = rows
                .into_iter()
                .map(|(v,)| v)
                .filter(|v| {
                    let valid = !v.contains('\n');
                    if !valid {
                        warn!(column = %pf.name, "skipping allowed value containing a newline");
                    }
                    valid
                })
                .collect();
            info!(collection = %collection.id, filter = %pf.name, count = values.len(), "derived allowed values");
            if let Some(entry) = filters.get_mut(&pf.name) {
                entry.allowed_values = Some(values);
            }
        }
        result.insert(collection.id.clone(), filters);
    }
    Ok(result)
}
