//! Startup checks for the indexes of PostgreSQL feature tables.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;

use features_common::{FeaturesError, FeaturesResult};

use crate::common::{FeatureTable, IndexMatch};
use crate::config::CollectionConfig;

const INDEXED_COLUMNS_QUERY: &str = r#"
select string_agg(a.attname::text, ',' order by array_position(ix.indkey::int2[], a.attnum))
from pg_catalog.pg_index ix
    join pg_catalog.pg_class t on t.oid = ix.indrelid
    join pg_catalog.pg_namespace n on n.oid = t.relnamespace
    join pg_catalog.pg_attribute a on a.attrelid = t.oid and a.attnum = any(ix.indkey)
where n.nspname = $1 and t.relname = $2
group by ix.indexrelid"#;

const GIST_INDEX_QUERY: &str = r#"
select count(*)
from pg_catalog.pg_index ix
    join pg_catalog.pg_class i on i.oid = ix.indexrelid
    join pg_catalog.pg_am am on am.oid = i.relam
    join pg_catalog.pg_class t on t.oid = ix.indrelid
    join pg_catalog.pg_namespace n on n.oid = t.relnamespace
    join pg_catalog.pg_attribute a on a.attrelid = t.oid and a.attnum = any(ix.indkey)
where am.amname = 'gist' and n.nspname = $1 and t.relname = $2 and a.attname = $3"#;

/// Assert the spatial, temporal and property filter indexes exist.
pub async fn assert_indexes_exist(
    pool: &PgPool,
    schema_name: &str,
    collections: &[CollectionConfig],
    tables: &HashMap<String, Arc<FeatureTable>>,
    spatial_index_required: bool,
) -> FeaturesResult<()> {
    for collection in collections {
        let Some(table) = tables.get(&collection.id) else {
            continue;
        };
        let indexes = read_indexed_columns(pool, schema_name, &table.table_name).await?;

        if spatial_index_required {
            assert_spatial_index_exists(pool, schema_name, table).await?;
        }
        if let Some(temporal) = &collection.temporal_properties {
            let temporal_columns = format!("{},{}", temporal.start_date, temporal.end_date);
            assert_matches(&indexes, &table.table_name, &temporal_columns, IndexMatch::Prefix)?;
        }
        for pf in &collection.filters.properties {
            if pf.index_required {
                assert_matches(&indexes, &table.table_name, &pf.name, IndexMatch::Contains).map_err(|e| match e {
                    FeaturesError::MissingIndex(detail) => FeaturesError::MissingIndex(format!(
                        "{}. To disable this check set 'indexRequired' to 'false'",
                        detail
                    )),
                    other => other,
                })?;
            }
        }
    }
    Ok(())
}

async fn read_indexed_columns(pool: &PgPool, schema_name: &str, table_name: &str) -> FeaturesResult<Vec<String>> {
    let rows: Vec<(Option<String>,)> = sqlx::query_as(INDEXED_COLUMNS_QUERY)
        .bind(schema_name)
        .bind(table_name)
        .fetch_all(pool)
        .await
        .map_err(|e| FeaturesError::MetadataError(format!("failed to read indexes from table '{}': {}", table_name, e)))?;
    Ok(rows.into_iter().filter_map(|(columns,)| columns).collect())
}

async fn assert_spatial_index_exists(pool: &PgPool, schema_name: &str, table: &FeatureTable) -> FeaturesResult<()> {
    let (count,): (i64,) = sqlx::query_as(GIST_INDEX_QUERY)
        .bind(schema_name)
        .bind(&table.table_name)
        .bind(&table.geometry_column_name)
        .fetch_one(pool)
        .await
        .map_err(|e| {
            FeaturesError::MetadataError(format!("failed to read spatial indexes from table '{}': {}", table.table_name, e))
        })?;
    if count == 0 {
        return Err(FeaturesError::MissingIndex(format!(
            "no GIST index exists on column '{}' in table '{}'",
            table.geometry_column_name, table.table_name
        )));
    }
    Ok(())
}

fn assert_matches(indexes: &[String], table_name: &str, columns: &str, index_match: IndexMatch) -> FeaturesResult<()> {
    if indexes.iter().any(|indexed| index_match.matches(indexed, columns)) {
        return Ok(());
    }
    Err(FeaturesError::MissingIndex(format!(
        "no index exists on column(s) '{}' in table '{}'",
        columns, table_name
    )))
}
