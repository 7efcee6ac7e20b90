//! Startup checks for the indexes the feature queries depend on.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;

use features_common::{FeaturesError, FeaturesResult, MAXX_FIELD, MAXY_FIELD, MINX_FIELD, MINY_FIELD};

use crate::common::{FeatureTable, IndexMatch};
use crate::config::CollectionConfig;

/// Assert the spatial btree index, temporal index and property filter indexes exist.
pub async fn assert_indexes_exist(
    pool: &SqlitePool,
    collections: &[CollectionConfig],
    tables: &HashMap<String, Arc<FeatureTable>>,
    fid_column: &str,
) -> FeaturesResult<()> {
    // the index needs these columns in this order
    let default_spatial_btree_columns = [fid_column, MINX_FIELD, MAXX_FIELD, MINY_FIELD, MAXY_FIELD].join(",");

    for collection in collections {
        let Some(table) = tables.get(&collection.id) else {
            continue;
        };
        assert_indexes_exist_for_table(pool, &default_spatial_btree_columns, collection, table).await?;
    }
    Ok(())
}

async fn assert_indexes_exist_for_table(
    pool: &SqlitePool,
    default_spatial_btree_columns: &str,
    collection: &CollectionConfig,
    table: &FeatureTable,
) -> FeaturesResult<()> {
    let mut spatial_btree_columns = default_spatial_btree_columns.to_string();

    if let Some(temporal) = &collection.temporal_properties {
        let temporal_columns = format!("{},{}", temporal.start_date, temporal.end_date);
        spatial_btree_columns = format!("{},{}", default_spatial_btree_columns, temporal_columns);
        assert_index_exists(pool, &table.table_name, &temporal_columns, IndexMatch::Prefix).await?;
    }

    // substitutes the rtree when querying large bboxes, includes the temporal
    // columns when configured
    assert_index_exists(pool, &table.table_name, &spatial_btree_columns, IndexMatch::Prefix).await?;

    for pf in &collection.filters.properties {
        if let Err(e) = assert_index_exists(pool, &table.table_name, &pf.name, IndexMatch::Contains).await {
            if pf.index_required {
                return Err(FeaturesError::MissingIndex(format!(
                    "{}. To disable this check set 'indexRequired' to 'false'",
                    missing_index_detail(e)
                )));
            }
        }
    }
    Ok(())
}

/// Fails with [`FeaturesError::MissingIndex`] when no index on the table matches.
pub async fn assert_index_exists(
    pool: &SqlitePool,
    table_name: &str,
    columns: &str,
    index_match: IndexMatch,
) -> FeaturesResult<()> {
    let query = format!(
        r#"
select group_concat(info.name) as indexed_columns
from pragma_index_list('{}') as list,
     pragma_index_info(list.name) as info
group by list.name"#,
        table_name
    );
    let indexes: Vec<(Option<String>,)> = sqlx::query_as(&query)
        .fetch_all(pool)
        .await
        .map_err(|e| FeaturesError::MetadataError(format!("failed to read indexes from table '{}': {}", table_name, e)))?;

    let exists = indexes
        .iter()
        .filter_map(|(indexed,)| indexed.as_deref())
        .any(|indexed| index_match.matches(indexed, columns));
    if !exists {
        return Err(FeaturesError::MissingIndex(format!(
            "no index exists on column(s) '{}' in table '{}'",
            columns, table_name
        )));
    }
    Ok(())
}

fn missing_index_detail(e: FeaturesError) -> String {
    match e {
        FeaturesError::MissingIndex(detail) => detail,
        other => other.to_string(),
    }
}
