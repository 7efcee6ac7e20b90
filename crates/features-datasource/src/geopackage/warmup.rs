//! Best-effort warm-up of the spatial index pages.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tracing::{error, info};

use features_common::{FeaturesError, FeaturesResult};

use crate::common::FeatureTable;

use super::acquire_with_deadline;

/// Traverse the btree spatial index of every table in the background.
/// Failures only affect the latency of the first requests, so they are logged.
pub fn spawn_warm_up(pool: SqlitePool, tables: &HashMap<String, Arc<FeatureTable>>) -> JoinHandle<()> {
    let mut table_names: Vec<String> = tables.values().map(|t| t.table_name.clone()).collect();
    table_names.sort();
    table_names.dedup();

    tokio::spawn(async move {
        for table_name in table_names {
            if let Err(e) = warm_up_feature_table(&pool, &table_name).await {
                error!(error = %e, "warm-up failed");
            }
        }
    })
}

pub async fn warm_up_feature_table(pool: &SqlitePool, table_name: &str) -> FeaturesResult<()> {
    let query = format!(
        "select minx,maxx,miny,maxy from \"{}\" where minx <= 0 and maxx >= 0 and miny <= 0 and maxy >= 0",
        table_name
    );
    info!(table = table_name, "start warm-up of feature table");
    // no deadline, a full traversal may take a while
    let mut conn = acquire_with_deadline(pool, None).await?;
    sqlx::query(&query).execute(&mut *conn).await.map_err(|e| {
        FeaturesError::DatabaseError(format!("failed to warm-up feature table '{}': {}", table_name, e))
    })?;
    info!(table = table_name, "end warm-up of feature table");
    Ok(())
}
