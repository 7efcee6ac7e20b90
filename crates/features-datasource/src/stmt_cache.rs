//! LRU cache of prepared statements, shared by all requests of a datasource.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use sqlx::{Database, Executor, Pool};
use tokio::sync::Mutex;
use tracing::debug;

use features_common::{FeaturesError, FeaturesResult};

/// Default number of statements kept per datasource.
pub const DEFAULT_CAPACITY: usize = 15;

/// Cache of prepared statements keyed by SQL text.
///
/// The cache owns every statement it hands out. Statements are dropped,
/// releasing them, on eviction or [`PreparedStatementCache::close`].
pub struct PreparedStatementCache<DB: Database> {
    cache: Mutex<LruCache<String, Arc<DB::Statement<'static>>>>,
    stats: Mutex<CacheStats>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl<DB> PreparedStatementCache<DB>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: Executor<'c, Database = DB>,
{
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Get a prepared statement from the cache, or prepare and cache it.
    ///
    /// The lock is not held while preparing. When two requests prepare the
    /// same SQL at once, the statement cached first wins and is returned to both.
    pub async fn lookup(&self, pool: &Pool<DB>, sql: &str) -> FeaturesResult<Arc<DB::Statement<'static>>> {
        {
            let mut cache = self.cache.lock().await;
            if let Some(stmt) = cache.get(sql) {
                self.stats.lock().await.hits += 1;
                return Ok(stmt.clone());
            }
        }

        let prepared = pool
            .prepare(sql)
            .await
            .map_err(|e| FeaturesError::query(sql, (), format!("failed to prepare statement: {}", e)))?;
        let prepared = Arc::new(sqlx::Statement::to_owned(&prepared));

        let mut cache = self.cache.lock().await;
        if let Some(existing) = cache.get(sql) {
            return Ok(existing.clone());
        }
        let mut stats = self.stats.lock().await;
        stats.misses += 1;
        if let Some((evicted_sql, _)) = cache.push(sql.to_string(), prepared.clone()) {
            stats.evictions += 1;
            debug!(sql = %evicted_sql, "evicted prepared statement");
        }
        Ok(prepared)
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.lock().await.is_empty()
    }

    /// Drop all cached statements.
    pub async fn close(&self) {
        let mut cache = self.cache.lock().await;
        let count = cache.len();
        cache.clear();
        debug!(count, "closed prepared statements");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Row, Sqlite, SqlitePool, Statement};

    async fn pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_lookup_reuses_statement() {
        let pool = pool().await;
        let cache: PreparedStatementCache<Sqlite> = PreparedStatementCache::new(DEFAULT_CAPACITY);

        let first = cache.lookup(&pool, "select ?1 + 1").await.unwrap();
        let second = cache.lookup(&pool, "select ?1 + 1").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);

        let row = first.query().bind(41_i64).fetch_one(&pool).await.unwrap();
        assert_eq!(row.get::<i64, _>(0), 42);
    }

    #[tokio::test]
    async fn test_least_recently_used_is_evicted() {
        let pool = pool().await;
        let cache: PreparedStatementCache<Sqlite> = PreparedStatementCache::new(2);

        cache.lookup(&pool, "select 1").await.unwrap();
        cache.lookup(&pool, "select 2").await.unwrap();
        cache.lookup(&pool, "select 1").await.unwrap();
        cache.lookup(&pool, "select 3").await.unwrap();

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.stats().await.evictions, 1);

        // "select 2" was least recently used
        cache.lookup(&pool, "select 1").await.unwrap();
        assert_eq!(cache.stats().await.hits, 2);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_keep_one_statement() {
        let pool = pool().await;
        let cache: Arc<PreparedStatementCache<Sqlite>> = Arc::new(PreparedStatementCache::new(DEFAULT_CAPACITY));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                cache.lookup(&pool, "select 1").await.unwrap()
            }));
        }
        let mut statements = Vec::new();
        for handle in handles {
            statements.push(handle.await.unwrap());
        }

        assert_eq!(cache.len().await, 1);
        let cached = cache.lookup(&pool, "select 1").await.unwrap();
        assert!(statements.iter().all(|s| Arc::ptr_eq(s, &cached)));
    }

    #[tokio::test]
    async fn test_prepare_error_names_sql() {
        let pool = pool().await;
        let cache: PreparedStatementCache<Sqlite> = PreparedStatementCache::new(DEFAULT_CAPACITY);
        let err = cache.lookup(&pool, "select from nowhere").await.unwrap_err();
        assert!(err.to_string().contains("select from nowhere"));
    }

    #[tokio::test]
    async fn test_close_drains() {
        let pool = pool().await;
        let cache: PreparedStatementCache<Sqlite> = PreparedStatementCache::new(DEFAULT_CAPACITY);
        cache.lookup(&pool, "select 1").await.unwrap();
        cache.close().await;
        assert!(cache.is_empty().await);
    }
}
