//! Logging of executed SQL, for debugging and to spot slow queries.

use std::time::Duration;

use tracing::{debug, info, warn, Level};

use features_common::{FeaturesError, FeaturesResult};

use crate::sql::BindValue;

/// Log every executed query at info level when true.
pub const LOG_SQL_ENV: &str = "LOG_SQL";
/// Queries taking longer are logged as a warning, e.g. "5s" or "250ms".
pub const SLOW_QUERY_TIME_ENV: &str = "SLOW_QUERY_TIME";

pub const DEFAULT_SLOW_QUERY_TIME: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlLog {
    pub log_sql: bool,
    pub slow_query_time: Duration,
}

impl Default for SqlLog {
    fn default() -> Self {
        Self {
            log_sql: false,
            slow_query_time: DEFAULT_SLOW_QUERY_TIME,
        }
    }
}

impl SqlLog {
    pub fn from_env() -> FeaturesResult<Self> {
        let log_sql = std::env::var(LOG_SQL_ENV).ok();
        let slow_query_time = std::env::var(SLOW_QUERY_TIME_ENV).ok();
        Self::from_values(log_sql.as_deref(), slow_query_time.as_deref())
    }

    /// Empty or missing values fall back to the defaults.
    pub fn from_values(log_sql: Option<&str>, slow_query_time: Option<&str>) -> FeaturesResult<Self> {
        let mut sql_log = Self::default();
        if let Some(value) = log_sql.map(str::trim).filter(|v| !v.is_empty()) {
            sql_log.log_sql = match value.to_ascii_lowercase().as_str() {
                "1" | "t" | "true" => true,
                "0" | "f" | "false" => false,
                _ => {
                    return Err(FeaturesError::ConfigError(format!(
                        "invalid {} value provided, must be a boolean",
                        LOG_SQL_ENV
                    )))
                }
            };
        }
        if let Some(value) = slow_query_time.map(str::trim).filter(|v| !v.is_empty()) {
            sql_log.slow_query_time = parse_duration(value).ok_or_else(|| {
                FeaturesError::ConfigError(format!(
                    "invalid {} value provided, value such as '5s' expected",
                    SLOW_QUERY_TIME_ENV
                ))
            })?;
        }
        Ok(sql_log)
    }

    /// Level to log a query at: slow queries warn, everything else is debug unless `log_sql` is set.
    pub fn level(&self, elapsed: Duration) -> Level {
        if elapsed > self.slow_query_time {
            Level::WARN
        } else if self.log_sql {
            Level::INFO
        } else {
            Level::DEBUG
        }
    }

    /// Log a query once it has been executed.
    pub fn after(&self, sql: &str, params: &[BindValue], elapsed: Duration) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let level = self.level(elapsed);
        if level == Level::WARN {
            warn!(sql = %sql.trim(), params = ?params, elapsed_ms, "slow SQL query");
        } else if level == Level::INFO {
            info!(sql = %sql.trim(), params = ?params, elapsed_ms, "executed SQL query");
        } else {
            debug!(sql = %sql.trim(), params = ?params, elapsed_ms, "executed SQL query");
        }
    }
}

/// Parse "250ms", "5s", "1m" or a bare number of seconds.
fn parse_duration(value: &str) -> Option<Duration> {
    let (number, unit_secs) = if let Some(ms) = value.strip_suffix("ms") {
        (ms, 0.001)
    } else if let Some(s) = value.strip_suffix('s') {
        (s, 1.0)
    } else if let Some(m) = value.strip_suffix('m') {
        (m, 60.0)
    } else {
        (value, 1.0)
    };
    let number: f64 = number.trim().parse().ok()?;
    if !number.is_finite() || number < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(number * unit_secs))
}
