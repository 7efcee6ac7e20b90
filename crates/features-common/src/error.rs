//! Error types for feature retrieval.

use thiserror::Error;

/// Result type alias using FeaturesError.
pub type FeaturesResult<T> = Result<T, FeaturesError>;

/// Primary error type for feature queries and datasource setup.
#[derive(Debug, Error)]
pub enum FeaturesError {
    // === Lookup Errors ===
    #[error("collection '{collection}' doesn't exist in datasource, available in datasource: {available:?}")]
    CollectionNotFound {
        collection: String,
        available: Vec<String>,
    },

    #[error("Unsupported request: {0}")]
    Unsupported(String),

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    // === Query Errors ===
    #[error("Query timeout")]
    Timeout,

    #[error("failed to execute query '{sql}' with params {params}: {message}")]
    Query {
        sql: String,
        params: String,
        message: String,
    },

    #[error("Database error: {0}")]
    DatabaseError(String),

    // === Mapping Errors ===
    #[error("unexpected type: {column}: {type_name}")]
    UnexpectedType { column: String, type_name: String },

    #[error("failed to map/decode geometry from datasource, error: {0}")]
    GeometryDecode(String),

    #[error("Mapping error: {0}")]
    MappingError(String),

    // === Startup Errors ===
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("missing required index: {0}")]
    MissingIndex(String),

    #[error("Metadata error: {0}")]
    MetadataError(String),

    #[error("Projection error: {0}")]
    ProjectionError(String),
}

impl FeaturesError {
    /// Create a Query error, capturing the SQL and parameters for the logs.
    pub fn query(sql: impl Into<String>, params: impl std::fmt::Debug, message: impl ToString) -> Self {
        Self::Query {
            sql: sql.into(),
            params: format!("{:?}", params),
            message: message.to_string(),
        }
    }

    /// Whether the error was caused by the query deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, FeaturesError::Timeout)
    }

    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            FeaturesError::Unsupported(_) | FeaturesError::InvalidParameter { .. } => 400,

            FeaturesError::CollectionNotFound { .. } => 404,

            _ => 500,
        }
    }

    /// Message that is safe to return to a client for a failed collection query.
    ///
    /// Backend details stay in the logs.
    pub fn features_client_message(&self, collection_id: &str) -> String {
        match self {
            FeaturesError::CollectionNotFound { .. } => {
                format!("collection {} doesn't exist in this features service", collection_id)
            }
            FeaturesError::Unsupported(_) | FeaturesError::InvalidParameter { .. } => self.to_string(),
            FeaturesError::Timeout => format!(
                "failed to retrieve feature collection {}: querying the features took too long \
                 (timeout encountered). Simplify your request and try again, or contact support",
                collection_id
            ),
            _ => format!("failed to retrieve feature collection {}", collection_id),
        }
    }

    /// Message that is safe to return to a client for a failed single feature query.
    pub fn feature_client_message(&self, collection_id: &str, feature_id: &str) -> String {
        match self {
            FeaturesError::CollectionNotFound { .. } => {
                format!("collection {} doesn't exist in this features service", collection_id)
            }
            FeaturesError::Timeout => format!(
                "failed to retrieve feature {} in collection {}: querying the feature took too long \
                 (timeout encountered). Try again, or contact support",
                feature_id, collection_id
            ),
            _ => format!("failed to retrieve feature {} in collection {}", feature_id, collection_id),
        }
    }
}

impl From<serde_json::Error> for FeaturesError {
    fn from(err: serde_json::Error) -> Self {
        FeaturesError::MappingError(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_hints_to_simplify() {
        let msg = FeaturesError::Timeout.features_client_message("addresses");
        assert!(msg.starts_with("failed to retrieve feature collection addresses"));
        assert!(msg.contains("Simplify your request"));
    }

    #[test]
    fn test_query_error_hides_sql_from_client() {
        let err = FeaturesError::query("select * from secret_table", vec![1], "syntax error");
        assert!(err.to_string().contains("secret_table"));

        let msg = err.features_client_message("addresses");
        assert_eq!(msg, "failed to retrieve feature collection addresses");
        assert_eq!(err.http_status_code(), 500);
    }

    #[test]
    fn test_not_found_status() {
        let err = FeaturesError::CollectionNotFound {
            collection: "foo".to_string(),
            available: vec!["bar".to_string()],
        };
        assert_eq!(err.http_status_code(), 404);
    }
}
