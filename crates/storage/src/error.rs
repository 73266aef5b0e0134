//! Storage error types

use thiserror::Error;

/// Result type for storage operations
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Errors that can occur during database client operations
#[derive(Error, Debug)]
pub enum DbError {
    /// Missing or invalid configuration, or an unknown database name
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The database could not be reached
    #[error("Connection error for database '{database}': {message}")]
    Connection { database: String, message: String },

    /// Payload or filter columns that the target table does not have
    #[error("Schema mismatch for table '{table}': unknown column(s) {columns:?}")]
    SchemaMismatch { table: String, columns: Vec<String> },

    /// Schema reflection found no columns for the table
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Caller passed arguments that cannot be turned into a statement
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A dataframe column type with no PostgreSQL mapping
    #[error("Column '{column}' has unsupported type {dtype}")]
    UnsupportedType { column: String, dtype: String },

    /// No database has been initialized yet
    #[error("No active database. Call initialize() first")]
    NotInitialized,

    /// Errors raised by the driver (constraint violations, SQL errors, ...)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Errors raised by polars
    #[error("DataFrame error: {0}")]
    DataFrame(#[from] polars::error::PolarsError),
}

impl DbError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a connection error
    pub fn connection(database: impl Into<String>, msg: impl ToString) -> Self {
        Self::Connection {
            database: database.into(),
            message: msg.to_string(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Short, stable name of the variant for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Connection { .. } => "connection",
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::TableNotFound(_) => "table_not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::UnsupportedType { .. } => "unsupported_type",
            Self::NotInitialized => "not_initialized",
            Self::Database(_) => "database",
            Self::DataFrame(_) => "dataframe",
        }
    }

    /// Whether retrying the same call could succeed.
    ///
    /// Nothing in this crate retries; this is for callers that want to.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::SchemaMismatch {
            table: "public.prices".to_string(),
            columns: vec!["bogus".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Schema mismatch for table 'public.prices': unknown column(s) [\"bogus\"]"
        );

        let err = DbError::connection("analytics", "connection refused");
        assert_eq!(
            err.to_string(),
            "Connection error for database 'analytics': connection refused"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(DbError::connection("a", "down").is_retryable());
        assert!(DbError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!DbError::Database(sqlx::Error::RowNotFound).is_retryable());
        assert!(!DbError::configuration("missing").is_retryable());
        assert!(!DbError::NotInitialized.is_retryable());
    }

    #[test]
    fn test_kind() {
        assert_eq!(DbError::NotInitialized.kind(), "not_initialized");
        assert_eq!(DbError::TableNotFound("t".into()).kind(), "table_not_found");
    }
}
