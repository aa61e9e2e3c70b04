//! # Database Error Types
//!
//! Error types for local store operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)      Record checks (schema.rs)             │
//! │       │                                │                                │
//! │       ▼                                ▼                                │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncError::Store (in stocktag-sync) ← Logged by the failing duty      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Local store errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// A record lacks a field its collection requires.
    ///
    /// ## When This Occurs
    /// - `insert` or `upsert` with a record missing a required field
    /// - `upsert` with a record missing the identity field
    ///
    /// Nothing is written when this is returned.
    #[error("Schema violation in '{collection}': missing required field '{field}'")]
    SchemaViolation { collection: String, field: String },

    /// The record is not shaped like a record at all.
    ///
    /// ## When This Occurs
    /// - Record is not a JSON object (array, string, null, ...)
    #[error("Invalid record for '{collection}': {reason}")]
    InvalidRecord { collection: String, reason: String },

    /// The collection has no declared schema.
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file can't be created
    /// - File permissions issue
    /// - Disk full
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a SchemaViolation error.
    pub fn schema_violation(collection: impl Into<String>, field: impl Into<String>) -> Self {
        DbError::SchemaViolation {
            collection: collection.into(),
            field: field.into(),
        }
    }

    /// Returns true if the record itself was rejected, as opposed to the
    /// store failing.
    pub fn is_schema_violation(&self) -> bool {
        matches!(
            self,
            DbError::SchemaViolation { .. } | DbError::InvalidRecord { .. }
        )
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::Database       → DbError::QueryFailed
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// sqlx::Error::PoolClosed     → DbError::ConnectionFailed
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => DbError::QueryFailed(db_err.message().to_string()),

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// A stored body that no longer parses means the file was edited or
/// corrupted outside the store.
impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Internal(format!("Stored record is not valid JSON: {err}"))
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
