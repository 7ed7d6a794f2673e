//! Error types for pgmap.
//!
//! Every driver failure is converted into a [`DbError`] exactly once, at the
//! gateway boundary (see [`crate::db::classify`]). Everything downstream
//! matches on the variant or on [`ErrorKind`], never on raw SQLSTATE codes.

use serde::Serialize;
use thiserror::Error;

/// Table/column context recovered from a constraint violation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConstraintContext {
    /// Raw constraint name as reported by the engine
    pub constraint: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    /// Target table of a foreign key
    pub referenced_table: Option<String>,
}

/// Closed taxonomy that callers match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    MoreThanOne,
    DuplicateKey,
    InvalidReference,
    SerializationFailure,
    DeadlockDetected,
    Unknown,
    MigrationVersionMismatch,
    MigrationHashMismatch,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Expected a row but the query returned none")]
    NotFound,

    #[error("Expected at most one row but the query returned {count}")]
    MoreThanOne { count: usize },

    #[error("Duplicate key: {message}")]
    DuplicateKey {
        message: String,
        context: ConstraintContext,
    },

    #[error("Invalid reference: {message}")]
    InvalidReference {
        message: String,
        context: ConstraintContext,
    },

    #[error("Serialization failure: {message}")]
    SerializationFailure { message: String },

    #[error("Deadlock detected: {message}")]
    DeadlockDetected { message: String },

    /// Driver error with a code this crate does not classify.
    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Migration version mismatch: {message}")]
    MigrationVersionMismatch { message: String },

    #[error(
        "Migration {version} hash mismatch: ledger has {recorded}, definition hashes to {computed}"
    )]
    MigrationHashMismatch {
        version: u32,
        recorded: String,
        computed: String,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an unclassified database error with optional SQL state.
    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
        }
    }

    pub fn serialization_failure(message: impl Into<String>) -> Self {
        Self::SerializationFailure {
            message: message.into(),
        }
    }

    pub fn deadlock_detected(message: impl Into<String>) -> Self {
        Self::DeadlockDetected {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    pub fn version_mismatch(message: impl Into<String>) -> Self {
        Self::MigrationVersionMismatch {
            message: message.into(),
        }
    }

    pub fn hash_mismatch(
        version: u32,
        recorded: impl Into<String>,
        computed: impl Into<String>,
    ) -> Self {
        Self::MigrationHashMismatch {
            version,
            recorded: recorded.into(),
            computed: computed.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::MoreThanOne { .. } => ErrorKind::MoreThanOne,
            Self::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            Self::InvalidReference { .. } => ErrorKind::InvalidReference,
            Self::SerializationFailure { .. } => ErrorKind::SerializationFailure,
            Self::DeadlockDetected { .. } => ErrorKind::DeadlockDetected,
            Self::MigrationVersionMismatch { .. } => ErrorKind::MigrationVersionMismatch,
            Self::MigrationHashMismatch { .. } => ErrorKind::MigrationHashMismatch,
            Self::Database { .. }
            | Self::Connection { .. }
            | Self::Timeout { .. }
            | Self::InvalidInput { .. }
            | Self::Decode { .. }
            | Self::Internal { .. } => ErrorKind::Unknown,
        }
    }

    /// Constraint context for duplicate-key and invalid-reference errors.
    pub fn constraint(&self) -> Option<&ConstraintContext> {
        match self {
            Self::DuplicateKey { context, .. } | Self::InvalidReference { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Transient contention errors that a transaction may be retried on.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SerializationFailure | ErrorKind::DeadlockDetected
        )
    }

    /// Corrupted or drifted migration history. Never retried.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MigrationVersionMismatch | ErrorKind::MigrationHashMismatch
        )
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => crate::db::classify::classify(
                crate::db::classify::DriverError::from_database_error(db_err.as_ref()),
            ),
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out waiting for a pooled connection",
                "Raise acquire_timeout or max_connections in the connection string",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::decode(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::decode(source.to_string()),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::decode(err.to_string())
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
