//! Error types for the migration engine

use crate::backends::DbError;
use thiserror::Error;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The current schema state could not be determined; never guessed past
    #[error("Introspection failed for table '{table}': {message}")]
    Introspection { table: String, message: String },

    #[error("Migration {version} ({name}) failed to apply: {message}")]
    Apply {
        version: i64,
        name: String,
        message: String,
    },

    #[error("Migration {version} ({name}) failed to revert: {message}")]
    Revert {
        version: i64,
        name: String,
        message: String,
    },

    #[error("Duplicate migration version {version}: '{first}' and '{second}'")]
    DuplicateVersion {
        version: i64,
        first: String,
        second: String,
    },

    #[error("Duplicate migration name '{name}' (versions {first} and {second})")]
    DuplicateName { name: String, first: i64, second: i64 },

    /// A ledger row references a version the registry does not know
    #[error("Ledger entry {version} ({name}) has no matching migration in the registry")]
    UnknownVersionOnRevert { version: i64, name: String },

    #[error("No migration with version {version} is registered")]
    UnknownVersion { version: i64 },

    #[error("Migration {version} is registered as '{expected}', not '{given}'")]
    NameMismatch {
        version: i64,
        expected: String,
        given: String,
    },

    #[error("Migration {version} is already recorded as applied")]
    AlreadyApplied { version: i64 },

    #[error("Ledger error: {message}")]
    Ledger { message: String },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl MigrationError {
    /// Whether this error means the schema state was unknown
    pub fn is_introspection_failure(&self) -> bool {
        matches!(self, MigrationError::Introspection { .. })
    }

    /// Attribute a failure inside `apply` (or the ledger insert) to a unit.
    ///
    /// Introspection failures keep their own kind.
    pub(crate) fn into_apply_failure(self, version: i64, name: &str) -> Self {
        match self {
            err @ MigrationError::Introspection { .. } => err,
            err @ MigrationError::Apply { .. } => err,
            other => MigrationError::Apply {
                version,
                name: name.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Attribute a failure inside `revert` (or the ledger delete) to a unit
    pub(crate) fn into_revert_failure(self, version: i64, name: &str) -> Self {
        match self {
            err @ MigrationError::Introspection { .. } => err,
            err @ MigrationError::Revert { .. } => err,
            other => MigrationError::Revert {
                version,
                name: name.to_string(),
                message: other.to_string(),
            },
        }
    }
}
