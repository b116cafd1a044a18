//! Error types for the table synchronizer
//!
//! Two-level taxonomy: [`ConfigurationError`] for pre-flight failures
//! (raised before any DML is attempted) and [`SyncError`] for runtime
//! failures during DDL, load, hash, index, or apply phases. [`Error`]
//! unifies both for the public [`crate::sync`] entry point.

use thiserror::Error;

/// Result type returned while constructing a [`crate::config::Config`].
pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;

/// Result type returned by [`crate::sync`] and its internal phases.
pub type Result<T> = std::result::Result<T, Error>;

/// Pre-flight failures: invalid config maps, missing source object,
/// live-table column missing or type-incompatible. Raised before any DML.
/// The caller should fix configuration and retry.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("primary_key_column_map must contain at least one pair")]
    EmptyPrimaryKeyMap,

    #[error("primary key source column '{0}' is not present in data_column_mapping")]
    PrimaryKeyNotInDataMap(String),

    #[error(
        "primary key source column '{source}' maps to target '{pk_target}' in primary_key_column_map \
         but to target '{data_target}' in data_column_mapping"
    )]
    PrimaryKeyTargetMismatch {
        source: String,
        pk_target: String,
        data_target: String,
    },

    #[error("hash-source column '{0}' is not present in data_column_mapping")]
    HashColumnNotInDataMap(String),

    #[error("non-nullable datetime source column '{0}' is not present in data_column_mapping")]
    DatetimeColumnNotInDataMap(String),

    #[error("columns_for_content_hash must not be empty")]
    EmptyContentHashColumns,

    #[error("duplicate target column name '{0}' across metadata and data columns")]
    DuplicateTargetColumn(String),

    #[error("identifier must not be empty: {0}")]
    EmptyIdentifier(&'static str),

    #[error("source object '{object}' not found as a table or view on source database '{database}'")]
    SourceObjectNotFound { object: String, database: String },

    #[error("live table '{table}' is missing expected column '{column}'")]
    LiveTableMissingColumn { table: String, column: String },

    #[error(
        "live table '{table}' column '{column}' has an incompatible type: expected {expected}, found {actual}"
    )]
    LiveTableTypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },

    #[error("unsupported or undetectable SQL dialect: {0}")]
    UnsupportedDialect(String),

    #[error("database error during pre-flight validation: {0}")]
    Database(#[from] sqlx::Error),
}

/// Runtime failures during DDL, load, hash, index, or apply phases. Wraps
/// the underlying cause. The engine attempts best-effort temp-table
/// cleanup before this propagates out of [`crate::sync`].
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("schema phase failed on table '{table}': {source}")]
    Schema {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("index phase failed on table '{table}': {source}")]
    Index {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("load phase failed after {rows_loaded} row(s) were loaded into '{table}': {source}")]
    Load {
        table: String,
        rows_loaded: u64,
        #[source]
        source: sqlx::Error,
    },

    #[error("hash phase failed on table '{table}': {source}")]
    Hash {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("apply phase '{phase}' failed on table '{table}': {source}")]
    Apply {
        phase: &'static str,
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to {action} transaction during phase '{phase}': {source}")]
    Transaction {
        phase: &'static str,
        action: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

/// Unifies [`ConfigurationError`] and [`SyncError`] for [`crate::sync`]'s
/// return type.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}
