//! Core error types for hearth-core.
//!
//! Benign outcomes (a retried confirmation, a badge the user already holds)
//! are not errors; they are reported through [`crate::Transition`] and
//! [`crate::BadgeAward`]. Everything here is a genuine failure.

use std::path::PathBuf;
use rust_decimal::Decimal;
use thiserror::Error;

/// Core error type for hearth-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Unknown aggregate id (check-in, referral, ...)
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Non-positive amount where a positive one is required
    #[error("Invalid amount: {amount} (must be greater than zero)")]
    InvalidAmount { amount: Decimal },

    /// Payment sink rejected a transfer
    #[error("Payment transfer failed: {0}")]
    Payment(String),

    /// Emergency contact directory could not be read
    #[error("Contact directory error: {0}")]
    Directory(String),

    /// Deferred task could not be armed
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Key-value store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// A store mutex was poisoned by a panicking writer
    #[error("Store lock poisoned")]
    Poisoned,

    /// Compare-and-swap kept losing to concurrent writers
    #[error("Too much contention on key '{key}' after {attempts} attempts")]
    Contention { key: String, attempts: usize },

    /// Stored value does not decode as the expected aggregate
    #[error("Corrupt value under key '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Data directory could not be determined or created
    #[error("Failed to access data directory: {0}")]
    DataDir(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseLocked
                    || e.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    StoreError::Locked
                } else {
                    StoreError::QueryFailed(err.to_string())
                }
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::Poisoned
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
