//! Error taxonomy for the storage engine.
//!
//! Every fallible entry point returns [`EngineResult`]. Backend-specific
//! failures (`rusqlite`, JSON (de)serialization) are folded into
//! [`EngineError::Backend`] / [`EngineError::BadKey`] at the boundary via
//! `#[from]`, matching how `BeadsError` absorbs `rusqlite::Error` in the
//! teacher crate.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type EngineResult<T> = Result<T, EngineError>;

/// The error kinds described in the specification's error handling design.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `open` was attempted but no candidate backend could be opened.
    #[error("no backend available: {reasons}")]
    NoBackend { reasons: String },

    /// An operation referenced a store that is not part of the schema.
    #[error("unknown store: {name}")]
    UnknownStore { name: String },

    /// An operation referenced an index that is not part of the store.
    #[error("unknown index: {store}.{name}")]
    UnknownIndex { store: String, name: String },

    /// A query or commit was attempted against a transaction whose token has
    /// already been released.
    #[error("transaction already closed")]
    TransactionAlreadyClosed,

    /// The transaction was aborted (explicitly, or by a backend failure);
    /// every query still pending on it fails with this variant.
    #[error("transaction aborted: {reason}")]
    TransactionAborted { reason: String },

    /// A new transaction was requested while the provider is closing.
    #[error("database is closing")]
    Closing,

    /// Keypath extraction or serialization failed.
    #[error("bad key: {reason}")]
    BadKey { reason: String },

    /// A unique index constraint was violated.
    #[error("conflict: {reason}")]
    Conflict { reason: String },

    /// The persisted schema version exceeds the schema version supplied at
    /// open time and `wipe_if_exists` was false (after one automatic
    /// wipe-and-retry).
    #[error("incompatible schema: persisted version {persisted} > target {target}")]
    IncompatibleSchema { persisted: u32, target: u32 },

    /// Any other backend-reported failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(inner, ref msg) = err {
            if inner.code == rusqlite::ErrorCode::ConstraintViolation {
                return Self::Conflict {
                    reason: msg.clone().unwrap_or_else(|| inner.to_string()),
                };
            }
        }
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadKey {
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Backend(err.to_string())
    }
}
