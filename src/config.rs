//! Constructor-time capability and policy bundle for an opened database.
//!
//! Mirrors the teacher's `config::ConfigPaths` in spirit -- a small,
//! `serde`-friendly settings struct resolved once, before the database is
//! opened -- but scoped to engine capabilities (what the backend supports,
//! what to do about schema drift) rather than CLI file-path discovery.

use serde::{Deserialize, Serialize};

/// Default maximum number of bound SQL parameters per statement (spec §6).
pub const DEFAULT_MAX_VARIABLES: usize = 999;

/// Migration pagination byte target (spec §4.4).
pub const DB_MIGRATION_MAX_BYTE_TARGET: u64 = 1_000_000;

/// Default per-row byte estimate when a store schema doesn't specify one.
pub const DEFAULT_ESTIMATED_OBJ_BYTES: u32 = 200;

/// `SQLITE_MAX_SQL_LENGTH_IN_BYTES`, used to bound `remove`'s batch size
/// (spec §4.6/§6).
pub const SQLITE_MAX_SQL_LENGTH_IN_BYTES: usize = 1_000_000;

/// Ceiling any `limit` argument is clamped to (spec §4.7).
pub const QUERY_LIMIT_CEILING: u64 = 1 << 32;

/// Capability and policy flags resolved once at open time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of bound parameters the backend accepts per statement.
    pub max_variables: usize,
    /// Whether the backend can create FTS3 virtual tables. When false,
    /// full-text indexes degrade to `LIKE`-queried columns.
    pub supports_fts3: bool,
    /// Whether the backend supports concurrent discrete transactions (most
    /// browser-embedded KV stores do for readers; a single-writer SQL
    /// engine accessed through one connection does not).
    pub supports_concurrent_transactions: bool,
    /// If true, a persisted schema version below `lastUsableVersion`, or any
    /// other incompatible-schema condition, silently wipes all data instead
    /// of failing with `IncompatibleSchema`.
    pub wipe_if_exists: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_variables: DEFAULT_MAX_VARIABLES,
            supports_fts3: true,
            supports_concurrent_transactions: false,
            wipe_if_exists: false,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn for_sqlite() -> Self {
        Self {
            supports_fts3: true,
            supports_concurrent_transactions: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn for_memory() -> Self {
        Self {
            supports_fts3: false,
            supports_concurrent_transactions: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_wipe_if_exists(mut self, wipe: bool) -> Self {
        self.wipe_if_exists = wipe;
        self
    }
}
