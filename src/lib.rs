//! `docstore` - embeddable NoSQL-style document store with versioned schema
//! migration over pluggable backends.
//!
//! A `docstore` database is a set of named stores, each holding JSON
//! documents keyed by a (possibly compound) keypath, with zero or more
//! secondary indexes (unique, multi-entry, or full-text). Opening a database
//! against a [`schema::DbSchema`] diffs that schema against whatever is
//! already on disk and migrates in place; callers otherwise interact purely
//! through [`provider::Database`] (or [`memory::MemoryDatabase`]) and
//! [`provider::Transaction`].
//!
//! # Architecture
//!
//! - [`value`] / [`keypath`] - the `Item` document model and dotted-keypath
//!   traversal used to pull key and index values out of a document.
//! - [`keycodec`] - encodes key values (including compound keys) into
//!   lexically orderable strings.
//! - [`schema`] - `DbSchema`/`StoreSchema`/`IndexSchema`, the versioned shape
//!   of a database.
//! - [`backend`] - the `SqlTransaction` collaborator trait plus the catalog
//!   types migration reads back from a live connection, with a `rusqlite`
//!   adapter in [`backend::sqlite`].
//! - [`migration`] - the decision tree ([`migration::planner`]) and the SQL
//!   steps that execute a plan ([`migration::executor`]).
//! - [`store`] / [`index`] - the physical put/get/remove and secondary-index
//!   traversal operations over a single store.
//! - [`fulltext`] - phrase normalization and token extraction for full-text
//!   indexes.
//! - [`lock`] - the in-process transaction admission/eviction helper
//!   ([`lock::LockHelper`]) arbitrating overlapping store sets.
//! - [`config`] - [`config::EngineConfig`], the capability bundle resolved
//!   once at open time.
//! - [`error`] - [`error::EngineError`], the error taxonomy shared by every
//!   layer above.
//! - [`logging`] - `tracing`-based logging setup.
//! - [`provider`] - the public API surface: [`provider::Database`] (SQL-backed),
//!   [`provider::Transaction`], and [`provider::ProviderFallback`], which tries
//!   a list of backend candidates in order and commits to the first that
//!   opens successfully.
//! - [`memory`] - [`memory::MemoryDatabase`], a second, non-relational
//!   `DbProvider` candidate that never touches SQL or the migration planner.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_precision_loss,
    clippy::doc_markdown
)]

pub mod backend;
pub mod config;
pub mod error;
pub mod fulltext;
pub mod index;
pub mod keycodec;
pub mod keypath;
pub mod lock;
pub mod logging;
pub mod memory;
pub mod migration;
pub mod provider;
pub mod schema;
pub mod store;
pub mod value;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use memory::{MemoryDatabase, MemoryTransaction};
pub use provider::{Database, DbProvider, EngineTransaction, ProviderFallback, Transaction};
pub use schema::{DbSchema, IndexSchema, StoreSchema};
pub use value::{Item, KeyComponent, KeyOrKeys, KeyValue};
