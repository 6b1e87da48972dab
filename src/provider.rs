//! The public `Database`/`Transaction` API tying together [`LockHelper`],
//! the SQL backend, [`crate::migration::planner`]/[`crate::migration::executor`],
//! [`crate::store`], and [`crate::index`] (spec §3, §5). Also
//! [`ProviderFallback`] (spec §4.2: try backend candidates in order and use
//! the first that opens).
//!
//! [`Transaction`] implements [`SqlTransaction`] directly on the type that
//! holds the `MutexGuard`, rather than wrapping `rusqlite::Transaction`'s
//! `&mut Connection`-borrowing type: the guard is held for the whole
//! logical transaction and `BEGIN`/`COMMIT`/`ROLLBACK` are issued as plain
//! SQL text through it. This sidesteps a self-referential struct (a guard
//! plus a nested borrow of the data behind it, bundled together) while
//! still giving every store/index helper the same `&dyn SqlTransaction`
//! they're written against. See DESIGN.md for the full rationale.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::ToSql;
use tracing::{info, warn};

use crate::backend::sqlite::{self, SqliteTransaction};
use crate::backend::{CatalogEntry, SqlParam, SqlRow, SqlTransaction};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::index::{self, Order, Resolution};
use crate::keycodec;
use crate::lock::{LockHelper, LockToken, StoreSet};
use crate::migration::{executor, planner, read_metadata};
use crate::schema::{DbSchema, IndexSchema, StoreSchema};
use crate::store;
use crate::value::Item;

/// An opened database: schema, capability config, the lock manager, and
/// the single backing connection.
pub struct Database {
    schema: DbSchema,
    config: EngineConfig,
    lock: LockHelper,
    conn: Mutex<rusqlite::Connection>,
}

impl Database {
    /// Open (creating if absent) a database file at `path`, migrating
    /// synchronously within one exclusive transaction if the persisted
    /// schema disagrees with `schema` (spec §3 Lifecycles, §4.4-4.5).
    ///
    /// # Errors
    ///
    /// Returns `IncompatibleSchema` if the persisted version is newer than
    /// `schema.version` and `config.wipe_if_exists` is false (after one
    /// automatic wipe-and-retry, per the Open Question resolution in
    /// DESIGN.md), or any backend/validation error.
    pub fn open(path: &Path, schema: DbSchema, config: EngineConfig) -> EngineResult<Self> {
        schema.validate()?;
        let mut conn = sqlite::open_connection(path)?;
        migrate(&mut conn, &schema, &config)?;
        Self::from_parts(conn, schema, config)
    }

    /// Open a private, ephemeral in-memory SQLite database. Distinct from
    /// [`crate::memory::MemoryDatabase`], which is a second,
    /// non-relational [`DbProvider`] candidate for [`ProviderFallback`]
    /// rather than a SQLite connection string.
    ///
    /// # Errors
    ///
    /// See [`Self::open`].
    pub fn open_memory(schema: DbSchema, config: EngineConfig) -> EngineResult<Self> {
        schema.validate()?;
        let mut conn = sqlite::open_memory_connection()?;
        migrate(&mut conn, &schema, &config)?;
        Self::from_parts(conn, schema, config)
    }

    fn from_parts(conn: rusqlite::Connection, schema: DbSchema, config: EngineConfig) -> EngineResult<Self> {
        let known_stores = schema.stores.iter().map(|s| s.name.clone()).collect();
        let lock = LockHelper::new(known_stores, config.supports_concurrent_transactions);
        Ok(Self {
            schema,
            config,
            lock,
            conn: Mutex::new(conn),
        })
    }

    #[must_use]
    pub fn schema(&self) -> &DbSchema {
        &self.schema
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open a transaction touching `store_set`, blocking until admitted
    /// (spec §4.2 `openTransaction`).
    ///
    /// # Errors
    ///
    /// `UnknownStore` / `Closing`, per [`LockHelper::open_transaction`], or
    /// a backend error starting the SQL transaction.
    pub fn transaction(&self, store_set: StoreSet, exclusive: bool) -> EngineResult<Transaction<'_>> {
        let token = self.lock.open_transaction(&store_set, exclusive)?;
        let guard = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let begin = if exclusive { "BEGIN IMMEDIATE" } else { "BEGIN DEFERRED" };
        if let Err(err) = guard.execute_batch(begin) {
            let engine_err: EngineError = err.into();
            self.lock.transaction_failed(token, &engine_err.to_string());
            return Err(engine_err);
        }
        Ok(Transaction {
            db: self,
            token: Some(token),
            guard,
            done: false,
        })
    }

    /// Convenience: open a readonly transaction over exactly one store.
    ///
    /// # Errors
    ///
    /// See [`Self::transaction`].
    pub fn read_transaction(&self, store: impl Into<String>) -> EngineResult<Transaction<'_>> {
        self.transaction(StoreSet::Named(vec![store.into()]), false)
    }

    /// Convenience: open an exclusive transaction over exactly one store.
    ///
    /// # Errors
    ///
    /// See [`Self::transaction`].
    pub fn write_transaction(&self, store: impl Into<String>) -> EngineResult<Transaction<'_>> {
        self.transaction(StoreSet::Named(vec![store.into()]), true)
    }

    /// Stop admitting new transactions and block until every outstanding
    /// one has completed or failed.
    pub fn close(&self) {
        self.lock.close_when_possible();
    }
}

/// Attempt migration; on an incompatible-newer-version failure with
/// `wipe_if_exists` not already set, retry exactly once with a forced wipe
/// (the "single retry" Open-Question resolution -- see DESIGN.md).
fn migrate(conn: &mut rusqlite::Connection, schema: &DbSchema, config: &EngineConfig) -> EngineResult<()> {
    match try_migrate(conn, schema, config) {
        Ok(()) => Ok(()),
        Err(EngineError::IncompatibleSchema { persisted, target }) if !config.wipe_if_exists => {
            warn!(persisted, target, "persisted schema newer than target; retrying once with a forced wipe");
            let retry_config = EngineConfig {
                wipe_if_exists: true,
                ..config.clone()
            };
            try_migrate(conn, schema, &retry_config)
        }
        Err(e) => Err(e),
    }
}

fn try_migrate(conn: &mut rusqlite::Connection, schema: &DbSchema, config: &EngineConfig) -> EngineResult<()> {
    let tx = conn.transaction()?;
    let wrapped = SqliteTransaction::new(tx);

    let metadata = read_metadata(&wrapped)?;
    if let Some(persisted) = metadata.schema_version {
        if persisted > schema.version && !config.wipe_if_exists {
            return Err(EngineError::IncompatibleSchema {
                persisted,
                target: schema.version,
            });
        }
    }

    let catalog = wrapped.catalog()?;
    let plan = planner::plan_migration(schema, &metadata, &catalog, config);
    executor::execute_migration(&wrapped, &metadata, &plan, config)?;
    info!(version = plan.target_version, wipe_first = plan.wipe_first, "migration applied");
    wrapped.commit()
}

/// A logical transaction: an admitted [`LockToken`] plus the held
/// [`std::sync::MutexGuard`] over the single backing connection.
///
/// Drops without a `commit()` roll back and report the transaction as
/// failed, so a thread unwinding mid-transaction never leaves its locks
/// dangling.
pub struct Transaction<'db> {
    db: &'db Database,
    token: Option<LockToken>,
    guard: std::sync::MutexGuard<'db, rusqlite::Connection>,
    done: bool,
}

impl SqlTransaction for Transaction<'_> {
    fn execute(&self, sql: &str, params: &[SqlParam]) -> EngineResult<usize> {
        let bound: Vec<Box<dyn ToSql + '_>> = params.iter().map(sqlite::to_rusqlite).collect();
        let refs: Vec<&dyn ToSql> = bound.iter().map(AsRef::as_ref).collect();
        self.guard.execute(sql, refs.as_slice()).map_err(Into::into)
    }

    fn run_query(&self, sql: &str, params: &[SqlParam]) -> EngineResult<Vec<SqlRow>> {
        let bound: Vec<Box<dyn ToSql + '_>> = params.iter().map(sqlite::to_rusqlite).collect();
        let refs: Vec<&dyn ToSql> = bound.iter().map(AsRef::as_ref).collect();
        let mut stmt = self.guard.prepare(sql)?;
        let column_count = stmt.column_count();
        let rows = stmt
            .query_map(refs.as_slice(), |row| sqlite::row_to_strings(row, column_count))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn catalog(&self) -> EngineResult<Vec<CatalogEntry>> {
        sqlite::read_catalog(&self.guard)
    }
}

impl Transaction<'_> {
    /// Commit and release this transaction's locks.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend `COMMIT` fails.
    pub fn commit(mut self) -> EngineResult<()> {
        let result = self.guard.execute_batch("COMMIT").map_err(EngineError::from);
        self.done = true;
        if let Some(token) = self.token.take() {
            match &result {
                Ok(()) => self.db.lock.transaction_complete(token),
                Err(e) => self.db.lock.transaction_failed(token, &e.to_string()),
            }
        }
        result
    }

    /// Roll back and release this transaction's locks.
    pub fn abort(mut self) {
        let _ = self.guard.execute_batch("ROLLBACK");
        self.done = true;
        if let Some(token) = self.token.take() {
            self.db.lock.transaction_failed(token, "aborted");
        }
    }

    fn store_schema(&self, store: &str) -> EngineResult<&StoreSchema> {
        self.db.schema.store(store).ok_or_else(|| EngineError::UnknownStore { name: store.to_string() })
    }

    fn index_schema<'s>(&self, store: &'s StoreSchema, index: &str) -> EngineResult<&'s IndexSchema> {
        store.index(index).ok_or_else(|| EngineError::UnknownIndex {
            store: store.name.clone(),
            name: index.to_string(),
        })
    }

    /// `put(items)` (spec §4.6).
    ///
    /// # Errors
    ///
    /// See [`store::put`].
    pub fn put(&self, store_name: &str, items: &[Item]) -> EngineResult<()> {
        let store = self.store_schema(store_name)?;
        store::put(self, store, items, &self.db.config)
    }

    /// `get(key)`.
    ///
    /// # Errors
    ///
    /// See [`store::get`], plus `BadKey` if `key`'s shape doesn't match the
    /// store's primary key path.
    pub fn get(&self, store_name: &str, key: &serde_json::Value) -> EngineResult<Option<Item>> {
        let store = self.store_schema(store_name)?;
        let serialized = keycodec::serialize_literal_key(&store.primary_key_path, key)?;
        store::get(self, store, &serialized)
    }

    /// `getMultiple(keys)`.
    ///
    /// # Errors
    ///
    /// See [`store::get_multiple`].
    pub fn get_multiple(&self, store_name: &str, keys: &[serde_json::Value]) -> EngineResult<Vec<Item>> {
        let store = self.store_schema(store_name)?;
        let serialized = keys
            .iter()
            .map(|k| keycodec::serialize_literal_key(&store.primary_key_path, k))
            .collect::<EngineResult<Vec<_>>>()?;
        store::get_multiple(self, store, &serialized, &self.db.config)
    }

    /// `remove(keys)`.
    ///
    /// # Errors
    ///
    /// See [`store::remove`].
    pub fn remove(&self, store_name: &str, keys: &[serde_json::Value]) -> EngineResult<()> {
        let store = self.store_schema(store_name)?;
        let serialized = keys
            .iter()
            .map(|k| keycodec::serialize_literal_key(&store.primary_key_path, k))
            .collect::<EngineResult<Vec<_>>>()?;
        store::remove(self, store, &serialized, &self.db.config)
    }

    /// `removeRange(indexName, low, high, lowExcl, highExcl)`.
    ///
    /// # Errors
    ///
    /// See [`store::remove_range`].
    #[allow(clippy::too_many_arguments)]
    pub fn remove_range(
        &self,
        store_name: &str,
        index_name: Option<&str>,
        lo: Option<&serde_json::Value>,
        hi: Option<&serde_json::Value>,
        lo_excl: bool,
        hi_excl: bool,
    ) -> EngineResult<()> {
        let store = self.store_schema(store_name)?;
        let index = index_name.map(|n| self.index_schema(store, n)).transpose()?;
        let keypath = index.map_or_else(|| store.primary_key_path.clone(), IndexSchema::key_path);
        let lo_s = lo.map(|v| keycodec::serialize_literal_key(&keypath, v)).transpose()?;
        let hi_s = hi.map(|v| keycodec::serialize_literal_key(&keypath, v)).transpose()?;
        store::remove_range(self, store, index, &self.db.config, lo_s.as_deref(), hi_s.as_deref(), lo_excl, hi_excl)
    }

    /// `clearAllData()`.
    ///
    /// # Errors
    ///
    /// See [`store::clear_all_data`].
    pub fn clear_all_data(&self, store_name: &str) -> EngineResult<()> {
        let store = self.store_schema(store_name)?;
        store::clear_all_data(self, store, &self.db.config)
    }

    /// `getAll(order, limit, offset)`, against `index_name` or, when
    /// `None`, the primary key.
    ///
    /// # Errors
    ///
    /// See [`index::get_all`].
    pub fn get_all(
        &self,
        store_name: &str,
        index_name: Option<&str>,
        order: Order,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> EngineResult<Vec<Item>> {
        let store = self.store_schema(store_name)?;
        let index = index_name.map(|n| self.index_schema(store, n)).transpose()?;
        index::get_all(self, store, index, &self.db.config, order, limit, offset)
    }

    /// `getOnly(key, order, limit, offset)`.
    ///
    /// # Errors
    ///
    /// See [`index::get_only`].
    pub fn get_only(
        &self,
        store_name: &str,
        index_name: Option<&str>,
        key: &serde_json::Value,
        order: Order,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> EngineResult<Vec<Item>> {
        let store = self.store_schema(store_name)?;
        let index = index_name.map(|n| self.index_schema(store, n)).transpose()?;
        let keypath = index.map_or_else(|| store.primary_key_path.clone(), IndexSchema::key_path);
        let serialized = keycodec::serialize_literal_key(&keypath, key)?;
        index::get_only(self, store, index, &self.db.config, &serialized, order, limit, offset)
    }

    /// `getRange(low, high, lowExcl, highExcl, order, limit, offset)`.
    ///
    /// # Errors
    ///
    /// See [`index::get_range`].
    #[allow(clippy::too_many_arguments)]
    pub fn get_range(
        &self,
        store_name: &str,
        index_name: Option<&str>,
        lo: Option<&serde_json::Value>,
        hi: Option<&serde_json::Value>,
        lo_excl: bool,
        hi_excl: bool,
        order: Order,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> EngineResult<Vec<Item>> {
        let store = self.store_schema(store_name)?;
        let index = index_name.map(|n| self.index_schema(store, n)).transpose()?;
        let keypath = index.map_or_else(|| store.primary_key_path.clone(), IndexSchema::key_path);
        let lo_s = lo.map(|v| keycodec::serialize_literal_key(&keypath, v)).transpose()?;
        let hi_s = hi.map(|v| keycodec::serialize_literal_key(&keypath, v)).transpose()?;
        index::get_range(
            self,
            store,
            index,
            &self.db.config,
            lo_s.as_deref(),
            hi_s.as_deref(),
            lo_excl,
            hi_excl,
            order,
            limit,
            offset,
        )
    }

    /// `countAll()`.
    ///
    /// # Errors
    ///
    /// See [`index::count_all`].
    pub fn count_all(&self, store_name: &str, index_name: Option<&str>) -> EngineResult<u64> {
        let store = self.store_schema(store_name)?;
        let index = index_name.map(|n| self.index_schema(store, n)).transpose()?;
        index::count_all(self, store, index, &self.db.config)
    }

    /// `countOnly(key)`.
    ///
    /// # Errors
    ///
    /// See [`index::count_only`].
    pub fn count_only(&self, store_name: &str, index_name: Option<&str>, key: &serde_json::Value) -> EngineResult<u64> {
        let store = self.store_schema(store_name)?;
        let index = index_name.map(|n| self.index_schema(store, n)).transpose()?;
        let keypath = index.map_or_else(|| store.primary_key_path.clone(), IndexSchema::key_path);
        let serialized = keycodec::serialize_literal_key(&keypath, key)?;
        index::count_only(self, store, index, &self.db.config, &serialized)
    }

    /// `countRange(low, high, lowExcl, highExcl)`.
    ///
    /// # Errors
    ///
    /// See [`index::count_range`].
    pub fn count_range(
        &self,
        store_name: &str,
        index_name: Option<&str>,
        lo: Option<&serde_json::Value>,
        hi: Option<&serde_json::Value>,
        lo_excl: bool,
        hi_excl: bool,
    ) -> EngineResult<u64> {
        let store = self.store_schema(store_name)?;
        let index = index_name.map(|n| self.index_schema(store, n)).transpose()?;
        let keypath = index.map_or_else(|| store.primary_key_path.clone(), IndexSchema::key_path);
        let lo_s = lo.map(|v| keycodec::serialize_literal_key(&keypath, v)).transpose()?;
        let hi_s = hi.map(|v| keycodec::serialize_literal_key(&keypath, v)).transpose()?;
        index::count_range(self, store, index, &self.db.config, lo_s.as_deref(), hi_s.as_deref(), lo_excl, hi_excl)
    }

    /// `fullTextSearch(phrase, resolution, limit)`.
    ///
    /// # Errors
    ///
    /// See [`index::full_text_search`].
    pub fn full_text_search(
        &self,
        store_name: &str,
        index_name: &str,
        phrase: &str,
        resolution: Resolution,
        limit: Option<u64>,
    ) -> EngineResult<Vec<Item>> {
        let store = self.store_schema(store_name)?;
        let index = self.index_schema(store, index_name)?;
        index::full_text_search(self, store, index, &self.db.config, phrase, resolution, limit)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let _ = self.guard.execute_batch("ROLLBACK");
        if let Some(token) = self.token.take() {
            self.db.lock.transaction_failed(token, "dropped without commit");
        }
    }
}

/// Object-safe transaction surface, letting [`ProviderFallback`] hand back
/// a uniform handle regardless of which concrete backend opened. Mirrors
/// [`Transaction`]'s ergonomic methods one-for-one.
#[allow(clippy::too_many_arguments)]
pub trait EngineTransaction {
    fn put(&self, store: &str, items: &[Item]) -> EngineResult<()>;
    fn get(&self, store: &str, key: &serde_json::Value) -> EngineResult<Option<Item>>;
    fn get_multiple(&self, store: &str, keys: &[serde_json::Value]) -> EngineResult<Vec<Item>>;
    fn remove(&self, store: &str, keys: &[serde_json::Value]) -> EngineResult<()>;
    fn remove_range(
        &self,
        store: &str,
        index: Option<&str>,
        lo: Option<&serde_json::Value>,
        hi: Option<&serde_json::Value>,
        lo_excl: bool,
        hi_excl: bool,
    ) -> EngineResult<()>;
    fn clear_all_data(&self, store: &str) -> EngineResult<()>;
    fn get_all(&self, store: &str, index: Option<&str>, order: Order, limit: Option<u64>, offset: Option<u64>) -> EngineResult<Vec<Item>>;
    fn get_only(
        &self,
        store: &str,
        index: Option<&str>,
        key: &serde_json::Value,
        order: Order,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> EngineResult<Vec<Item>>;
    fn get_range(
        &self,
        store: &str,
        index: Option<&str>,
        lo: Option<&serde_json::Value>,
        hi: Option<&serde_json::Value>,
        lo_excl: bool,
        hi_excl: bool,
        order: Order,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> EngineResult<Vec<Item>>;
    fn count_all(&self, store: &str, index: Option<&str>) -> EngineResult<u64>;
    fn count_only(&self, store: &str, index: Option<&str>, key: &serde_json::Value) -> EngineResult<u64>;
    fn count_range(
        &self,
        store: &str,
        index: Option<&str>,
        lo: Option<&serde_json::Value>,
        hi: Option<&serde_json::Value>,
        lo_excl: bool,
        hi_excl: bool,
    ) -> EngineResult<u64>;
    fn full_text_search(&self, store: &str, index: &str, phrase: &str, resolution: Resolution, limit: Option<u64>) -> EngineResult<Vec<Item>>;
    fn commit(self: Box<Self>) -> EngineResult<()>;
    fn abort(self: Box<Self>);
}

impl EngineTransaction for Transaction<'_> {
    fn put(&self, store: &str, items: &[Item]) -> EngineResult<()> {
        Transaction::put(self, store, items)
    }
    fn get(&self, store: &str, key: &serde_json::Value) -> EngineResult<Option<Item>> {
        Transaction::get(self, store, key)
    }
    fn get_multiple(&self, store: &str, keys: &[serde_json::Value]) -> EngineResult<Vec<Item>> {
        Transaction::get_multiple(self, store, keys)
    }
    fn remove(&self, store: &str, keys: &[serde_json::Value]) -> EngineResult<()> {
        Transaction::remove(self, store, keys)
    }
    fn remove_range(
        &self,
        store: &str,
        index: Option<&str>,
        lo: Option<&serde_json::Value>,
        hi: Option<&serde_json::Value>,
        lo_excl: bool,
        hi_excl: bool,
    ) -> EngineResult<()> {
        Transaction::remove_range(self, store, index, lo, hi, lo_excl, hi_excl)
    }
    fn clear_all_data(&self, store: &str) -> EngineResult<()> {
        Transaction::clear_all_data(self, store)
    }
    fn get_all(&self, store: &str, index: Option<&str>, order: Order, limit: Option<u64>, offset: Option<u64>) -> EngineResult<Vec<Item>> {
        Transaction::get_all(self, store, index, order, limit, offset)
    }
    fn get_only(
        &self,
        store: &str,
        index: Option<&str>,
        key: &serde_json::Value,
        order: Order,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> EngineResult<Vec<Item>> {
        Transaction::get_only(self, store, index, key, order, limit, offset)
    }
    fn get_range(
        &self,
        store: &str,
        index: Option<&str>,
        lo: Option<&serde_json::Value>,
        hi: Option<&serde_json::Value>,
        lo_excl: bool,
        hi_excl: bool,
        order: Order,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> EngineResult<Vec<Item>> {
        Transaction::get_range(self, store, index, lo, hi, lo_excl, hi_excl, order, limit, offset)
    }
    fn count_all(&self, store: &str, index: Option<&str>) -> EngineResult<u64> {
        Transaction::count_all(self, store, index)
    }
    fn count_only(&self, store: &str, index: Option<&str>, key: &serde_json::Value) -> EngineResult<u64> {
        Transaction::count_only(self, store, index, key)
    }
    fn count_range(
        &self,
        store: &str,
        index: Option<&str>,
        lo: Option<&serde_json::Value>,
        hi: Option<&serde_json::Value>,
        lo_excl: bool,
        hi_excl: bool,
    ) -> EngineResult<u64> {
        Transaction::count_range(self, store, index, lo, hi, lo_excl, hi_excl)
    }
    fn full_text_search(&self, store: &str, index: &str, phrase: &str, resolution: Resolution, limit: Option<u64>) -> EngineResult<Vec<Item>> {
        Transaction::full_text_search(self, store, index, phrase, resolution, limit)
    }
    fn commit(self: Box<Self>) -> EngineResult<()> {
        Transaction::commit(*self)
    }
    fn abort(self: Box<Self>) {
        Transaction::abort(*self);
    }
}

/// Object-safe database-open surface for [`ProviderFallback`]: every
/// concrete backend (the SQL-backed [`Database`], the in-memory
/// [`crate::memory::MemoryDatabase`]) implements this.
pub trait DbProvider {
    fn db_transaction<'a>(&'a self, store_set: StoreSet, exclusive: bool) -> EngineResult<Box<dyn EngineTransaction + 'a>>;
    fn db_schema(&self) -> &DbSchema;
    fn db_close(&self);
}

impl DbProvider for Database {
    fn db_transaction<'a>(&'a self, store_set: StoreSet, exclusive: bool) -> EngineResult<Box<dyn EngineTransaction + 'a>> {
        Ok(Box::new(self.transaction(store_set, exclusive)?))
    }
    fn db_schema(&self) -> &DbSchema {
        self.schema()
    }
    fn db_close(&self) {
        self.close();
    }
}

/// Tries backend candidates in order, opening the first that succeeds
/// (spec §4.2's "provider fallback").
pub struct ProviderFallback {
    backend: Box<dyn DbProvider>,
}

impl ProviderFallback {
    /// Try each candidate in order, keeping the first that opens
    /// successfully.
    ///
    /// # Errors
    ///
    /// Returns `NoBackend`, joining every candidate's failure reason, if
    /// every candidate fails.
    pub fn open(candidates: Vec<Box<dyn FnOnce() -> EngineResult<Box<dyn DbProvider>>>>) -> EngineResult<Self> {
        let mut reasons = Vec::new();
        for candidate in candidates {
            match candidate() {
                Ok(backend) => return Ok(Self { backend }),
                Err(e) => {
                    warn!(error = %e, "backend candidate failed, trying next");
                    reasons.push(e.to_string());
                }
            }
        }
        Err(EngineError::NoBackend { reasons: reasons.join("; ") })
    }

    #[must_use]
    pub fn schema(&self) -> &DbSchema {
        self.backend.db_schema()
    }

    /// # Errors
    ///
    /// See [`DbProvider::db_transaction`].
    pub fn transaction(&self, store_set: StoreSet, exclusive: bool) -> EngineResult<Box<dyn EngineTransaction + '_>> {
        self.backend.db_transaction(store_set, exclusive)
    }

    pub fn close(&self) {
        self.backend.db_close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypath::KeyPath;
    use serde_json::json;

    fn schema() -> DbSchema {
        DbSchema {
            version: 1,
            last_usable_version: None,
            stores: vec![StoreSchema::new("widgets", KeyPath::single("id")).with_index(IndexSchema::new("by_v", KeyPath::single("v")))],
        }
    }

    #[test]
    fn open_put_get_commit_round_trips() {
        let db = Database::open_memory(schema(), EngineConfig::for_sqlite()).unwrap();
        let tx = db.write_transaction("widgets").unwrap();
        tx.put("widgets", &[json!({"id": "k1", "v": 5})]).unwrap();
        tx.commit().unwrap();

        let tx = db.read_transaction("widgets").unwrap();
        let item = tx.get("widgets", &json!("k1")).unwrap();
        assert_eq!(item, Some(json!({"id": "k1", "v": 5})));
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let db = Database::open_memory(schema(), EngineConfig::for_sqlite()).unwrap();
        {
            let tx = db.write_transaction("widgets").unwrap();
            tx.put("widgets", &[json!({"id": "k1", "v": 5})]).unwrap();
            // tx dropped here without commit.
        }
        let tx = db.read_transaction("widgets").unwrap();
        assert_eq!(tx.get("widgets", &json!("k1")).unwrap(), None);
    }

    #[test]
    fn reopen_with_same_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.sqlite3");
        {
            let db = Database::open(&path, schema(), EngineConfig::for_sqlite()).unwrap();
            let tx = db.write_transaction("widgets").unwrap();
            tx.put("widgets", &[json!({"id": "k1", "v": 5})]).unwrap();
            tx.commit().unwrap();
        }
        let db = Database::open(&path, schema(), EngineConfig::for_sqlite()).unwrap();
        let tx = db.read_transaction("widgets").unwrap();
        assert_eq!(tx.get("widgets", &json!("k1")).unwrap(), Some(json!({"id": "k1", "v": 5})));
    }

    #[test]
    fn unknown_store_is_rejected() {
        let db = Database::open_memory(schema(), EngineConfig::for_sqlite()).unwrap();
        let err = db.transaction(StoreSet::Named(vec!["nope".to_string()]), false).unwrap_err();
        assert!(matches!(err, EngineError::UnknownStore { .. }));
    }

    #[test]
    fn provider_fallback_uses_first_success() {
        let candidates: Vec<Box<dyn FnOnce() -> EngineResult<Box<dyn DbProvider>>>> = vec![
            Box::new(|| Err(EngineError::Backend("simulated failure".to_string()))),
            Box::new(|| {
                let db = Database::open_memory(schema(), EngineConfig::for_sqlite())?;
                Ok(Box::new(db) as Box<dyn DbProvider>)
            }),
        ];
        let provider = ProviderFallback::open(candidates).unwrap();
        let tx = provider.transaction(StoreSet::Named(vec!["widgets".to_string()]), true).unwrap();
        tx.put("widgets", &[json!({"id": "k1", "v": 5})]).unwrap();
        tx.commit().unwrap();
    }
}
