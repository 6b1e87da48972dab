//! A second, non-relational [`crate::provider::DbProvider`] candidate:
//! stores and indexes held directly as in-memory `BTreeMap`/`HashMap`
//! structures rather than SQL tables, so [`crate::provider::ProviderFallback`]
//! has two real candidates to try (spec §4.2). Bypasses
//! [`crate::backend::SqlTransaction`] and the migration planner/executor
//! entirely: there is no physical catalog to diff against, so opening a
//! store here is just allocating its maps from the schema (see DESIGN.md's
//! Open Question resolution on this point).

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::fulltext::get_full_text_index_words_for_item;
use crate::index::{Order, Resolution};
use crate::keycodec;
use crate::keypath::{get_multi_entry_values, get_serialized_key_for_keypath};
use crate::lock::{LockHelper, LockToken, StoreSet};
use crate::provider::{DbProvider, EngineTransaction};
use crate::schema::{DbSchema, IndexSchema, StoreSchema};
use crate::value::{Item, KeyValue};

/// Per-index physical representation: an ordered key -> primary-keys
/// multimap for everything except full-text indexes, which keep an
/// inverted token -> primary-keys map instead.
#[derive(Clone)]
enum IndexData {
    Keyed(BTreeMap<String, Vec<String>>),
    FullText(HashMap<String, Vec<String>>),
}

#[derive(Clone)]
struct StoreData {
    rows: BTreeMap<String, Item>,
    indexes: HashMap<String, IndexData>,
    /// `pk -> [(index name, key or token)]` inserted for that row, so a
    /// re-`put`/`remove` can prune exactly the stale entries without
    /// scanning every index.
    reverse: HashMap<String, Vec<(String, String)>>,
}

impl StoreData {
    fn new(store: &StoreSchema) -> Self {
        let indexes = store
            .indexes
            .iter()
            .map(|index| {
                let data = if index.full_text {
                    IndexData::FullText(HashMap::new())
                } else {
                    IndexData::Keyed(BTreeMap::new())
                };
                (index.name.clone(), data)
            })
            .collect();
        Self {
            rows: BTreeMap::new(),
            indexes,
            reverse: HashMap::new(),
        }
    }
}

fn purge_pk(store: &mut StoreData, pk: &str) {
    if let Some(entries) = store.reverse.remove(pk) {
        for (index_name, key_or_token) in entries {
            match store.indexes.get_mut(&index_name) {
                Some(IndexData::Keyed(map)) => {
                    if let Some(pks) = map.get_mut(&key_or_token) {
                        pks.retain(|p| p != pk);
                        if pks.is_empty() {
                            map.remove(&key_or_token);
                        }
                    }
                }
                Some(IndexData::FullText(map)) => {
                    if let Some(pks) = map.get_mut(&key_or_token) {
                        pks.retain(|p| p != pk);
                        if pks.is_empty() {
                            map.remove(&key_or_token);
                        }
                    }
                }
                None => {}
            }
        }
    }
    store.rows.remove(pk);
}

fn index_keys_for_item(index: &IndexSchema, item: &Item) -> EngineResult<Vec<String>> {
    if index.multi_entry {
        let path = index.key_path().paths()[0].to_string();
        get_multi_entry_values(item, &path)?
            .iter()
            .map(|c| keycodec::serialize_key(&KeyValue::Single(c.clone())))
            .collect()
    } else {
        match get_serialized_key_for_keypath(item, &index.key_path()) {
            Ok(key) => Ok(vec![key]),
            Err(EngineError::BadKey { .. }) => Ok(Vec::new()),
            Err(other) => Err(other),
        }
    }
}

fn paginate(items: Vec<Item>, limit: Option<u64>, offset: Option<u64>) -> Vec<Item> {
    let offset = offset.unwrap_or(0) as usize;
    let iter = items.into_iter().skip(offset);
    match limit {
        Some(limit) => iter.take(limit as usize).collect(),
        None => iter.collect(),
    }
}

fn bounds(lo: Option<&str>, hi: Option<&str>, lo_excl: bool, hi_excl: bool) -> (std::ops::Bound<String>, std::ops::Bound<String>) {
    use std::ops::Bound;
    let lo_b = match lo {
        Some(l) if lo_excl => Bound::Excluded(l.to_string()),
        Some(l) => Bound::Included(l.to_string()),
        None => Bound::Unbounded,
    };
    let hi_b = match hi {
        Some(h) if hi_excl => Bound::Excluded(h.to_string()),
        Some(h) => Bound::Included(h.to_string()),
        None => Bound::Unbounded,
    };
    (lo_b, hi_b)
}

/// An opened in-memory database.
pub struct MemoryDatabase {
    schema: DbSchema,
    config: EngineConfig,
    lock: LockHelper,
    data: Mutex<RefCell<HashMap<String, StoreData>>>,
}

impl MemoryDatabase {
    /// Allocate empty maps for every store/index in `schema`. There is no
    /// persisted state to reconcile, so this never migrates anything.
    ///
    /// # Errors
    ///
    /// Returns an error if `schema` itself is invalid (spec §3/§4.3).
    pub fn open(schema: DbSchema, config: EngineConfig) -> EngineResult<Self> {
        schema.validate()?;
        let known_stores = schema.stores.iter().map(|s| s.name.clone()).collect();
        let lock = LockHelper::new(known_stores, config.supports_concurrent_transactions);
        let data = schema.stores.iter().map(|store| (store.name.clone(), StoreData::new(store))).collect();
        Ok(Self {
            schema,
            config,
            lock,
            data: Mutex::new(RefCell::new(data)),
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

    /// Open a transaction touching `store_set`, blocking until admitted.
    ///
    /// # Errors
    ///
    /// `UnknownStore` / `Closing`, per [`LockHelper::open_transaction`].
    pub fn transaction(&self, store_set: StoreSet, exclusive: bool) -> EngineResult<MemoryTransaction<'_>> {
        let token = self.lock.open_transaction(&store_set, exclusive)?;
        let guard = self.data.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let snapshot = guard.borrow().clone();
        Ok(MemoryTransaction {
            db: self,
            token: Some(token),
            guard,
            snapshot,
            done: false,
        })
    }

    /// # Errors
    ///
    /// See [`Self::transaction`].
    pub fn read_transaction(&self, store: impl Into<String>) -> EngineResult<MemoryTransaction<'_>> {
        self.transaction(StoreSet::Named(vec![store.into()]), false)
    }

    /// # Errors
    ///
    /// See [`Self::transaction`].
    pub fn write_transaction(&self, store: impl Into<String>) -> EngineResult<MemoryTransaction<'_>> {
        self.transaction(StoreSet::Named(vec![store.into()]), true)
    }

    pub fn close(&self) {
        self.lock.close_when_possible();
    }
}

/// A logical transaction over a [`MemoryDatabase`]. Unlike the SQL backend
/// there is no underlying engine to issue `BEGIN`/`COMMIT` to, so isolation
/// is approximated by snapshotting every store's maps at open time and
/// restoring that snapshot on abort or an uncommitted drop.
pub struct MemoryTransaction<'db> {
    db: &'db MemoryDatabase,
    token: Option<LockToken>,
    guard: std::sync::MutexGuard<'db, RefCell<HashMap<String, StoreData>>>,
    snapshot: HashMap<String, StoreData>,
    done: bool,
}

impl MemoryTransaction<'_> {
    /// Commit (a no-op beyond releasing locks: mutations already landed on
    /// the live maps as they were made).
    pub fn commit(mut self) -> EngineResult<()> {
        self.done = true;
        if let Some(token) = self.token.take() {
            self.db.lock.transaction_complete(token);
        }
        Ok(())
    }

    /// Restore the pre-transaction snapshot and release locks.
    pub fn abort(mut self) {
        *self.guard.borrow_mut() = std::mem::take(&mut self.snapshot);
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

    /// `put(items)`.
    ///
    /// # Errors
    ///
    /// `BadKey` if the primary key or a required index value can't be
    /// extracted; `Conflict` if a unique index is violated.
    pub fn put(&self, store_name: &str, items: &[Item]) -> EngineResult<()> {
        let schema = self.store_schema(store_name)?.clone();
        let mut map = self.guard.borrow_mut();
        let store = map.get_mut(store_name).expect("store allocated at open time");

        for item in items {
            let pk = get_serialized_key_for_keypath(item, &schema.primary_key_path)?;
            purge_pk(store, &pk);

            let mut reverse_entries = Vec::new();
            for index in &schema.indexes {
                if index.full_text {
                    let path = index.key_path().paths()[0].to_string();
                    for token in get_full_text_index_words_for_item(&path, item) {
                        if let Some(IndexData::FullText(tokens)) = store.indexes.get_mut(&index.name) {
                            tokens.entry(token.clone()).or_default().push(pk.clone());
                        }
                        reverse_entries.push((index.name.clone(), token));
                    }
                    continue;
                }

                for key in index_keys_for_item(index, item)? {
                    if index.unique {
                        if let Some(IndexData::Keyed(existing)) = store.indexes.get(&index.name) {
                            if let Some(existing_pks) = existing.get(&key) {
                                if existing_pks.iter().any(|p| p != &pk) {
                                    return Err(EngineError::Conflict {
                                        reason: format!("unique index '{}' violated for key '{key}'", index.name),
                                    });
                                }
                            }
                        }
                    }
                    if let Some(IndexData::Keyed(m)) = store.indexes.get_mut(&index.name) {
                        m.entry(key.clone()).or_default().push(pk.clone());
                    }
                    reverse_entries.push((index.name.clone(), key));
                }
            }

            store.rows.insert(pk.clone(), item.clone());
            store.reverse.insert(pk, reverse_entries);
        }
        Ok(())
    }

    /// `get(key)`.
    ///
    /// # Errors
    ///
    /// `BadKey` if `key`'s shape doesn't match the primary key path.
    pub fn get(&self, store_name: &str, key: &serde_json::Value) -> EngineResult<Option<Item>> {
        let schema = self.store_schema(store_name)?;
        let serialized = keycodec::serialize_literal_key(&schema.primary_key_path, key)?;
        let map = self.guard.borrow();
        let store = map.get(store_name).expect("store allocated at open time");
        Ok(store.rows.get(&serialized).cloned())
    }

    /// `getMultiple(keys)`.
    ///
    /// # Errors
    ///
    /// `BadKey` if a key's shape doesn't match the primary key path.
    pub fn get_multiple(&self, store_name: &str, keys: &[serde_json::Value]) -> EngineResult<Vec<Item>> {
        let schema = self.store_schema(store_name)?;
        let map = self.guard.borrow();
        let store = map.get(store_name).expect("store allocated at open time");
        keys.iter()
            .map(|k| keycodec::serialize_literal_key(&schema.primary_key_path, k))
            .collect::<EngineResult<Vec<_>>>()?
            .into_iter()
            .filter_map(|k| store.rows.get(&k).cloned().map(Ok))
            .collect()
    }

    /// `remove(keys)`.
    ///
    /// # Errors
    ///
    /// `BadKey` if a key's shape doesn't match the primary key path.
    pub fn remove(&self, store_name: &str, keys: &[serde_json::Value]) -> EngineResult<()> {
        let schema = self.store_schema(store_name)?.clone();
        let mut map = self.guard.borrow_mut();
        let store = map.get_mut(store_name).expect("store allocated at open time");
        for key in keys {
            let serialized = keycodec::serialize_literal_key(&schema.primary_key_path, key)?;
            purge_pk(store, &serialized);
        }
        Ok(())
    }

    fn keys_in_range(
        &self,
        store_name: &str,
        index_name: Option<&str>,
        lo: Option<&serde_json::Value>,
        hi: Option<&serde_json::Value>,
        lo_excl: bool,
        hi_excl: bool,
    ) -> EngineResult<Vec<String>> {
        let schema = self.store_schema(store_name)?;
        let index = index_name.map(|n| self.index_schema(schema, n)).transpose()?;
        let keypath = index.map_or_else(|| schema.primary_key_path.clone(), IndexSchema::key_path);
        let lo_s = lo.map(|v| keycodec::serialize_literal_key(&keypath, v)).transpose()?;
        let hi_s = hi.map(|v| keycodec::serialize_literal_key(&keypath, v)).transpose()?;
        let (lo_b, hi_b) = bounds(lo_s.as_deref(), hi_s.as_deref(), lo_excl, hi_excl);

        let map = self.guard.borrow();
        let store = map.get(store_name).expect("store allocated at open time");
        match index {
            None => Ok(store.rows.range((lo_b, hi_b)).map(|(k, _)| k.clone()).collect()),
            Some(idx) => match store.indexes.get(&idx.name) {
                Some(IndexData::Keyed(m)) => Ok(m.range((lo_b, hi_b)).flat_map(|(_, pks)| pks.clone()).collect()),
                _ => Err(EngineError::BadKey {
                    reason: format!("index '{}' does not support ordered range queries", idx.name),
                }),
            },
        }
    }

    /// `removeRange(indexName, low, high, lowExcl, highExcl)`.
    ///
    /// # Errors
    ///
    /// See [`Self::keys_in_range`].
    pub fn remove_range(
        &self,
        store_name: &str,
        index_name: Option<&str>,
        lo: Option<&serde_json::Value>,
        hi: Option<&serde_json::Value>,
        lo_excl: bool,
        hi_excl: bool,
    ) -> EngineResult<()> {
        let pks = self.keys_in_range(store_name, index_name, lo, hi, lo_excl, hi_excl)?;
        let mut map = self.guard.borrow_mut();
        let store = map.get_mut(store_name).expect("store allocated at open time");
        for pk in pks {
            purge_pk(store, &pk);
        }
        Ok(())
    }

    /// `clearAllData()`.
    ///
    /// # Errors
    ///
    /// `UnknownStore` if `store_name` isn't part of the schema.
    pub fn clear_all_data(&self, store_name: &str) -> EngineResult<()> {
        self.store_schema(store_name)?;
        let mut map = self.guard.borrow_mut();
        let store = map.get_mut(store_name).expect("store allocated at open time");
        store.rows.clear();
        store.reverse.clear();
        for index in store.indexes.values_mut() {
            match index {
                IndexData::Keyed(m) => m.clear(),
                IndexData::FullText(m) => m.clear(),
            }
        }
        Ok(())
    }

    /// `getAll(order, limit, offset)`.
    ///
    /// # Errors
    ///
    /// `BadKey` if `index_name` names a full-text index (it has no stable
    /// ordering; use [`Self::full_text_search`]).
    pub fn get_all(
        &self,
        store_name: &str,
        index_name: Option<&str>,
        order: Order,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> EngineResult<Vec<Item>> {
        let schema = self.store_schema(store_name)?;
        let index = index_name.map(|n| self.index_schema(schema, n)).transpose()?;
        let map = self.guard.borrow();
        let store = map.get(store_name).expect("store allocated at open time");
        let mut pks: Vec<String> = match index {
            None => store.rows.keys().cloned().collect(),
            Some(idx) => match store.indexes.get(&idx.name) {
                Some(IndexData::Keyed(m)) => m.values().flatten().cloned().collect(),
                _ => {
                    return Err(EngineError::BadKey {
                        reason: format!("index '{}' does not support ordered queries", idx.name),
                    })
                }
            },
        };
        if order == Order::Reverse {
            pks.reverse();
        }
        let items = pks.into_iter().filter_map(|pk| store.rows.get(&pk).cloned()).collect();
        Ok(paginate(items, limit, offset))
    }

    /// `getOnly(key, order, limit, offset)`.
    ///
    /// # Errors
    ///
    /// See [`Self::get_all`].
    pub fn get_only(
        &self,
        store_name: &str,
        index_name: Option<&str>,
        key: &serde_json::Value,
        order: Order,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> EngineResult<Vec<Item>> {
        let schema = self.store_schema(store_name)?;
        let index = index_name.map(|n| self.index_schema(schema, n)).transpose()?;
        let keypath = index.map_or_else(|| schema.primary_key_path.clone(), IndexSchema::key_path);
        let serialized = keycodec::serialize_literal_key(&keypath, key)?;
        let map = self.guard.borrow();
        let store = map.get(store_name).expect("store allocated at open time");
        let mut pks: Vec<String> = match index {
            None => store.rows.get(&serialized).map(|_| vec![serialized.clone()]).unwrap_or_default(),
            Some(idx) => match store.indexes.get(&idx.name) {
                Some(IndexData::Keyed(m)) => m.get(&serialized).cloned().unwrap_or_default(),
                _ => {
                    return Err(EngineError::BadKey {
                        reason: format!("index '{}' does not support ordered queries", idx.name),
                    })
                }
            },
        };
        if order == Order::Reverse {
            pks.reverse();
        }
        let items = pks.into_iter().filter_map(|pk| store.rows.get(&pk).cloned()).collect();
        Ok(paginate(items, limit, offset))
    }

    /// `getRange(low, high, lowExcl, highExcl, order, limit, offset)`.
    ///
    /// # Errors
    ///
    /// See [`Self::keys_in_range`].
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
        let mut pks = self.keys_in_range(store_name, index_name, lo, hi, lo_excl, hi_excl)?;
        if order == Order::Reverse {
            pks.reverse();
        }
        let map = self.guard.borrow();
        let store = map.get(store_name).expect("store allocated at open time");
        let items = pks.into_iter().filter_map(|pk| store.rows.get(&pk).cloned()).collect();
        Ok(paginate(items, limit, offset))
    }

    /// `countAll()`.
    ///
    /// # Errors
    ///
    /// See [`Self::get_all`].
    pub fn count_all(&self, store_name: &str, index_name: Option<&str>) -> EngineResult<u64> {
        let schema = self.store_schema(store_name)?;
        let index = index_name.map(|n| self.index_schema(schema, n)).transpose()?;
        let map = self.guard.borrow();
        let store = map.get(store_name).expect("store allocated at open time");
        match index {
            None => Ok(store.rows.len() as u64),
            Some(idx) => match store.indexes.get(&idx.name) {
                Some(IndexData::Keyed(m)) => Ok(m.values().map(Vec::len).sum::<usize>() as u64),
                _ => Err(EngineError::BadKey {
                    reason: format!("index '{}' does not support ordered queries", idx.name),
                }),
            },
        }
    }

    /// `countOnly(key)`.
    ///
    /// # Errors
    ///
    /// See [`Self::get_only`].
    pub fn count_only(&self, store_name: &str, index_name: Option<&str>, key: &serde_json::Value) -> EngineResult<u64> {
        Ok(self.get_only(store_name, index_name, key, Order::None, None, None)?.len() as u64)
    }

    /// `countRange(low, high, lowExcl, highExcl)`.
    ///
    /// # Errors
    ///
    /// See [`Self::keys_in_range`].
    pub fn count_range(
        &self,
        store_name: &str,
        index_name: Option<&str>,
        lo: Option<&serde_json::Value>,
        hi: Option<&serde_json::Value>,
        lo_excl: bool,
        hi_excl: bool,
    ) -> EngineResult<u64> {
        Ok(self.keys_in_range(store_name, index_name, lo, hi, lo_excl, hi_excl)?.len() as u64)
    }

    /// `fullTextSearch(phrase, resolution, limit)`. Each normalized term is
    /// matched as a token prefix, mirroring the `MATCH '{t}*'` semantics of
    /// the FTS3-backed SQL implementation.
    ///
    /// # Errors
    ///
    /// `BadKey` if `index_name` doesn't name a full-text index.
    pub fn full_text_search(
        &self,
        store_name: &str,
        index_name: &str,
        phrase: &str,
        resolution: Resolution,
        limit: Option<u64>,
    ) -> EngineResult<Vec<Item>> {
        let schema = self.store_schema(store_name)?;
        let index = self.index_schema(schema, index_name)?;
        let terms = crate::fulltext::break_and_normalize_search_phrase(phrase);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let map = self.guard.borrow();
        let store = map.get(store_name).expect("store allocated at open time");
        let Some(IndexData::FullText(tokens)) = store.indexes.get(&index.name) else {
            return Err(EngineError::BadKey {
                reason: format!("index '{}' is not a full-text index", index.name),
            });
        };

        let mut sets: Vec<BTreeSet<String>> = terms
            .iter()
            .map(|term| {
                tokens
                    .iter()
                    .filter(|(token, _)| token.starts_with(term.as_str()))
                    .flat_map(|(_, pks)| pks.iter().cloned())
                    .collect()
            })
            .collect();

        let combined: BTreeSet<String> = match resolution {
            Resolution::And => sets
                .pop()
                .map(|first| sets.into_iter().fold(first, |acc, s| acc.intersection(&s).cloned().collect()))
                .unwrap_or_default(),
            Resolution::Or => sets.into_iter().fold(BTreeSet::new(), |mut acc, s| {
                acc.extend(s);
                acc
            }),
        };

        let items = combined.into_iter().filter_map(|pk| store.rows.get(&pk).cloned()).collect();
        Ok(paginate(items, limit, None))
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        *self.guard.borrow_mut() = std::mem::take(&mut self.snapshot);
        if let Some(token) = self.token.take() {
            self.db.lock.transaction_failed(token, "dropped without commit");
        }
    }
}

impl EngineTransaction for MemoryTransaction<'_> {
    fn put(&self, store: &str, items: &[Item]) -> EngineResult<()> {
        MemoryTransaction::put(self, store, items)
    }
    fn get(&self, store: &str, key: &serde_json::Value) -> EngineResult<Option<Item>> {
        MemoryTransaction::get(self, store, key)
    }
    fn get_multiple(&self, store: &str, keys: &[serde_json::Value]) -> EngineResult<Vec<Item>> {
        MemoryTransaction::get_multiple(self, store, keys)
    }
    fn remove(&self, store: &str, keys: &[serde_json::Value]) -> EngineResult<()> {
        MemoryTransaction::remove(self, store, keys)
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
        MemoryTransaction::remove_range(self, store, index, lo, hi, lo_excl, hi_excl)
    }
    fn clear_all_data(&self, store: &str) -> EngineResult<()> {
        MemoryTransaction::clear_all_data(self, store)
    }
    fn get_all(&self, store: &str, index: Option<&str>, order: Order, limit: Option<u64>, offset: Option<u64>) -> EngineResult<Vec<Item>> {
        MemoryTransaction::get_all(self, store, index, order, limit, offset)
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
        MemoryTransaction::get_only(self, store, index, key, order, limit, offset)
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
        MemoryTransaction::get_range(self, store, index, lo, hi, lo_excl, hi_excl, order, limit, offset)
    }
    fn count_all(&self, store: &str, index: Option<&str>) -> EngineResult<u64> {
        MemoryTransaction::count_all(self, store, index)
    }
    fn count_only(&self, store: &str, index: Option<&str>, key: &serde_json::Value) -> EngineResult<u64> {
        MemoryTransaction::count_only(self, store, index, key)
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
        MemoryTransaction::count_range(self, store, index, lo, hi, lo_excl, hi_excl)
    }
    fn full_text_search(&self, store: &str, index: &str, phrase: &str, resolution: Resolution, limit: Option<u64>) -> EngineResult<Vec<Item>> {
        MemoryTransaction::full_text_search(self, store, index, phrase, resolution, limit)
    }
    fn commit(self: Box<Self>) -> EngineResult<()> {
        MemoryTransaction::commit(*self)
    }
    fn abort(self: Box<Self>) {
        MemoryTransaction::abort(*self);
    }
}

impl DbProvider for MemoryDatabase {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypath::KeyPath;
    use serde_json::json;

    fn schema() -> DbSchema {
        DbSchema {
            version: 1,
            last_usable_version: None,
            stores: vec![StoreSchema::new("widgets", KeyPath::single("id"))
                .with_index(IndexSchema::new("by_v", KeyPath::single("v")).unique())
                .with_index(IndexSchema::new("tags", KeyPath::single("tags")).multi_entry())
                .with_index(IndexSchema::new("body", KeyPath::single("body")).full_text())],
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let db = MemoryDatabase::open(schema(), EngineConfig::for_memory()).unwrap();
        let tx = db.write_transaction("widgets").unwrap();
        tx.put("widgets", &[json!({"id": "k1", "v": 5, "tags": ["a"], "body": "hello world"})]).unwrap();
        tx.commit().unwrap();

        let tx = db.read_transaction("widgets").unwrap();
        assert_eq!(tx.get("widgets", &json!("k1")).unwrap().unwrap()["v"], json!(5));
    }

    #[test]
    fn unique_index_rejects_duplicate_value() {
        let db = MemoryDatabase::open(schema(), EngineConfig::for_memory()).unwrap();
        let tx = db.write_transaction("widgets").unwrap();
        tx.put("widgets", &[json!({"id": "k1", "v": 5})]).unwrap();
        let err = tx.put("widgets", &[json!({"id": "k2", "v": 5})]).unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
    }

    #[test]
    fn multi_entry_index_finds_every_tag() {
        let db = MemoryDatabase::open(schema(), EngineConfig::for_memory()).unwrap();
        let tx = db.write_transaction("widgets").unwrap();
        tx.put("widgets", &[json!({"id": "k1", "v": 1, "tags": ["red", "green"]})]).unwrap();
        tx.commit().unwrap();

        let tx = db.read_transaction("widgets").unwrap();
        let reds = tx.get_only("widgets", Some("tags"), &json!("red"), Order::None, None, None).unwrap();
        assert_eq!(reds.len(), 1);
        let greens = tx.get_only("widgets", Some("tags"), &json!("green"), Order::None, None, None).unwrap();
        assert_eq!(greens.len(), 1);
    }

    #[test]
    fn full_text_search_matches_token_prefix() {
        let db = MemoryDatabase::open(schema(), EngineConfig::for_memory()).unwrap();
        let tx = db.write_transaction("widgets").unwrap();
        tx.put("widgets", &[json!({"id": "k1", "v": 1, "body": "hello world"})]).unwrap();
        tx.commit().unwrap();

        let tx = db.read_transaction("widgets").unwrap();
        let hits = tx.full_text_search("widgets", "body", "hel", Resolution::And, None).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn abort_restores_snapshot() {
        let db = MemoryDatabase::open(schema(), EngineConfig::for_memory()).unwrap();
        let tx = db.write_transaction("widgets").unwrap();
        tx.put("widgets", &[json!({"id": "k1", "v": 1})]).unwrap();
        tx.commit().unwrap();

        let tx = db.write_transaction("widgets").unwrap();
        tx.put("widgets", &[json!({"id": "k2", "v": 2})]).unwrap();
        tx.abort();

        let tx = db.read_transaction("widgets").unwrap();
        assert_eq!(tx.get("widgets", &json!("k2")).unwrap(), None);
        assert_eq!(tx.get("widgets", &json!("k1")).unwrap().unwrap()["v"], json!(1));
    }

    #[test]
    fn remove_range_prunes_index_entries() {
        let db = MemoryDatabase::open(schema(), EngineConfig::for_memory()).unwrap();
        let tx = db.write_transaction("widgets").unwrap();
        tx.put(
            "widgets",
            &[json!({"id": "k1", "v": 1}), json!({"id": "k2", "v": 2}), json!({"id": "k3", "v": 3})],
        )
        .unwrap();
        tx.remove_range("widgets", None, Some(&json!("k1")), Some(&json!("k2")), false, false).unwrap();
        tx.commit().unwrap();

        let tx = db.read_transaction("widgets").unwrap();
        assert_eq!(tx.count_all("widgets", None).unwrap(), 1);
        assert_eq!(tx.get("widgets", &json!("k3")).unwrap().unwrap()["v"], json!(3));
    }
}
