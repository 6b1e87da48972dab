//! Declarative schema model: databases, stores, and indexes.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::keypath::KeyPath;

/// A full database schema. `version` gates migration; a persisted version
/// below `last_usable_version` forces a wipe of all data.
#[derive(Debug, Clone, PartialEq)]
pub struct DbSchema {
    pub version: u32,
    pub last_usable_version: Option<u32>,
    pub stores: Vec<StoreSchema>,
}

impl DbSchema {
    /// Validate the invariants in spec §3/§4.3 across every store/index.
    ///
    /// # Errors
    ///
    /// Returns `BadKey` describing the first invariant violation found.
    pub fn validate(&self) -> EngineResult<()> {
        let mut seen_store_names = std::collections::HashSet::new();
        for store in &self.stores {
            if !seen_store_names.insert(store.name.as_str()) {
                return Err(EngineError::BadKey {
                    reason: format!("duplicate store name: {}", store.name),
                });
            }
            store.validate()?;
        }
        Ok(())
    }

    pub fn store(&self, name: &str) -> Option<&StoreSchema> {
        self.stores.iter().find(|s| s.name == name)
    }
}

/// One physical table/object-store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSchema {
    pub name: String,
    pub primary_key_path: KeyPath,
    pub indexes: Vec<IndexSchema>,
    /// Per-row size estimate used to size migration pagination; defaults to
    /// 200 bytes when absent (spec §4.4).
    pub estimated_obj_bytes: Option<u32>,
}

impl StoreSchema {
    #[must_use]
    pub fn new(name: impl Into<String>, primary_key_path: KeyPath) -> Self {
        Self {
            name: name.into(),
            primary_key_path,
            indexes: Vec::new(),
            estimated_obj_bytes: None,
        }
    }

    #[must_use]
    pub fn with_index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    #[must_use]
    pub fn with_estimated_obj_bytes(mut self, bytes: u32) -> Self {
        self.estimated_obj_bytes = Some(bytes);
        self
    }

    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|i| i.name == name)
    }

    fn validate(&self) -> EngineResult<()> {
        let mut seen_index_names = std::collections::HashSet::new();
        for index in &self.indexes {
            if !seen_index_names.insert(index.name.as_str()) {
                return Err(EngineError::BadKey {
                    reason: format!(
                        "duplicate index name '{}' in store '{}'",
                        index.name, self.name
                    ),
                });
            }
            index.validate()?;
        }
        Ok(())
    }
}

/// A secondary (or, via `name == ""`, the implicit primary) index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub key_path: SerializableKeyPath,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub multi_entry: bool,
    #[serde(default)]
    pub full_text: bool,
    #[serde(default)]
    pub include_data_in_index: bool,
    #[serde(default)]
    pub do_not_backfill: bool,
}

impl IndexSchema {
    #[must_use]
    pub fn new(name: impl Into<String>, key_path: KeyPath) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            unique: false,
            multi_entry: false,
            full_text: false,
            include_data_in_index: false,
            do_not_backfill: false,
        }
    }

    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub const fn multi_entry(mut self) -> Self {
        self.multi_entry = true;
        self
    }

    #[must_use]
    pub const fn full_text(mut self) -> Self {
        self.full_text = true;
        self
    }

    #[must_use]
    pub const fn include_data_in_index(mut self) -> Self {
        self.include_data_in_index = true;
        self
    }

    #[must_use]
    pub const fn do_not_backfill(mut self) -> Self {
        self.do_not_backfill = true;
        self
    }

    pub fn key_path(&self) -> KeyPath {
        self.key_path.clone().into()
    }

    /// `multiEntry` and compound keypaths are mutually exclusive; `fullText`
    /// implies a single string keypath.
    fn validate(&self) -> EngineResult<()> {
        let key_path: KeyPath = self.key_path();
        if self.multi_entry && key_path.is_compound() {
            return Err(EngineError::BadKey {
                reason: format!(
                    "index '{}': multiEntry and a compound keyPath are mutually exclusive",
                    self.name
                ),
            });
        }
        if self.full_text && key_path.is_compound() {
            return Err(EngineError::BadKey {
                reason: format!("index '{}': fullText requires a single keyPath", self.name),
            });
        }
        Ok(())
    }

    /// Physical SQL column name for a column-backed index.
    pub fn column_name(&self) -> String {
        format!("nsp_i_{}", self.name)
    }
}

/// `KeyPath` isn't directly `Serialize`/`Deserialize` (it's re-exported from
/// the keypath module, which has no serde dependency); this thin wrapper
/// carries the same two shapes through the `metadata` table's JSON-encoded
/// `IndexSchema` rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SerializableKeyPath {
    Single(String),
    Compound(Vec<String>),
}

impl From<KeyPath> for SerializableKeyPath {
    fn from(value: KeyPath) -> Self {
        match value {
            KeyPath::Single(p) => SerializableKeyPath::Single(p),
            KeyPath::Compound(ps) => SerializableKeyPath::Compound(ps),
        }
    }
}

impl From<SerializableKeyPath> for KeyPath {
    fn from(value: SerializableKeyPath) -> Self {
        match value {
            SerializableKeyPath::Single(p) => KeyPath::Single(p),
            SerializableKeyPath::Compound(ps) => KeyPath::Compound(ps),
        }
    }
}

/// Does this index live in its own pivot table rather than as a column on
/// the store's table? True for multi-entry indexes always, and for
/// full-text indexes when the backend supports FTS3 (spec §4.3).
#[must_use]
pub fn index_uses_separate_table(index: &IndexSchema, supports_fts3: bool) -> bool {
    index.multi_entry || (index.full_text && supports_fts3)
}

/// Physical pivot table name for a separate-table index.
#[must_use]
pub fn pivot_table_name(store_name: &str, index_name: &str) -> String {
    format!("{store_name}_{index_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_entry_and_compound_are_rejected() {
        let index = IndexSchema::new("bad", KeyPath::compound(["a", "b"])).multi_entry();
        assert!(index.validate().is_err());
    }

    #[test]
    fn full_text_requires_single_path() {
        let index = IndexSchema::new("bad", KeyPath::compound(["a", "b"])).full_text();
        assert!(index.validate().is_err());
    }

    #[test]
    fn duplicate_store_names_are_rejected() {
        let schema = DbSchema {
            version: 1,
            last_usable_version: None,
            stores: vec![
                StoreSchema::new("a", KeyPath::single("id")),
                StoreSchema::new("a", KeyPath::single("id")),
            ],
        };
        assert!(schema.validate().is_err());
    }

    #[test]
    fn separate_table_selection() {
        let multi = IndexSchema::new("tags", KeyPath::single("tags")).multi_entry();
        assert!(index_uses_separate_table(&multi, false));
        assert!(index_uses_separate_table(&multi, true));

        let fts = IndexSchema::new("body", KeyPath::single("body")).full_text();
        assert!(index_uses_separate_table(&fts, true));
        assert!(!index_uses_separate_table(&fts, false));

        let plain = IndexSchema::new("v", KeyPath::single("v"));
        assert!(!index_uses_separate_table(&plain, true));
    }

    #[test]
    fn index_schema_round_trips_through_json() {
        let index = IndexSchema::new("idx", KeyPath::compound(["a", "b"])).unique();
        let json = serde_json::to_string(&index).unwrap();
        let restored: IndexSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(index, restored);
    }
}
