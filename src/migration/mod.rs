//! Schema-versioned migration: diffing the persisted metadata and physical
//! catalog against the desired schema (spec §4.4), and executing the
//! resulting plan inside one exclusive transaction (spec §4.5).

pub mod executor;
pub mod planner;

use std::collections::HashMap;

use crate::backend::SqlTransaction;
use crate::error::EngineResult;
use crate::schema::IndexSchema;

/// Reserved `metadata` row name holding the persisted schema version.
pub const SCHEMA_VERSION_KEY: &str = "schemaVersion";

/// Metadata row key for an index: `<storeName>_<indexName>`.
#[must_use]
pub fn index_metadata_key(store_name: &str, index_name: &str) -> String {
    format!("{store_name}_{index_name}")
}

/// The persisted ground truth the planner diffs against: the schema version
/// and one `IndexSchema` per previously-migrated index, keyed by
/// [`index_metadata_key`].
#[derive(Debug, Clone, Default)]
pub struct MetadataSnapshot {
    pub schema_version: Option<u32>,
    pub indexes: HashMap<String, IndexSchema>,
}

/// Read the current `metadata` table contents. Returns the default (empty)
/// snapshot if the table doesn't exist yet.
///
/// # Errors
///
/// Returns an error if the backend query fails for a reason other than a
/// missing table.
pub fn read_metadata(tx: &dyn SqlTransaction) -> EngineResult<MetadataSnapshot> {
    let rows = match tx.run_query("SELECT name, value FROM metadata", &[]) {
        Ok(rows) => rows,
        Err(_) => return Ok(MetadataSnapshot::default()),
    };

    let mut snapshot = MetadataSnapshot::default();
    for row in rows {
        let Some(Some(name)) = row.first() else { continue };
        let Some(Some(value)) = row.get(1) else { continue };
        if name == SCHEMA_VERSION_KEY {
            snapshot.schema_version = value.parse().ok();
        } else if let Ok(index) = serde_json::from_str::<IndexSchema>(value) {
            snapshot.indexes.insert(name.clone(), index);
        }
    }
    Ok(snapshot)
}

/// What must happen to one store to bring it in line with the target schema
/// (spec §4.4's six-case decision tree).
#[derive(Debug, Clone)]
pub enum StoreAction {
    /// Table doesn't exist yet: create it, its indexes, and its metadata
    /// rows from scratch.
    Create,
    /// `needsFullMigration()` is true: rename to temp, drop stale column
    /// indexes and orphaned pivot tables, recreate, re-insert every row.
    FullMigration,
    /// A column-backed index in the metadata is no longer in the schema:
    /// rename to temp, recreate with only the surviving columns, copy rows
    /// across without re-deriving indexes.
    InPlaceCopy { dropped_column_indexes: Vec<IndexSchema> },
    /// Only new `doNotBackfill` indexes were added: add columns/pivots
    /// without touching existing rows.
    Additive { new_indexes: Vec<IndexSchema> },
    /// A column-backed index is in the schema and the metadata, but its
    /// physical column/table is missing: recreate just that index.
    IndexOnlyFix { missing_indexes: Vec<IndexSchema> },
    /// Table exists, schema and physical layout already agree.
    NoOp,
}

/// The planned action for one store.
#[derive(Debug, Clone)]
pub struct StorePlan {
    pub store: crate::schema::StoreSchema,
    pub action: StoreAction,
}

/// A full migration plan: whether to wipe everything first, then the
/// per-store actions to bring the database to the target schema.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub wipe_first: bool,
    pub target_version: u32,
    pub stores: Vec<StorePlan>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_key_format() {
        assert_eq!(index_metadata_key("widgets", "by_tag"), "widgets_by_tag");
    }
}
