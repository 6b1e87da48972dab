//! The migration decision tree (spec §4.4).

use std::collections::HashSet;

use crate::backend::{is_fts_side_table, parse_columns_from_create_sql, CatalogEntry, CatalogKind};
use crate::config::EngineConfig;
use crate::migration::{index_metadata_key, MetadataSnapshot, MigrationPlan, StoreAction, StorePlan};
use crate::schema::{index_uses_separate_table, pivot_table_name, DbSchema, IndexSchema, StoreSchema};

/// Build the migration plan for `target` given what's currently on disk.
#[must_use]
pub fn plan_migration(
    target: &DbSchema,
    metadata: &MetadataSnapshot,
    catalog: &[CatalogEntry],
    config: &EngineConfig,
) -> MigrationPlan {
    let tables: HashSet<&str> = catalog
        .iter()
        .filter(|e| e.kind == CatalogKind::Table && !is_fts_side_table(&e.name))
        .map(|e| e.name.as_str())
        .collect();

    // A matching persisted version never forces a wipe, even when
    // `wipe_if_exists` is set -- that flag only licenses a wipe when the
    // version actually disagrees (spec §3/§7), so repeated `open` calls
    // against an unchanged schema stay a no-op (testable property 5).
    let version_incompatible = metadata.schema_version.is_some_and(|v| {
        v != target.version && (config.wipe_if_exists || matches!(target.last_usable_version, Some(min) if v < min))
    });

    if version_incompatible {
        let stores = target
            .stores
            .iter()
            .map(|store| StorePlan {
                store: store.clone(),
                action: StoreAction::Create,
            })
            .collect();
        return MigrationPlan {
            wipe_first: true,
            target_version: target.version,
            stores,
        };
    }

    let stores = target
        .stores
        .iter()
        .map(|store| plan_store(store, metadata, catalog, &tables, config))
        .collect();

    MigrationPlan {
        wipe_first: false,
        target_version: target.version,
        stores,
    }
}

fn plan_store(
    store: &StoreSchema,
    metadata: &MetadataSnapshot,
    catalog: &[CatalogEntry],
    tables: &HashSet<&str>,
    config: &EngineConfig,
) -> StorePlan {
    if !tables.contains(store.name.as_str()) {
        return StorePlan {
            store: store.clone(),
            action: StoreAction::Create,
        };
    }

    let physical_columns = store_columns(store, catalog);
    let physical_pivots = physical_pivot_tables(store, tables);
    let physical_indexes = physical_index_objects(store, catalog, config);

    if needs_full_migration(store, metadata, &physical_columns, &physical_pivots, config) {
        return StorePlan {
            store: store.clone(),
            action: StoreAction::FullMigration,
        };
    }

    let dropped_column_indexes: Vec<IndexSchema> = metadata
        .indexes
        .iter()
        .filter_map(|(key, persisted)| {
            let belongs_to_store = key.starts_with(&format!("{}_", store.name));
            if !belongs_to_store || index_uses_separate_table(persisted, config.supports_fts3) {
                return None;
            }
            let still_in_schema = store.indexes.iter().any(|i| i.name == persisted.name);
            (!still_in_schema).then(|| persisted.clone())
        })
        .collect();

    if !dropped_column_indexes.is_empty() {
        return StorePlan {
            store: store.clone(),
            action: StoreAction::InPlaceCopy {
                dropped_column_indexes,
            },
        };
    }

    let new_indexes: Vec<IndexSchema> = store
        .indexes
        .iter()
        .filter(|index| {
            let key = index_metadata_key(&store.name, &index.name);
            !metadata.indexes.contains_key(&key) && index.do_not_backfill
        })
        .cloned()
        .collect();

    if !new_indexes.is_empty() {
        return StorePlan {
            store: store.clone(),
            action: StoreAction::Additive { new_indexes },
        };
    }

    // Case 6: the column itself is present (otherwise `needs_full_migration`
    // above would already have routed this store to `FullMigration`), but the
    // physical `CREATE INDEX` object backing it is gone -- e.g. dropped out
    // from under the column by something outside this engine.
    let missing_indexes: Vec<IndexSchema> = store
        .indexes
        .iter()
        .filter(|index| {
            !index_uses_separate_table(index, config.supports_fts3)
                && physical_columns.contains(&index.column_name())
                && !physical_indexes.contains(index.name.as_str())
        })
        .cloned()
        .collect();

    if !missing_indexes.is_empty() {
        return StorePlan {
            store: store.clone(),
            action: StoreAction::IndexOnlyFix { missing_indexes },
        };
    }

    StorePlan {
        store: store.clone(),
        action: StoreAction::NoOp,
    }
}

fn store_columns(store: &StoreSchema, catalog: &[CatalogEntry]) -> HashSet<String> {
    catalog
        .iter()
        .find(|e| e.kind == CatalogKind::Table && e.name == store.name)
        .and_then(|e| e.sql.as_deref())
        .map(|sql| parse_columns_from_create_sql(sql).into_iter().collect())
        .unwrap_or_default()
}

fn physical_pivot_tables(store: &StoreSchema, tables: &HashSet<&str>) -> HashSet<String> {
    store
        .indexes
        .iter()
        .filter(|i| tables.contains(pivot_table_name(&store.name, &i.name).as_str()))
        .map(|i| i.name.clone())
        .collect()
}

/// Column-backed indexes whose `CREATE INDEX` object (as opposed to their
/// `nsp_i_<name>` column) is actually present in the catalog.
fn physical_index_objects(store: &StoreSchema, catalog: &[CatalogEntry], config: &EngineConfig) -> HashSet<String> {
    let index_object_names: HashSet<&str> = catalog
        .iter()
        .filter(|e| e.kind == CatalogKind::Index)
        .map(|e| e.name.as_str())
        .collect();
    store
        .indexes
        .iter()
        .filter(|i| !index_uses_separate_table(i, config.supports_fts3))
        .filter(|i| index_object_names.contains(crate::store::sql_index_name(&store.name, &i.name).as_str()))
        .map(|i| i.name.clone())
        .collect()
}

/// `needsFullMigration()` (spec §4.4): true iff any schema index either has
/// no metadata row and isn't `doNotBackfill`, has a metadata row that
/// disagrees with the target `IndexSchema`, or is missing its required
/// physical artifact.
fn needs_full_migration(
    store: &StoreSchema,
    metadata: &MetadataSnapshot,
    physical_columns: &HashSet<String>,
    physical_pivots: &HashSet<String>,
    config: &EngineConfig,
) -> bool {
    store.indexes.iter().any(|index| {
        let key = index_metadata_key(&store.name, &index.name);
        match metadata.indexes.get(&key) {
            None => !index.do_not_backfill,
            Some(persisted) if persisted != index => true,
            Some(_) => {
                if index_uses_separate_table(index, config.supports_fts3) {
                    !physical_pivots.contains(&index.name)
                } else {
                    !physical_columns.contains(&index.column_name())
                }
            }
        }
    })
}
