//! Executes a [`super::MigrationPlan`] inside a single exclusive transaction
//! (spec §4.5). Ordered so that (drop old metadata, drop old indexes, rename
//! to temp) completes before (create new table, create new indexes), index
//! creation precedes row re-insertion, and the temp table drop is last.

use std::collections::HashSet;

use crate::backend::{CatalogEntry, CatalogKind, SqlParam, SqlTransaction};
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::migration::{index_metadata_key, MetadataSnapshot, MigrationPlan, StoreAction, StorePlan, SCHEMA_VERSION_KEY};
use crate::schema::{index_uses_separate_table, pivot_table_name, IndexSchema, StoreSchema};
use crate::store;
use crate::value::Item;

fn ensure_metadata_table(tx: &dyn SqlTransaction) -> EngineResult<()> {
    tx.execute("CREATE TABLE IF NOT EXISTS metadata (name TEXT PRIMARY KEY, value TEXT)", &[])?;
    Ok(())
}

fn write_version(tx: &dyn SqlTransaction, version: u32) -> EngineResult<()> {
    tx.execute(
        "INSERT OR REPLACE INTO metadata (name, value) VALUES (?1, ?2)",
        &[SqlParam::text(SCHEMA_VERSION_KEY), SqlParam::text(version.to_string())],
    )?;
    Ok(())
}

fn write_index_metadata(tx: &dyn SqlTransaction, store_name: &str, index: &IndexSchema) -> EngineResult<()> {
    let key = index_metadata_key(store_name, &index.name);
    let value = serde_json::to_string(index)?;
    tx.execute(
        "INSERT OR REPLACE INTO metadata (name, value) VALUES (?1, ?2)",
        &[SqlParam::text(key), SqlParam::text(value)],
    )?;
    Ok(())
}

fn delete_index_metadata(tx: &dyn SqlTransaction, store_name: &str, index_name: &str) -> EngineResult<()> {
    let key = index_metadata_key(store_name, index_name);
    tx.execute("DELETE FROM metadata WHERE name = ?1", &[SqlParam::text(key)])?;
    Ok(())
}

/// Drop every table in the catalog (other than `metadata`/FTS side tables)
/// and clear every metadata row, as the first step of a version-incompatible
/// wipe (spec §4.4 case 1).
fn wipe_everything(tx: &dyn SqlTransaction) -> EngineResult<()> {
    for entry in tx.catalog()? {
        if entry.kind == CatalogKind::Table
            && entry.name != "metadata"
            && !crate::backend::is_fts_side_table(&entry.name)
        {
            tx.execute(&format!("DROP TABLE IF EXISTS {}", entry.name), &[])?;
        }
    }
    tx.execute("DELETE FROM metadata", &[])?;
    Ok(())
}

/// Run the full migration plan against `tx`, which must already be the
/// single exclusive transaction obtained from the `LockHelper` with
/// `storeNames = all` (spec §4.5).
///
/// # Errors
///
/// Returns an error if any backend statement fails or row re-derivation
/// during a full migration fails.
pub fn execute_migration(
    tx: &dyn SqlTransaction,
    metadata: &MetadataSnapshot,
    plan: &MigrationPlan,
    config: &EngineConfig,
) -> EngineResult<()> {
    ensure_metadata_table(tx)?;

    if plan.wipe_first {
        wipe_everything(tx)?;
    }

    // Written before any store DDL runs: a crash mid-migration still leaves
    // the attempted target version as the persisted ground truth, so the
    // next open's `needsFullMigration()` re-derives whatever is missing.
    write_version(tx, plan.target_version)?;

    for store_plan in &plan.stores {
        execute_store_plan(tx, store_plan, metadata, config)?;
    }
    Ok(())
}

fn execute_store_plan(
    tx: &dyn SqlTransaction,
    plan: &StorePlan,
    metadata: &MetadataSnapshot,
    config: &EngineConfig,
) -> EngineResult<()> {
    match &plan.action {
        StoreAction::Create => create_store(tx, &plan.store, config),
        StoreAction::FullMigration => full_migration(tx, &plan.store, metadata, config),
        StoreAction::InPlaceCopy { dropped_column_indexes } => {
            in_place_copy(tx, &plan.store, dropped_column_indexes, metadata, config)
        }
        StoreAction::Additive { new_indexes } => additive(tx, &plan.store, new_indexes, config),
        StoreAction::IndexOnlyFix { missing_indexes } => index_only_fix(tx, &plan.store, missing_indexes, config),
        StoreAction::NoOp => Ok(()),
    }
}

fn create_store(tx: &dyn SqlTransaction, store: &StoreSchema, config: &EngineConfig) -> EngineResult<()> {
    store::create_store_table(tx, store, config)?;
    for index in &store.indexes {
        store::create_index_object(tx, &store.name, index, config)?;
        write_index_metadata(tx, &store.name, index)?;
    }
    Ok(())
}

fn migration_page_size(store: &StoreSchema) -> u64 {
    let estimated = u64::from(store.estimated_obj_bytes.unwrap_or(crate::config::DEFAULT_ESTIMATED_OBJ_BYTES));
    (crate::config::DB_MIGRATION_MAX_BYTE_TARGET / estimated.max(1)).max(1)
}

/// Drop every physical index/pivot table this store is known to have had
/// (from `metadata`, which may include indexes no longer in the target
/// schema), then every physical index/pivot table the target schema wants,
/// and delete their metadata rows -- the caller recreates everything fresh.
fn drop_all_store_artifacts(
    tx: &dyn SqlTransaction,
    store_name: &str,
    current_indexes: &[IndexSchema],
    metadata: &MetadataSnapshot,
    catalog: &[CatalogEntry],
) -> EngineResult<()> {
    let tables: HashSet<&str> = catalog
        .iter()
        .filter(|e| e.kind == CatalogKind::Table)
        .map(|e| e.name.as_str())
        .collect();
    let indexes: HashSet<&str> = catalog
        .iter()
        .filter(|e| e.kind == CatalogKind::Index)
        .map(|e| e.name.as_str())
        .collect();

    let prefix = format!("{store_name}_");
    let mut known_names: HashSet<String> = metadata
        .indexes
        .keys()
        .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
        .collect();
    known_names.extend(current_indexes.iter().map(|i| i.name.clone()));

    for name in &known_names {
        let pivot = pivot_table_name(store_name, name);
        if tables.contains(pivot.as_str()) {
            tx.execute(&format!("DROP TABLE IF EXISTS {pivot}"), &[])?;
        }
        let sql_index = format!("{store_name}_{name}_idx");
        if indexes.contains(sql_index.as_str()) {
            tx.execute(&format!("DROP INDEX IF EXISTS {sql_index}"), &[])?;
        }
        delete_index_metadata(tx, store_name, name)?;
    }
    Ok(())
}

fn full_migration(
    tx: &dyn SqlTransaction,
    store: &StoreSchema,
    metadata: &MetadataSnapshot,
    config: &EngineConfig,
) -> EngineResult<()> {
    let temp = format!("temp_{}", store.name);
    tx.execute(&format!("ALTER TABLE {} RENAME TO {temp}", store.name), &[])?;

    let catalog = tx.catalog()?;
    drop_all_store_artifacts(tx, &store.name, &store.indexes, metadata, &catalog)?;

    store::create_store_table(tx, store, config)?;
    for index in &store.indexes {
        store::create_index_object(tx, &store.name, index, config)?;
        write_index_metadata(tx, &store.name, index)?;
    }

    // Re-insert every row through the normal put path, which re-derives all
    // index columns and pivots, paginated per spec §4.4.
    let page_size = migration_page_size(store);
    let mut offset: u64 = 0;
    loop {
        let mut page: Vec<Item> = Vec::new();
        tx.run_query_streamed(
            &format!("SELECT nsp_data FROM {temp} LIMIT {page_size} OFFSET {offset}"),
            &[],
            &mut |row| {
                if let Some(Some(data)) = row.into_iter().next() {
                    page.push(serde_json::from_str(&data)?);
                }
                Ok(())
            },
        )?;
        let got = page.len() as u64;
        if got == 0 {
            break;
        }
        store::put(tx, store, &page, config)?;
        offset += got;
        if got < page_size {
            break;
        }
    }

    tx.execute(&format!("DROP TABLE {temp}"), &[])?;
    Ok(())
}

fn in_place_copy(
    tx: &dyn SqlTransaction,
    store: &StoreSchema,
    dropped_column_indexes: &[IndexSchema],
    metadata: &MetadataSnapshot,
    config: &EngineConfig,
) -> EngineResult<()> {
    let temp = format!("temp_{}", store.name);
    tx.execute(&format!("ALTER TABLE {} RENAME TO {temp}", store.name), &[])?;

    for index in dropped_column_indexes {
        tx.execute(&format!("DROP INDEX IF EXISTS {}_{}_idx", store.name, index.name), &[])?;
        delete_index_metadata(tx, &store.name, &index.name)?;
    }

    // "Skipped pivot indexes are additionally dropped": any pivot-backed
    // index this store used to have that is no longer in the target schema.
    let catalog = tx.catalog()?;
    let tables: HashSet<&str> = catalog.iter().filter(|e| e.kind == CatalogKind::Table).map(|e| e.name.as_str()).collect();
    let prefix = format!("{}_", store.name);
    for (key, persisted) in &metadata.indexes {
        let Some(name) = key.strip_prefix(&prefix) else { continue };
        if store.indexes.iter().any(|i| i.name == name) {
            continue;
        }
        if !index_uses_separate_table(persisted, config.supports_fts3) {
            continue;
        }
        let pivot = pivot_table_name(&store.name, name);
        if tables.contains(pivot.as_str()) {
            tx.execute(&format!("DROP TABLE IF EXISTS {pivot}"), &[])?;
        }
        delete_index_metadata(tx, &store.name, name)?;
    }

    store::create_store_table(tx, store, config)?;

    let surviving: Vec<&IndexSchema> = store
        .indexes
        .iter()
        .filter(|i| !index_uses_separate_table(i, config.supports_fts3))
        .collect();

    let mut columns = vec!["nsp_pk".to_string(), "nsp_data".to_string()];
    columns.extend(surviving.iter().map(|i| i.column_name()));
    let column_list = columns.join(", ");
    tx.execute(
        &format!("INSERT INTO {} ({column_list}) SELECT {column_list} FROM {temp}", store.name),
        &[],
    )?;

    for index in &surviving {
        store::create_index_object(tx, &store.name, index, config)?;
    }

    tx.execute(&format!("DROP TABLE {temp}"), &[])?;
    Ok(())
}

fn additive(tx: &dyn SqlTransaction, store: &StoreSchema, new_indexes: &[IndexSchema], config: &EngineConfig) -> EngineResult<()> {
    for index in new_indexes {
        if index_uses_separate_table(index, config.supports_fts3) {
            store::create_index_object(tx, &store.name, index, config)?;
        } else {
            store::add_index_column(tx, &store.name, index)?;
            store::create_index_object(tx, &store.name, index, config)?;
        }
        write_index_metadata(tx, &store.name, index)?;
    }
    Ok(())
}

fn index_only_fix(tx: &dyn SqlTransaction, store: &StoreSchema, missing_indexes: &[IndexSchema], config: &EngineConfig) -> EngineResult<()> {
    for index in missing_indexes {
        store::create_index_object(tx, &store.name, index, config)?;
        write_index_metadata(tx, &store.name, index)?;
    }
    Ok(())
}
