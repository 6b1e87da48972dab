//! `StoreEngine` (spec §4.6): `put`/`get`/`getMultiple`/`remove`/
//! `removeRange`/`clearAllData`, keeping column-form and pivot-table-form
//! indexes in lockstep with the primary row. Also carries the DDL helpers
//! `MigrationExecutor` uses to create/drop the physical store table and its
//! secondary indexes.

use crate::backend::{SqlParam, SqlTransaction};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::fulltext::get_full_text_index_words_for_item;
use crate::index::{self, Order};
use crate::keycodec::{self, FTS_FALLBACK_SEPARATOR};
use crate::keypath::{get_multi_entry_values, get_serialized_key_for_keypath};
use crate::schema::{index_uses_separate_table, pivot_table_name, IndexSchema, StoreSchema};
use crate::value::{Item, KeyValue};

/// `SQLITE_MAX_SQL_LENGTH_IN_BYTES`, minus a 200-byte safety margin, used to
/// bound `remove`'s batch size alongside the parameter-count limit.
pub const MAX_REMOVE_SQL_BYTES: usize = 1_000_000 - 200;

fn column_indexes(store: &StoreSchema, config: &EngineConfig) -> Vec<&IndexSchema> {
    store
        .indexes
        .iter()
        .filter(|i| !index_uses_separate_table(i, config.supports_fts3))
        .collect()
}

fn pivot_indexes(store: &StoreSchema, config: &EngineConfig) -> Vec<&IndexSchema> {
    store
        .indexes
        .iter()
        .filter(|i| index_uses_separate_table(i, config.supports_fts3))
        .collect()
}

/// Emit `CREATE TABLE` for a store: `nsp_pk`, `nsp_data`, and one
/// `nsp_i_<name>` column per column-backed index.
///
/// # Errors
///
/// Returns an error if the backend statement fails.
pub fn create_store_table(tx: &dyn SqlTransaction, store: &StoreSchema, config: &EngineConfig) -> EngineResult<()> {
    let mut sql = format!("CREATE TABLE {} (nsp_pk TEXT PRIMARY KEY, nsp_data TEXT", store.name);
    for index in column_indexes(store, config) {
        sql.push_str(&format!(", {} TEXT", index.column_name()));
    }
    sql.push(')');
    tx.execute(&sql, &[])?;
    Ok(())
}

/// Drop a store's primary table.
///
/// # Errors
///
/// Returns an error if the backend statement fails.
pub fn drop_store_table(tx: &dyn SqlTransaction, store_name: &str) -> EngineResult<()> {
    tx.execute(&format!("DROP TABLE IF EXISTS {store_name}"), &[])?;
    Ok(())
}

pub(crate) fn sql_index_name(store_name: &str, index_name: &str) -> String {
    format!("{store_name}_{index_name}_idx")
}

/// Create the physical artifact backing one secondary index: a SQL index on
/// a column-backed index, or a pivot/FTS3 table for a separate-table index.
///
/// # Errors
///
/// Returns an error if the backend statement fails.
pub fn create_index_object(
    tx: &dyn SqlTransaction,
    store_name: &str,
    index: &IndexSchema,
    config: &EngineConfig,
) -> EngineResult<()> {
    if index_uses_separate_table(index, config.supports_fts3) {
        let pivot = pivot_table_name(store_name, &index.name);
        let mut columns = vec!["nsp_key TEXT", "nsp_refpk TEXT"];
        if index.include_data_in_index {
            columns.push("nsp_data TEXT");
        }
        if index.full_text && config.supports_fts3 {
            tx.execute(
                &format!(
                    "CREATE VIRTUAL TABLE {pivot} USING fts3({})",
                    columns.iter().map(|c| c.split(' ').next().unwrap()).collect::<Vec<_>>().join(", ")
                ),
                &[],
            )?;
        } else {
            tx.execute(&format!("CREATE TABLE {pivot} ({})", columns.join(", ")), &[])?;
        }
    } else {
        let unique = if index.unique { "UNIQUE " } else { "" };
        tx.execute(
            &format!(
                "CREATE {unique}INDEX {} ON {store_name} ({})",
                sql_index_name(store_name, &index.name),
                index.column_name()
            ),
            &[],
        )?;
    }
    Ok(())
}

/// Drop the physical artifact backing one secondary index.
///
/// # Errors
///
/// Returns an error if the backend statement fails.
pub fn drop_index_object(
    tx: &dyn SqlTransaction,
    store_name: &str,
    index: &IndexSchema,
    config: &EngineConfig,
) -> EngineResult<()> {
    if index_uses_separate_table(index, config.supports_fts3) {
        let pivot = pivot_table_name(store_name, &index.name);
        tx.execute(&format!("DROP TABLE IF EXISTS {pivot}"), &[])?;
    } else {
        tx.execute(&format!("DROP INDEX IF EXISTS {}", sql_index_name(store_name, &index.name)), &[])?;
    }
    Ok(())
}

/// Add a column for a newly-additive `doNotBackfill` column-backed index to
/// an existing table.
///
/// # Errors
///
/// Returns an error if the backend statement fails.
pub fn add_index_column(tx: &dyn SqlTransaction, store_name: &str, index: &IndexSchema) -> EngineResult<()> {
    tx.execute(
        &format!("ALTER TABLE {store_name} ADD COLUMN {} TEXT", index.column_name()),
        &[],
    )?;
    Ok(())
}

fn column_value_for_index(item: &Item, index: &IndexSchema) -> EngineResult<Option<String>> {
    if index.full_text {
        let path = index.key_path().paths()[0].to_string();
        let tokens = get_full_text_index_words_for_item(&path, item);
        if tokens.is_empty() {
            return Ok(None);
        }
        return Ok(Some(format!("{FTS_FALLBACK_SEPARATOR}{}", tokens.join(FTS_FALLBACK_SEPARATOR))));
    }

    match get_serialized_key_for_keypath(item, &index.key_path()) {
        Ok(value) => Ok(Some(value)),
        Err(EngineError::BadKey { .. }) => Ok(None),
        Err(other) => Err(other),
    }
}

/// `put(items)`: upsert rows and keep every secondary index in lockstep.
///
/// # Errors
///
/// Returns an error if key/value extraction fails or the backend statement
/// fails (including unique-index conflicts, surfaced as
/// `EngineError::Conflict`).
pub fn put(tx: &dyn SqlTransaction, store: &StoreSchema, items: &[Item], config: &EngineConfig) -> EngineResult<()> {
    if items.is_empty() {
        return Ok(());
    }

    let columns = column_indexes(store, config);
    let pivots = pivot_indexes(store, config);

    let mut pks = Vec::with_capacity(items.len());
    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        let pk = get_serialized_key_for_keypath(item, &store.primary_key_path)?;
        let data = serde_json::to_string(item)?;
        let mut values = Vec::with_capacity(columns.len());
        for index in &columns {
            values.push(column_value_for_index(item, index)?);
        }
        pks.push(pk.clone());
        rows.push((pk, data, values));
    }

    upsert_rows(tx, &store.name, &columns, &rows, config.max_variables)?;

    for index in &pivots {
        replace_pivot_rows(tx, store, index, items, &pks, config)?;
    }

    Ok(())
}

fn upsert_rows(
    tx: &dyn SqlTransaction,
    store_name: &str,
    columns: &[&IndexSchema],
    rows: &[(String, String, Vec<Option<String>>)],
    max_variables: usize,
) -> EngineResult<()> {
    let params_per_row = 2 + columns.len();
    let batch_size = (max_variables / params_per_row.max(1)).max(1);

    for chunk in rows.chunks(batch_size) {
        let mut sql = format!("INSERT INTO {store_name} (nsp_pk, nsp_data");
        for index in columns {
            sql.push_str(&format!(", {}", index.column_name()));
        }
        sql.push_str(") VALUES ");

        let mut params = Vec::with_capacity(chunk.len() * params_per_row);
        let mut placeholders = Vec::with_capacity(chunk.len());
        for (pk, data, values) in chunk {
            params.push(SqlParam::text(pk));
            params.push(SqlParam::text(data));
            for value in values {
                params.push(match value {
                    Some(s) => SqlParam::text(s),
                    None => SqlParam::Null,
                });
            }
            placeholders.push(format!("({})", vec!["?"; params_per_row].join(", ")));
        }
        sql.push_str(&placeholders.join(", "));

        // Conflict target is nsp_pk only, not `OR REPLACE`: a unique-index
        // collision on a different row must still raise a constraint error.
        sql.push_str(" ON CONFLICT(nsp_pk) DO UPDATE SET nsp_data = excluded.nsp_data");
        for index in columns {
            let col = index.column_name();
            sql.push_str(&format!(", {col} = excluded.{col}"));
        }
        tx.execute(&sql, &params)?;
    }
    Ok(())
}

fn replace_pivot_rows(
    tx: &dyn SqlTransaction,
    store: &StoreSchema,
    index: &IndexSchema,
    items: &[Item],
    pks: &[String],
    config: &EngineConfig,
) -> EngineResult<()> {
    let pivot = pivot_table_name(&store.name, &index.name);

    for chunk in pks.chunks(config.max_variables.max(1)) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let params: Vec<SqlParam> = chunk.iter().map(SqlParam::text).collect();
        tx.execute(&format!("DELETE FROM {pivot} WHERE nsp_refpk IN ({placeholders})"), &params)?;
    }

    let mut pivot_rows: Vec<(String, String, Option<String>)> = Vec::new();
    for (item, pk) in items.iter().zip(pks.iter()) {
        if index.multi_entry {
            let path = index.key_path().paths()[0].to_string();
            for component in get_multi_entry_values(item, &path)? {
                let key = keycodec::serialize_key(&KeyValue::Single(component))?;
                let data = index.include_data_in_index.then(|| serde_json::to_string(item)).transpose()?;
                pivot_rows.push((key, pk.clone(), data));
            }
        } else {
            // FTS3-backed: one row per item, nsp_key is space-joined tokens.
            let path = index.key_path().paths()[0].to_string();
            let tokens = get_full_text_index_words_for_item(&path, item);
            if !tokens.is_empty() {
                let data = index.include_data_in_index.then(|| serde_json::to_string(item)).transpose()?;
                pivot_rows.push((tokens.join(" "), pk.clone(), data));
            }
        }
    }

    let per_row_params = if index.include_data_in_index { 3 } else { 2 };
    let batch_size = (config.max_variables / per_row_params).max(1);
    for chunk in pivot_rows.chunks(batch_size) {
        let columns = if index.include_data_in_index {
            "nsp_key, nsp_refpk, nsp_data"
        } else {
            "nsp_key, nsp_refpk"
        };
        let mut sql = format!("INSERT INTO {pivot} ({columns}) VALUES ");
        let mut params = Vec::with_capacity(chunk.len() * per_row_params);
        let mut placeholders = Vec::with_capacity(chunk.len());
        for (key, refpk, data) in chunk {
            params.push(SqlParam::text(key));
            params.push(SqlParam::text(refpk));
            if index.include_data_in_index {
                params.push(SqlParam::text(data.clone().unwrap_or_default()));
            }
            placeholders.push(format!("({})", vec!["?"; per_row_params].join(", ")));
        }
        sql.push_str(&placeholders.join(", "));
        tx.execute(&sql, &params)?;
    }
    Ok(())
}

/// `get(key)`.
///
/// # Errors
///
/// Returns an error if the backend query fails or the stored JSON is
/// corrupt.
pub fn get(tx: &dyn SqlTransaction, store: &StoreSchema, key: &str) -> EngineResult<Option<Item>> {
    let rows = tx.run_query(
        &format!("SELECT nsp_data FROM {} WHERE nsp_pk = ?1", store.name),
        &[SqlParam::text(key)],
    )?;
    rows.into_iter()
        .next()
        .and_then(|row| row.into_iter().next().flatten())
        .map(|data| serde_json::from_str(&data).map_err(EngineError::from))
        .transpose()
}

/// `getMultiple(keys)`.
///
/// # Errors
///
/// Returns an error if the backend query fails or stored JSON is corrupt.
pub fn get_multiple(tx: &dyn SqlTransaction, store: &StoreSchema, keys: &[String], config: &EngineConfig) -> EngineResult<Vec<Item>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let mut items = Vec::with_capacity(keys.len());
    for chunk in keys.chunks(config.max_variables.max(1)) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let params: Vec<SqlParam> = chunk.iter().map(SqlParam::text).collect();
        let sql = format!("SELECT nsp_data FROM {} WHERE nsp_pk IN ({placeholders})", store.name);
        for row in tx.run_query(&sql, &params)? {
            if let Some(Some(data)) = row.into_iter().next() {
                items.push(serde_json::from_str(&data)?);
            }
        }
    }
    Ok(items)
}

/// `remove(keys)`: partitions by both `maxVariables` and a maximum SQL
/// length, deleting from every pivot table before the primary table in each
/// batch.
///
/// # Errors
///
/// Returns an error if the backend statement fails.
pub fn remove(tx: &dyn SqlTransaction, store: &StoreSchema, keys: &[String], config: &EngineConfig) -> EngineResult<()> {
    if keys.is_empty() {
        return Ok(());
    }

    for batch in batch_keys_by_length(keys, config.max_variables) {
        for index in pivot_indexes(store, config) {
            let pivot = pivot_table_name(&store.name, &index.name);
            let placeholders = vec!["?"; batch.len()].join(", ");
            let params: Vec<SqlParam> = batch.iter().map(SqlParam::text).collect();
            tx.execute(&format!("DELETE FROM {pivot} WHERE nsp_refpk IN ({placeholders})"), &params)?;
        }

        let placeholders = vec!["?"; batch.len()].join(", ");
        let params: Vec<SqlParam> = batch.iter().map(SqlParam::text).collect();
        tx.execute(&format!("DELETE FROM {} WHERE nsp_pk IN ({placeholders})", store.name), &params)?;
    }
    Ok(())
}

/// Partition `keys` into batches bounded by `maxVariables` and by
/// [`MAX_REMOVE_SQL_BYTES`] of rendered `IN (...)` text.
fn batch_keys_by_length<'a>(keys: &'a [String], max_variables: usize) -> Vec<&'a [String]> {
    let mut batches = Vec::new();
    let mut start = 0;
    while start < keys.len() {
        let mut end = start;
        let mut byte_len = 0usize;
        while end < keys.len() && end - start < max_variables.max(1) {
            let next_len = keys[end].len() + 4; // quoting/comma overhead estimate
            if end > start && byte_len + next_len > MAX_REMOVE_SQL_BYTES {
                break;
            }
            byte_len += next_len;
            end += 1;
        }
        if end == start {
            end = start + 1; // always make progress even for one oversized key
        }
        batches.push(&keys[start..end]);
        start = end;
    }
    batches
}

/// `removeRange(indexName, low, high, lowExcl, highExcl)`: resolves the
/// named index's in-range primary keys and removes those rows.
///
/// # Errors
///
/// Returns an error if range resolution or removal fails.
pub fn remove_range(
    tx: &dyn SqlTransaction,
    store: &StoreSchema,
    index: Option<&IndexSchema>,
    config: &EngineConfig,
    lo: Option<&str>,
    hi: Option<&str>,
    lo_excl: bool,
    hi_excl: bool,
) -> EngineResult<()> {
    let keys = index::get_keys_for_range(tx, store, index, config, lo, hi, lo_excl, hi_excl)?;
    remove(tx, store, &keys, config)
}

/// `clearAllData()`: deletes every row from every pivot table, then every
/// row from the primary table. The physical tables themselves persist for
/// the life of the database (spec §3 Lifecycles).
///
/// # Errors
///
/// Returns an error if the backend statement fails.
pub fn clear_all_data(tx: &dyn SqlTransaction, store: &StoreSchema, config: &EngineConfig) -> EngineResult<()> {
    for index in pivot_indexes(store, config) {
        let pivot = pivot_table_name(&store.name, &index.name);
        tx.execute(&format!("DELETE FROM {pivot}"), &[])?;
    }
    tx.execute(&format!("DELETE FROM {}", store.name), &[])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sqlite::{open_memory_connection, SqliteTransaction};
    use crate::keypath::KeyPath;
    use serde_json::json;

    fn fresh_store(store: &StoreSchema, config: &EngineConfig) -> (rusqlite::Connection,) {
        let mut conn = open_memory_connection().unwrap();
        {
            let tx = conn.transaction().unwrap();
            let wrapped = SqliteTransaction::new(tx);
            create_store_table(&wrapped, store, config).unwrap();
            for index in &store.indexes {
                create_index_object(&wrapped, &store.name, index, config).unwrap();
            }
            wrapped.commit().unwrap();
        }
        (conn,)
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = StoreSchema::new("widgets", KeyPath::single("id"));
        let config = EngineConfig::for_sqlite();
        let (mut conn,) = fresh_store(&store, &config);
        let tx = conn.transaction().unwrap();
        let wrapped = SqliteTransaction::new(tx);

        let item = json!({"id": "k1", "v": 10});
        put(&wrapped, &store, std::slice::from_ref(&item), &config).unwrap();
        let fetched = get(&wrapped, &store, "k1").unwrap();
        assert_eq!(fetched, Some(item));
    }

    #[test]
    fn remove_deletes_row() {
        let store = StoreSchema::new("widgets", KeyPath::single("id"));
        let config = EngineConfig::for_sqlite();
        let (mut conn,) = fresh_store(&store, &config);
        let tx = conn.transaction().unwrap();
        let wrapped = SqliteTransaction::new(tx);

        let item = json!({"id": "k1", "v": 10});
        put(&wrapped, &store, std::slice::from_ref(&item), &config).unwrap();
        remove(&wrapped, &store, &["k1".to_string()], &config).unwrap();
        assert_eq!(get(&wrapped, &store, "k1").unwrap(), None);
    }

    #[test]
    fn multi_entry_index_produces_one_pivot_row_per_tag() {
        let store = StoreSchema::new("posts", KeyPath::single("id"))
            .with_index(IndexSchema::new("tags", KeyPath::single("tags")).multi_entry());
        let config = EngineConfig::for_sqlite();
        let (mut conn,) = fresh_store(&store, &config);
        let tx = conn.transaction().unwrap();
        let wrapped = SqliteTransaction::new(tx);

        let item = json!({"id": "p", "tags": ["red", "green"]});
        put(&wrapped, &store, std::slice::from_ref(&item), &config).unwrap();

        let red = index::get_only(
            &wrapped,
            &store,
            store.index("tags"),
            &config,
            "red",
            Order::None,
            None,
            None,
        )
        .unwrap();
        assert_eq!(red.len(), 1);
        let green = index::get_only(
            &wrapped,
            &store,
            store.index("tags"),
            &config,
            "green",
            Order::None,
            None,
            None,
        )
        .unwrap();
        assert_eq!(green.len(), 1);
    }

    #[test]
    fn batching_respects_max_variables() {
        let keys: Vec<String> = (0..10).map(|i| format!("k{i}")).collect();
        let batches = batch_keys_by_length(&keys, 3);
        assert!(batches.iter().all(|b| b.len() <= 3));
        assert_eq!(batches.iter().map(|b| b.len()).sum::<usize>(), 10);
    }

    #[test]
    fn remove_range_over_column_backed_secondary_index_deletes_correct_row() {
        let store = StoreSchema::new("widgets", KeyPath::single("id"))
            .with_index(IndexSchema::new("by_v", KeyPath::single("v")));
        let config = EngineConfig::for_sqlite();
        let (mut conn,) = fresh_store(&store, &config);
        let tx = conn.transaction().unwrap();
        let wrapped = SqliteTransaction::new(tx);

        put(
            &wrapped,
            &store,
            &[
                json!({"id": "k1", "v": 1}),
                json!({"id": "k2", "v": 2}),
                json!({"id": "k3", "v": 3}),
            ],
            &config,
        )
        .unwrap();

        let bound = crate::keycodec::encode_number(2.0);
        remove_range(
            &wrapped,
            &store,
            store.index("by_v"),
            &config,
            Some(&bound),
            Some(&bound),
            false,
            false,
        )
        .unwrap();

        assert_eq!(get(&wrapped, &store, "k1").unwrap(), Some(json!({"id": "k1", "v": 1})));
        assert_eq!(get(&wrapped, &store, "k2").unwrap(), None);
        assert_eq!(get(&wrapped, &store, "k3").unwrap(), Some(json!({"id": "k3", "v": 3})));
    }

    #[test]
    fn random_put_remove_sequence_leaves_store_consistent() {
        use rand::seq::SliceRandom;
        use rand::Rng;

        let store = StoreSchema::new("widgets", KeyPath::single("id"));
        let config = EngineConfig::for_sqlite();
        let (mut conn,) = fresh_store(&store, &config);
        let mut rng = rand::rng();

        let mut live = std::collections::HashSet::new();
        for round in 0..50 {
            let tx = conn.transaction().unwrap();
            let wrapped = SqliteTransaction::new(tx);

            if round % 3 == 0 && !live.is_empty() {
                let victim = live.iter().next().cloned().unwrap();
                remove(&wrapped, &store, &[victim.clone()], &config).unwrap();
                live.remove(&victim);
            } else {
                let id = format!("k{}", rng.random_range(0..1000));
                let item = json!({"id": &id, "v": rng.random_range(-1000..1000)});
                put(&wrapped, &store, std::slice::from_ref(&item), &config).unwrap();
                live.insert(id);
            }
            wrapped.commit().unwrap();
        }

        let tx = conn.transaction().unwrap();
        let wrapped = SqliteTransaction::new(tx);
        let mut remaining: Vec<_> = live.into_iter().collect();
        remaining.shuffle(&mut rng);
        for id in remaining {
            assert!(get(&wrapped, &store, &id).unwrap().is_some(), "expected {id} to still be present");
        }
    }
}
