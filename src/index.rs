//! `IndexEngine` (spec §4.7): `getAll`/`getOnly`/`getRange`/`count*`/
//! `fullTextSearch` against either a column index, a pivot join, or an FTS3
//! virtual table (with `LIKE`-based fallback).

use crate::backend::{SqlParam, SqlTransaction};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::fulltext::break_and_normalize_search_phrase;
use crate::keycodec::FTS_FALLBACK_SEPARATOR;
use crate::schema::{index_uses_separate_table, pivot_table_name, IndexSchema, StoreSchema};
use crate::value::Item;

/// Row traversal order for range/`getAll` queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Forward,
    Reverse,
    /// Suppress the `ORDER BY` clause entirely.
    None,
}

/// How `fullTextSearch` combines its terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    And,
    Or,
}

/// Ceiling any `limit` argument is clamped to (spec §6).
pub const QUERY_LIMIT_CEILING: u64 = 1 << 32;

struct ResolvedIndex {
    from_clause: String,
    data_column: String,
    key_column: String,
    /// True for a column-backed secondary index, where a row that never had
    /// a value at the index's keypath still physically exists with `NULL` in
    /// that column. Such rows are not "in" the index (spec §4.6's
    /// `columnValueForIndex` produces no entry for them) and must be excluded
    /// from `getAll`/`countAll`/unbounded `getRange`/`countRange` the same
    /// way a pivot table simply never grows a row for them.
    nullable_column: bool,
    /// True only when this resolves to the store's own primary-key query
    /// (`index` was `None`), as opposed to a column-backed secondary index,
    /// which also queries the store table directly (`from_clause ==
    /// store.name`) but is not the primary key. Querying the primary key and
    /// querying a column-backed secondary index both read from the store
    /// table, but only the former's `key_column` already *is* `nsp_pk`.
    primary_key: bool,
}

fn resolve_index(store: &StoreSchema, index: Option<&IndexSchema>, config: &EngineConfig) -> ResolvedIndex {
    let Some(index) = index else {
        return ResolvedIndex {
            from_clause: store.name.clone(),
            data_column: "nsp_data".to_string(),
            key_column: "nsp_pk".to_string(),
            nullable_column: false,
            primary_key: true,
        };
    };

    if index_uses_separate_table(index, config.supports_fts3) {
        let pivot = pivot_table_name(&store.name, &index.name);
        if index.include_data_in_index {
            ResolvedIndex {
                from_clause: pivot,
                data_column: "nsp_data".to_string(),
                key_column: "nsp_key".to_string(),
                nullable_column: false,
                primary_key: false,
            }
        } else {
            ResolvedIndex {
                from_clause: format!("{pivot} mi LEFT JOIN {} s ON mi.nsp_refpk = s.nsp_pk", store.name),
                data_column: "s.nsp_data".to_string(),
                key_column: "mi.nsp_key".to_string(),
                nullable_column: false,
                primary_key: false,
            }
        }
    } else {
        ResolvedIndex {
            from_clause: store.name.clone(),
            data_column: "nsp_data".to_string(),
            key_column: index.column_name(),
            nullable_column: true,
            primary_key: false,
        }
    }
}

fn order_clause(resolved: &ResolvedIndex, order: Order) -> String {
    match order {
        Order::Forward => format!(" ORDER BY {} ASC", resolved.key_column),
        Order::Reverse => format!(" ORDER BY {} DESC", resolved.key_column),
        Order::None => String::new(),
    }
}

fn clamp_limit(limit: u64) -> u64 {
    limit.min(QUERY_LIMIT_CEILING)
}

fn paging_clause(limit: Option<u64>, offset: Option<u64>) -> String {
    let mut clause = String::new();
    if let Some(limit) = limit {
        clause.push_str(&format!(" LIMIT {}", clamp_limit(limit)));
    } else if offset.is_some() {
        // SQLite requires a LIMIT before OFFSET; -1 means "no limit".
        clause.push_str(" LIMIT -1");
    }
    if let Some(offset) = offset {
        clause.push_str(&format!(" OFFSET {offset}"));
    }
    clause
}

fn rows_to_items(rows: Vec<crate::backend::SqlRow>) -> EngineResult<Vec<Item>> {
    rows.into_iter()
        .filter_map(|row| row.into_iter().next().flatten())
        .map(|data| serde_json::from_str::<Item>(&data).map_err(EngineError::from))
        .collect()
}

/// `getAll(order, limit, offset)`.
///
/// # Errors
///
/// Returns an error if the backend query fails.
pub fn get_all(
    tx: &dyn SqlTransaction,
    store: &StoreSchema,
    index: Option<&IndexSchema>,
    config: &EngineConfig,
    order: Order,
    limit: Option<u64>,
    offset: Option<u64>,
) -> EngineResult<Vec<Item>> {
    let resolved = resolve_index(store, index, config);
    let (predicate, params) = range_predicate(&resolved, None, None, false, false);
    let sql = format!(
        "SELECT {} FROM {}{}{}{}",
        resolved.data_column,
        resolved.from_clause,
        predicate,
        order_clause(&resolved, order),
        paging_clause(limit, offset)
    );
    rows_to_items(tx.run_query(&sql, &params)?)
}

/// `getOnly(key, order, limit, offset)`.
///
/// # Errors
///
/// Returns an error if the backend query fails.
pub fn get_only(
    tx: &dyn SqlTransaction,
    store: &StoreSchema,
    index: Option<&IndexSchema>,
    config: &EngineConfig,
    key: &str,
    order: Order,
    limit: Option<u64>,
    offset: Option<u64>,
) -> EngineResult<Vec<Item>> {
    let resolved = resolve_index(store, index, config);
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1{}{}",
        resolved.data_column,
        resolved.from_clause,
        resolved.key_column,
        order_clause(&resolved, order),
        paging_clause(limit, offset)
    );
    rows_to_items(tx.run_query(&sql, &[SqlParam::text(key)])?)
}

fn range_predicate(resolved: &ResolvedIndex, lo: Option<&str>, hi: Option<&str>, lo_excl: bool, hi_excl: bool) -> (String, Vec<SqlParam>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    if resolved.nullable_column {
        clauses.push(format!("{} IS NOT NULL", resolved.key_column));
    }
    if let Some(lo) = lo {
        clauses.push(format!("{} {} ?", resolved.key_column, if lo_excl { ">" } else { ">=" }));
        params.push(SqlParam::text(lo));
    }
    if let Some(hi) = hi {
        clauses.push(format!("{} {} ?", resolved.key_column, if hi_excl { "<" } else { "<=" }));
        params.push(SqlParam::text(hi));
    }
    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), params)
    }
}

/// `getRange(lo, hi, loExcl, hiExcl, order, limit, offset)`.
///
/// # Errors
///
/// Returns an error if the backend query fails.
#[allow(clippy::too_many_arguments)]
pub fn get_range(
    tx: &dyn SqlTransaction,
    store: &StoreSchema,
    index: Option<&IndexSchema>,
    config: &EngineConfig,
    lo: Option<&str>,
    hi: Option<&str>,
    lo_excl: bool,
    hi_excl: bool,
    order: Order,
    limit: Option<u64>,
    offset: Option<u64>,
) -> EngineResult<Vec<Item>> {
    let resolved = resolve_index(store, index, config);
    let (predicate, params) = range_predicate(&resolved, lo, hi, lo_excl, hi_excl);
    let sql = format!(
        "SELECT {} FROM {}{}{}{}",
        resolved.data_column,
        resolved.from_clause,
        predicate,
        order_clause(&resolved, order),
        paging_clause(limit, offset)
    );
    rows_to_items(tx.run_query(&sql, &params)?)
}

/// `getKeysForRange(lo, hi, loExcl, hiExcl)`: the serialized index keys in
/// range, used by `removeRange`.
///
/// # Errors
///
/// Returns an error if the backend query fails.
pub fn get_keys_for_range(
    tx: &dyn SqlTransaction,
    store: &StoreSchema,
    index: Option<&IndexSchema>,
    config: &EngineConfig,
    lo: Option<&str>,
    hi: Option<&str>,
    lo_excl: bool,
    hi_excl: bool,
) -> EngineResult<Vec<String>> {
    let resolved = resolve_index(store, index, config);
    let (predicate, params) = range_predicate(&resolved, lo, hi, lo_excl, hi_excl);
    // The primary key is always what `remove` needs, even when ranging over
    // a secondary index: for the primary-key index `key_column` already is
    // `nsp_pk`; for a column-backed secondary index the row lives in the
    // store table itself, so `nsp_pk` is a sibling column, not `key_column`;
    // for a joined pivot we read the store's `nsp_pk` through the join
    // alias; for a no-join (`includeDataInIndex`) pivot the pivot row itself
    // carries the primary key in `nsp_refpk`.
    let pk_column = if resolved.primary_key {
        resolved.key_column.clone()
    } else if resolved.from_clause.contains("LEFT JOIN") {
        "s.nsp_pk".to_string()
    } else if resolved.from_clause == store.name {
        "nsp_pk".to_string()
    } else {
        "nsp_refpk".to_string()
    };
    let sql = format!("SELECT {pk_column} FROM {}{predicate}", resolved.from_clause);
    let rows = tx.run_query(&sql, &params)?;
    Ok(rows
        .into_iter()
        .filter_map(|row| row.into_iter().next().flatten())
        .collect())
}

fn count_with_predicate(
    tx: &dyn SqlTransaction,
    resolved: &ResolvedIndex,
    predicate: &str,
    params: &[SqlParam],
) -> EngineResult<u64> {
    let sql = format!("SELECT COUNT(*) FROM {}{predicate}", resolved.from_clause);
    let rows = tx.run_query(&sql, params)?;
    let count = rows
        .into_iter()
        .next()
        .and_then(|row| row.into_iter().next().flatten())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);
    Ok(count)
}

/// `countAll()`.
///
/// # Errors
///
/// Returns an error if the backend query fails.
pub fn count_all(tx: &dyn SqlTransaction, store: &StoreSchema, index: Option<&IndexSchema>, config: &EngineConfig) -> EngineResult<u64> {
    let resolved = resolve_index(store, index, config);
    let (predicate, params) = range_predicate(&resolved, None, None, false, false);
    count_with_predicate(tx, &resolved, &predicate, &params)
}

/// `countOnly(key)`.
///
/// # Errors
///
/// Returns an error if the backend query fails.
pub fn count_only(
    tx: &dyn SqlTransaction,
    store: &StoreSchema,
    index: Option<&IndexSchema>,
    config: &EngineConfig,
    key: &str,
) -> EngineResult<u64> {
    let resolved = resolve_index(store, index, config);
    count_with_predicate(
        tx,
        &resolved,
        &format!(" WHERE {} = ?1", resolved.key_column),
        &[SqlParam::text(key)],
    )
}

/// `countRange(lo, hi, loExcl, hiExcl)`.
///
/// # Errors
///
/// Returns an error if the backend query fails.
pub fn count_range(
    tx: &dyn SqlTransaction,
    store: &StoreSchema,
    index: Option<&IndexSchema>,
    config: &EngineConfig,
    lo: Option<&str>,
    hi: Option<&str>,
    lo_excl: bool,
    hi_excl: bool,
) -> EngineResult<u64> {
    let resolved = resolve_index(store, index, config);
    let (predicate, params) = range_predicate(&resolved, lo, hi, lo_excl, hi_excl);
    count_with_predicate(tx, &resolved, &predicate, &params)
}

/// `fullTextSearch(phrase, resolution, limit)`.
///
/// # Errors
///
/// Returns an error if the backend query fails.
pub fn full_text_search(
    tx: &dyn SqlTransaction,
    store: &StoreSchema,
    index: &IndexSchema,
    config: &EngineConfig,
    phrase: &str,
    resolution: Resolution,
    limit: Option<u64>,
) -> EngineResult<Vec<Item>> {
    let terms = break_and_normalize_search_phrase(phrase);
    if terms.is_empty() {
        return Ok(Vec::new());
    }

    let resolved = resolve_index(store, Some(index), config);

    if config.supports_fts3 {
        match resolution {
            Resolution::And => {
                let match_arg = terms.iter().map(|t| format!("{t}*")).collect::<Vec<_>>().join(" ");
                let sql = format!(
                    "SELECT {} FROM {} WHERE {} MATCH ?1{}",
                    resolved.data_column,
                    resolved.from_clause,
                    resolved.key_column,
                    paging_clause(limit, None)
                );
                rows_to_items(tx.run_query(&sql, &[SqlParam::text(match_arg)])?)
            }
            Resolution::Or => {
                let subqueries: Vec<String> = terms
                    .iter()
                    .enumerate()
                    .map(|(i, _)| {
                        format!(
                            "SELECT {} FROM {} WHERE {} MATCH ?{}",
                            resolved.data_column,
                            resolved.from_clause,
                            resolved.key_column,
                            i + 1
                        )
                    })
                    .collect();
                let params: Vec<SqlParam> = terms.iter().map(|t| SqlParam::text(format!("{t}*"))).collect();
                let sql = format!(
                    "SELECT DISTINCT * FROM ({}){}",
                    subqueries.join(" UNION ALL "),
                    paging_clause(limit, None)
                );
                rows_to_items(tx.run_query(&sql, &params)?)
            }
        }
    } else {
        let joiner = match resolution {
            Resolution::And => " AND ",
            Resolution::Or => " OR ",
        };
        let predicate = terms
            .iter()
            .map(|_| format!("{} LIKE ?", resolved.key_column))
            .collect::<Vec<_>>()
            .join(joiner);
        let params: Vec<SqlParam> = terms
            .iter()
            .map(|t| SqlParam::text(format!("%{FTS_FALLBACK_SEPARATOR}{t}%")))
            .collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {predicate}{}",
            resolved.data_column,
            resolved.from_clause,
            paging_clause(limit, None)
        );
        rows_to_items(tx.run_query(&sql, &params)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sqlite::{open_memory_connection, SqliteTransaction};
    use crate::keypath::KeyPath;
    use crate::schema::StoreSchema;
    use serde_json::json;

    fn setup() -> (rusqlite::Connection, StoreSchema) {
        let conn = open_memory_connection().unwrap();
        let store = StoreSchema::new("widgets", KeyPath::single("id"))
            .with_index(IndexSchema::new("by_v", KeyPath::single("v")));
        (conn, store)
    }

    #[test]
    fn get_all_orders_forward_and_reverse() {
        let (mut conn, store) = setup();
        let tx = conn.transaction().unwrap();
        tx.execute(
            "CREATE TABLE widgets (nsp_pk TEXT PRIMARY KEY, nsp_data TEXT, nsp_i_by_v TEXT)",
            [],
        )
        .unwrap();
        tx.execute(
            "INSERT INTO widgets VALUES ('k1', '{\"id\":\"k1\",\"v\":5}', '0000000000000005'), ('k2', '{\"id\":\"k2\",\"v\":3}', '0000000000000003')",
            [],
        )
        .unwrap();
        let wrapped = SqliteTransaction::new(tx);

        let forward = get_all(
            &wrapped,
            &store,
            store.index("by_v"),
            &EngineConfig::for_sqlite(),
            Order::Forward,
            None,
            None,
        )
        .unwrap();
        assert_eq!(forward[0], json!({"id": "k2", "v": 3}));

        let reverse = get_all(
            &wrapped,
            &store,
            store.index("by_v"),
            &EngineConfig::for_sqlite(),
            Order::Reverse,
            None,
            None,
        )
        .unwrap();
        assert_eq!(reverse[0], json!({"id": "k1", "v": 5}));
    }

    #[test]
    fn limit_is_clamped_to_ceiling() {
        assert_eq!(clamp_limit(u64::MAX), QUERY_LIMIT_CEILING);
        assert_eq!(clamp_limit(5), 5);
    }
}
