//! The SQL transaction collaborator contract (spec §6: "Backend transaction
//! object"). `MigrationPlanner`/`MigrationExecutor`/the SQL-backed
//! `StoreEngine`/`IndexEngine` are written against [`SqlTransaction`] rather
//! than `rusqlite::Transaction` directly, so the core stays generic across
//! any relational-column backend even though [`sqlite::SqliteTransaction`] is
//! the only one wired up.

pub mod sqlite;

use crate::error::EngineResult;

/// One row of query results, as plain SQL text -- every column this engine
/// ever reads back (`nsp_pk`, `nsp_data`, `COUNT(*)`, catalog columns) is
/// representable as `TEXT`/`INTEGER` rendered to a string.
pub type SqlRow = Vec<Option<String>>;

/// A catalog entry for one physical table or index, as reported by the
/// backend's equivalent of `sqlite_master`.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub name: String,
    pub kind: CatalogKind,
    /// The original `CREATE TABLE`/`CREATE INDEX` SQL text, when available.
    pub sql: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Table,
    Index,
}

/// A bound SQL parameter. Kept as an owned enum (rather than
/// `&dyn ToSql`) so trait methods stay object-safe and callers can build
/// parameter lists without borrowing games across batch loops.
#[derive(Debug, Clone)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Null,
}

impl SqlParam {
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        SqlParam::Text(s.into())
    }
}

/// The collaborator contract a relational-column backend must provide for
/// the core engine to plan and execute migrations, and to run store/index
/// queries, against it.
pub trait SqlTransaction {
    /// Execute a statement with no result rows; returns the affected row
    /// count.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Backend`/`EngineError::Conflict` on failure.
    fn execute(&self, sql: &str, params: &[SqlParam]) -> EngineResult<usize>;

    /// Run a query and materialize every row as a vector of optional text
    /// values, one per selected column, in column order.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Backend` on failure.
    fn run_query(&self, sql: &str, params: &[SqlParam]) -> EngineResult<Vec<SqlRow>>;

    /// Stream query results through a row callback rather than materializing
    /// them, used only by full migration's paginated row re-insertion (spec
    /// §6: `internal_getResultsFromQueryWithCallback`).
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Backend` on failure, or whatever `on_row`
    /// returns.
    fn run_query_streamed(
        &self,
        sql: &str,
        params: &[SqlParam],
        on_row: &mut dyn FnMut(SqlRow) -> EngineResult<()>,
    ) -> EngineResult<()> {
        for row in self.run_query(sql, params)? {
            on_row(row)?;
        }
        Ok(())
    }

    /// List every table and index in the backend's catalog, excluding
    /// housekeeping entries the planner doesn't care about.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Backend` on failure.
    fn catalog(&self) -> EngineResult<Vec<CatalogEntry>>;
}

/// Extract column names from a `CREATE TABLE` statement's comma-separated
/// column list, per spec §4.4: "parsing the comma-separated column list
/// between the outer parentheses". Naive but sufficient for the column
/// definitions this engine itself ever emits (no nested parens inside a
/// column definition except `DEFAULT (...)`, which we never generate).
#[must_use]
pub fn parse_columns_from_create_sql(sql: &str) -> Vec<String> {
    let Some(open) = sql.find('(') else {
        return Vec::new();
    };
    let Some(close) = sql.rfind(')') else {
        return Vec::new();
    };
    if close <= open {
        return Vec::new();
    }

    sql[open + 1..close]
        .split(',')
        .filter_map(|def| {
            let def = def.trim();
            if def.is_empty() {
                return None;
            }
            let upper = def.to_uppercase();
            if upper.starts_with("PRIMARY KEY")
                || upper.starts_with("FOREIGN KEY")
                || upper.starts_with("UNIQUE")
                || upper.starts_with("CHECK")
            {
                return None;
            }
            def.split_whitespace().next().map(|s| {
                s.trim_matches(|c| c == '"' || c == '`' || c == '\'')
                    .to_string()
            })
        })
        .collect()
}

/// Does this catalog entry belong to an FTS3 virtual table's generated side
/// tables (spec §4.4: ignore tables whose name ends in `_content`,
/// `_segments`, `_segdir`)?
#[must_use]
pub fn is_fts_side_table(name: &str) -> bool {
    name.ends_with("_content") || name.ends_with("_segments") || name.ends_with("_segdir")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_column_list() {
        let sql = "CREATE TABLE widgets (nsp_pk TEXT PRIMARY KEY, nsp_data TEXT, nsp_i_v TEXT)";
        assert_eq!(
            parse_columns_from_create_sql(sql),
            vec!["nsp_pk", "nsp_data", "nsp_i_v"]
        );
    }

    #[test]
    fn skips_table_level_constraints() {
        let sql = "CREATE TABLE t (nsp_pk TEXT, nsp_data TEXT, PRIMARY KEY (nsp_pk))";
        assert_eq!(parse_columns_from_create_sql(sql), vec!["nsp_pk", "nsp_data"]);
    }

    #[test]
    fn fts_side_tables_are_recognized() {
        assert!(is_fts_side_table("store_body_content"));
        assert!(is_fts_side_table("store_body_segments"));
        assert!(is_fts_side_table("store_body_segdir"));
        assert!(!is_fts_side_table("store_body"));
    }
}
