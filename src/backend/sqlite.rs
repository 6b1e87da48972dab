//! `rusqlite`-backed implementation of [`super::SqlTransaction`]. Thin by
//! design: it only translates [`super::SqlParam`]/[`super::SqlRow`] to and
//! from `rusqlite` types, with no planning or indexing logic of its own.

use rusqlite::types::ValueRef;
use rusqlite::ToSql;

use crate::backend::{CatalogEntry, CatalogKind, SqlParam, SqlRow, SqlTransaction};
use crate::error::EngineResult;

/// Wraps a `rusqlite::Transaction` to implement [`SqlTransaction`].
pub struct SqliteTransaction<'conn> {
    inner: rusqlite::Transaction<'conn>,
}

impl<'conn> SqliteTransaction<'conn> {
    #[must_use]
    pub fn new(inner: rusqlite::Transaction<'conn>) -> Self {
        Self { inner }
    }

    /// Consume the wrapper and commit the underlying transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn commit(self) -> EngineResult<()> {
        self.inner.commit().map_err(Into::into)
    }

    /// Consume the wrapper and roll back the underlying transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    pub fn rollback(self) -> EngineResult<()> {
        self.inner.rollback().map_err(Into::into)
    }
}

pub(crate) fn to_rusqlite(param: &SqlParam) -> Box<dyn ToSql + '_> {
    match param {
        SqlParam::Text(s) => Box::new(s.as_str()),
        SqlParam::Int(n) => Box::new(*n),
        SqlParam::Null => Box::new(rusqlite::types::Null),
    }
}

pub(crate) fn row_to_strings(row: &rusqlite::Row, n: usize) -> rusqlite::Result<SqlRow> {
    (0..n)
        .map(|i| match row.get_ref(i)? {
            ValueRef::Null => Ok(None),
            ValueRef::Integer(v) => Ok(Some(v.to_string())),
            ValueRef::Real(v) => Ok(Some(v.to_string())),
            ValueRef::Text(t) => Ok(Some(String::from_utf8_lossy(t).into_owned())),
            ValueRef::Blob(b) => Ok(Some(String::from_utf8_lossy(b).into_owned())),
        })
        .collect()
}

impl SqlTransaction for SqliteTransaction<'_> {
    fn execute(&self, sql: &str, params: &[SqlParam]) -> EngineResult<usize> {
        let bound: Vec<Box<dyn ToSql + '_>> = params.iter().map(to_rusqlite).collect();
        let refs: Vec<&dyn ToSql> = bound.iter().map(AsRef::as_ref).collect();
        self.inner.execute(sql, refs.as_slice()).map_err(Into::into)
    }

    fn run_query(&self, sql: &str, params: &[SqlParam]) -> EngineResult<Vec<SqlRow>> {
        let bound: Vec<Box<dyn ToSql + '_>> = params.iter().map(to_rusqlite).collect();
        let refs: Vec<&dyn ToSql> = bound.iter().map(AsRef::as_ref).collect();

        let mut stmt = self.inner.prepare(sql)?;
        let column_count = stmt.column_count();
        let rows = stmt
            .query_map(refs.as_slice(), |row| row_to_strings(row, column_count))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn catalog(&self) -> EngineResult<Vec<CatalogEntry>> {
        read_catalog(&self.inner)
    }
}

/// Shared `sqlite_master` catalog query, used by both [`SqliteTransaction`]
/// (tests, standalone use) and the provider-level transaction in
/// `crate::provider`.
///
/// # Errors
///
/// Returns an error if the backend query fails.
pub(crate) fn read_catalog(conn: &rusqlite::Connection) -> EngineResult<Vec<CatalogEntry>> {
    let mut stmt = conn.prepare("SELECT name, type, sql FROM sqlite_master WHERE type IN ('table', 'index')")?;
    let entries = stmt
        .query_map([], |row| {
            let name: String = row.get(0)?;
            let kind: String = row.get(1)?;
            let sql: Option<String> = row.get(2)?;
            Ok((name, kind, sql))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(entries
        .into_iter()
        .filter(|(name, _, _)| !name.starts_with("sqlite_"))
        .map(|(name, kind, sql)| CatalogEntry {
            name,
            kind: if kind == "index" { CatalogKind::Index } else { CatalogKind::Table },
            sql,
        })
        .collect())
}

/// Open (creating if absent) a `rusqlite` connection at `path`, with the
/// pragmas this engine relies on: foreign keys off (pivot tables reference
/// primary keys only logically, never via `FOREIGN KEY` constraints, since
/// rows are rewritten wholesale during full migration) and `journal_mode =
/// WAL` for the common case of one writer plus concurrent readers.
///
/// # Errors
///
/// Returns an error if the connection cannot be opened or pragmas fail.
pub fn open_connection(path: &std::path::Path) -> EngineResult<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", false)?;
    Ok(conn)
}

/// Open an in-memory `rusqlite` connection, for tests and ephemeral use.
///
/// # Errors
///
/// Returns an error if the connection cannot be opened.
pub fn open_memory_connection() -> EngineResult<rusqlite::Connection> {
    let conn = rusqlite::Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", false)?;
    Ok(conn)
}
