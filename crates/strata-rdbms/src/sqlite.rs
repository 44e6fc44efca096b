//! `SQLite` backend built on `rusqlite`.
//!
//! File databases are opened in WAL mode with the configured busy timeout
//! so readers and a writer can proceed concurrently across pooled
//! connections. `sqlite::memory:` opens a named shared-cache in-memory
//! database kept alive by the factory for its whole lifetime.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, ErrorCode, OpenFlags};
use tracing::debug;

use crate::connection::{ColumnInfo, Connection, ConnectionFactory, TransactionMode};
use crate::error::{BackendError, BackendErrorKind, BackendResult, StoreError};
use crate::schema::quote_ident;
use crate::types::SqlValue;

static MEMORY_DB_SEQ: AtomicU64 = AtomicU64::new(0);

/// Where a factory's database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteTarget {
    /// A database file.
    File(PathBuf),
    /// A shared-cache in-memory database with the given URI.
    Memory(String),
}

/// Opens `SQLite` connections for one database.
#[derive(Debug)]
pub struct SqliteConnectionFactory {
    target: SqliteTarget,
    busy_timeout: Duration,
    /// Holds in-memory databases open between leases.
    keeper: Option<Mutex<rusqlite::Connection>>,
}

impl SqliteConnectionFactory {
    /// Creates a factory for a database file.
    pub fn file(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            target: SqliteTarget::File(path.into()),
            busy_timeout,
            keeper: None,
        }
    }

    /// Creates a factory for a fresh in-memory database.
    ///
    /// # Errors
    ///
    /// Returns a fatal backend error if the database cannot be created.
    pub fn memory(busy_timeout: Duration) -> BackendResult<Self> {
        let seq = MEMORY_DB_SEQ.fetch_add(1, Ordering::Relaxed);
        let uri = format!(
            "file:strata-mem-{}-{seq}?mode=memory&cache=shared",
            std::process::id()
        );
        let target = SqliteTarget::Memory(uri);
        let keeper = open(&target, busy_timeout)?;
        Ok(Self {
            target,
            busy_timeout,
            keeper: Some(Mutex::new(keeper)),
        })
    }

    /// Creates a factory from a backend URL.
    ///
    /// Accepted forms are `jdbc:sqlite:<path>`, `sqlite:<path>`,
    /// `sqlite://<path>`, a bare path, and `:memory:` in any of them.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Configuration` for other schemes and
    /// `StoreError::Fatal` if an in-memory database cannot be created.
    pub fn from_url(url: &str, busy_timeout: Duration) -> Result<Self, StoreError> {
        let target = parse_url(url)?;
        match target {
            SqliteTarget::File(path) => Ok(Self::file(path, busy_timeout)),
            SqliteTarget::Memory(_) => {
                Self::memory(busy_timeout).map_err(|e| StoreError::Fatal(e.message))
            }
        }
    }

    /// Database location.
    #[must_use]
    pub fn target(&self) -> &SqliteTarget {
        &self.target
    }
}

impl ConnectionFactory for SqliteConnectionFactory {
    fn connect(&self) -> BackendResult<Box<dyn Connection>> {
        let conn = open(&self.target, self.busy_timeout)?;
        Ok(Box::new(SqliteConnection { conn }))
    }

    fn describe(&self) -> String {
        match &self.target {
            SqliteTarget::File(path) => format!("sqlite:{}", path.display()),
            SqliteTarget::Memory(_) => "sqlite::memory:".to_string(),
        }
    }
}

impl Drop for SqliteConnectionFactory {
    fn drop(&mut self) {
        if self.keeper.is_some() {
            debug!(target = %self.describe(), "releasing in-memory database");
        }
    }
}

fn parse_url(url: &str) -> Result<SqliteTarget, StoreError> {
    let trimmed = url.trim();
    let rest = trimmed.strip_prefix("jdbc:").unwrap_or(trimmed);
    let path = if let Some(p) = rest.strip_prefix("sqlite:") {
        p.strip_prefix("//").unwrap_or(p)
    } else if rest.contains("://") || rest.starts_with("jdbc:") {
        return Err(StoreError::Configuration(format!(
            "unsupported backend url '{url}' (expected a sqlite url or path)"
        )));
    } else {
        rest
    };
    if path.is_empty() {
        return Err(StoreError::Configuration(format!(
            "backend url '{url}' has no database path"
        )));
    }
    if path == ":memory:" {
        Ok(SqliteTarget::Memory(String::new()))
    } else {
        Ok(SqliteTarget::File(PathBuf::from(path)))
    }
}

fn open(target: &SqliteTarget, busy_timeout: Duration) -> BackendResult<rusqlite::Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = match target {
        SqliteTarget::File(path) => rusqlite::Connection::open_with_flags(path, flags),
        SqliteTarget::Memory(uri) => {
            rusqlite::Connection::open_with_flags(uri, flags | OpenFlags::SQLITE_OPEN_URI)
        }
    }
    .map_err(|e| BackendError::fatal(format!("cannot open database: {e}")))?;

    conn.busy_timeout(busy_timeout).map_err(classify)?;
    if matches!(target, SqliteTarget::File(_)) {
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(classify)?;
    }
    Ok(conn)
}

/// Classifies a `rusqlite` error.
#[must_use]
pub fn classify(err: rusqlite::Error) -> BackendError {
    let kind = match &err {
        rusqlite::Error::SqliteFailure(e, _) => match e.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::OperationInterrupted => {
                BackendErrorKind::Transient
            }
            ErrorCode::ConstraintViolation => BackendErrorKind::Constraint,
            ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::PermissionDenied
            | ErrorCode::AuthorizationForStatementDenied
            | ErrorCode::ReadOnly
            | ErrorCode::SystemIoFailure
            | ErrorCode::DiskFull
            | ErrorCode::SchemaChanged => BackendErrorKind::Fatal,
            _ => BackendErrorKind::Query,
        },
        _ => BackendErrorKind::Query,
    };
    BackendError::new(kind, err.to_string())
}

fn to_value(v: &SqlValue) -> Value {
    match v {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(*i),
        SqlValue::Real(f) => Value::Real(*f),
        SqlValue::Text(s) => Value::Text(s.clone()),
    }
}

fn from_value_ref(v: ValueRef<'_>) -> BackendResult<SqlValue> {
    match v {
        ValueRef::Null => Ok(SqlValue::Null),
        ValueRef::Integer(i) => Ok(SqlValue::Integer(i)),
        ValueRef::Real(f) => Ok(SqlValue::Real(f)),
        ValueRef::Text(t) => Ok(SqlValue::Text(String::from_utf8_lossy(t).into_owned())),
        ValueRef::Blob(_) => Err(BackendError::query("unexpected BLOB value")),
    }
}

/// A pooled `SQLite` session.
#[derive(Debug)]
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl Connection for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> BackendResult<usize> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(classify)?;
        stmt.execute(params_from_iter(params.iter().map(to_value)))
            .map_err(classify)
    }

    fn query_page(&mut self, sql: &str, params: &[SqlValue]) -> BackendResult<Vec<Vec<SqlValue>>> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(classify)?;
        let width = stmt.column_count();
        let mut rows = stmt
            .query(params_from_iter(params.iter().map(to_value)))
            .map_err(classify)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(classify)? {
            let mut cells = Vec::with_capacity(width);
            for i in 0..width {
                cells.push(from_value_ref(row.get_ref(i).map_err(classify)?)?);
            }
            out.push(cells);
        }
        Ok(out)
    }

    fn query_exists(&mut self, sql: &str, params: &[SqlValue]) -> BackendResult<bool> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(classify)?;
        let found: i64 = stmt
            .query_row(params_from_iter(params.iter().map(to_value)), |row| row.get(0))
            .map_err(classify)?;
        Ok(found != 0)
    }

    fn begin(&mut self, mode: TransactionMode) -> BackendResult<()> {
        let sql = match mode {
            TransactionMode::Deferred => "BEGIN DEFERRED",
            TransactionMode::Immediate => "BEGIN IMMEDIATE",
        };
        self.conn.execute_batch(sql).map_err(classify)
    }

    fn commit(&mut self) -> BackendResult<()> {
        self.conn.execute_batch("COMMIT").map_err(classify)
    }

    fn rollback(&mut self) -> BackendResult<()> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK").map_err(classify)
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn table_columns(&mut self, table: &str) -> BackendResult<Option<Vec<ColumnInfo>>> {
        let sql = format!("PRAGMA table_info({})", quote_ident(table));
        let mut stmt = self.conn.prepare(&sql).map_err(classify)?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    declared_type: row.get(2)?,
                    primary_key: row.get::<_, i64>(5)? > 0,
                })
            })
            .map_err(classify)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify)?;
        Ok(if columns.is_empty() { None } else { Some(columns) })
    }

    fn is_valid(&mut self) -> bool {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    fn row_locator(&mut self, table: &str) -> BackendResult<Option<String>> {
        // WITHOUT ROWID tables have no rowid column
        let sql = format!("SELECT rowid FROM {} LIMIT 0", quote_ident(table));
        match self.conn.prepare(&sql) {
            Ok(_) => Ok(Some("rowid".to_string())),
            Err(e) if e.to_string().contains("no such column") => Ok(None),
            Err(e) => Err(classify(e)),
        }
    }
}
