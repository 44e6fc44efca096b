//! Backend connection abstraction.
//!
//! The adapter never talks to a driver directly. A [`ConnectionFactory`]
//! opens [`Connection`]s; the pool leases them out one operation at a time.

use std::fmt::Debug;

use crate::error::BackendResult;
use crate::types::SqlValue;

/// Locking behaviour of an explicit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Takes locks lazily; used for read snapshots.
    Deferred,
    /// Takes the write lock up front, serializing writers.
    Immediate,
}

/// A column of an existing table, as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared type name.
    pub declared_type: String,
    /// Part of the table's primary key.
    pub primary_key: bool,
}

/// A single backend session.
///
/// Statements use `?` placeholders bound positionally from `params`.
pub trait Connection: Send {
    /// Executes a statement, returning the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns a classified [`BackendError`](crate::error::BackendError).
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> BackendResult<usize>;

    /// Runs a query and returns every row it produces.
    ///
    /// Callers bound the result with `LIMIT`.
    ///
    /// # Errors
    ///
    /// Returns a classified backend error.
    fn query_page(&mut self, sql: &str, params: &[SqlValue]) -> BackendResult<Vec<Vec<SqlValue>>>;

    /// Runs a single-value boolean query such as `SELECT EXISTS (...)`.
    ///
    /// # Errors
    ///
    /// Returns a classified backend error.
    fn query_exists(&mut self, sql: &str, params: &[SqlValue]) -> BackendResult<bool>;

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Returns a classified backend error.
    fn begin(&mut self, mode: TransactionMode) -> BackendResult<()>;

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// Returns a classified backend error.
    fn commit(&mut self) -> BackendResult<()>;

    /// Rolls back the open transaction.
    ///
    /// # Errors
    ///
    /// Returns a classified backend error.
    fn rollback(&mut self) -> BackendResult<()>;

    /// Returns `true` while a transaction is open.
    fn in_transaction(&self) -> bool;

    /// Columns of `table`, or `None` if the table does not exist.
    ///
    /// # Errors
    ///
    /// Returns a classified backend error.
    fn table_columns(&mut self, table: &str) -> BackendResult<Option<Vec<ColumnInfo>>>;

    /// Cheap liveness check used before handing out an idle connection.
    fn is_valid(&mut self) -> bool;

    /// A stable, ordered per-row locator column of `table` (e.g. `rowid`),
    /// or `None` if rows of that table have none.
    ///
    /// # Errors
    ///
    /// Returns a classified backend error if the table cannot be inspected.
    fn row_locator(&mut self, table: &str) -> BackendResult<Option<String>>;
}

/// Opens backend connections.
pub trait ConnectionFactory: Debug + Send + Sync {
    /// Opens a new connection.
    ///
    /// # Errors
    ///
    /// Returns a fatal backend error if the backend cannot be reached or
    /// rejects the credentials.
    fn connect(&self) -> BackendResult<Box<dyn Connection>>;

    /// Short description for logs, without credentials.
    fn describe(&self) -> String;
}
