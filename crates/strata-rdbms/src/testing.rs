//! Testing utilities for the table adapter.
//!
//! Provides the stock/stream definitions used throughout the test suites,
//! a store config pointing at a temporary database, and a connection
//! factory wrapper that injects backend failures on demand.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use strata_core::{AttributeType, StreamDefinition, TableDefinition};

use crate::config::StoreConfig;
use crate::connection::{ColumnInfo, Connection, ConnectionFactory, TransactionMode};
use crate::error::{BackendError, BackendErrorKind, BackendResult};
use crate::types::SqlValue;

/// `StockTable (symbol string, price float, volume long)`.
#[must_use]
pub fn stock_table() -> TableDefinition {
    TableDefinition::new("StockTable")
        .attribute("symbol", AttributeType::String)
        .attribute("price", AttributeType::Float)
        .attribute("volume", AttributeType::Long)
}

/// `FooStream (name string, volume long)`.
#[must_use]
pub fn foo_stream() -> StreamDefinition {
    StreamDefinition::new("FooStream")
        .attribute("name", AttributeType::String)
        .attribute("volume", AttributeType::Long)
}

/// A store config backed by `name` inside `dir`.
#[must_use]
pub fn sqlite_store_config(dir: &Path, name: &str) -> StoreConfig {
    StoreConfig::new("rdbms")
        .option("jdbc.url", format!("sqlite:{}", dir.join(name).display()))
        .option("retry.backoff.ms", "1")
}

#[derive(Debug, Default)]
struct Faults {
    failing_connects: AtomicU64,
    statement_faults: Mutex<VecDeque<BackendErrorKind>>,
    connects: AtomicU64,
    statements: AtomicU64,
}

impl Faults {
    fn next_statement_fault(&self) -> BackendResult<()> {
        self.statements.fetch_add(1, Ordering::Relaxed);
        match self.statement_faults.lock().pop_front() {
            Some(kind) => Err(BackendError::new(kind, format!("injected {kind} failure"))),
            None => Ok(()),
        }
    }
}

/// Wraps a factory and fails connects or statements on request.
#[derive(Debug)]
pub struct FaultInjectingFactory {
    inner: Arc<dyn ConnectionFactory>,
    faults: Arc<Faults>,
}

impl FaultInjectingFactory {
    /// Wraps `inner` with no faults scheduled.
    #[must_use]
    pub fn new(inner: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Makes the next `n` connects fail with a fatal error.
    pub fn fail_next_connects(&self, n: u64) {
        self.faults.failing_connects.store(n, Ordering::Relaxed);
    }

    /// Makes the next `n` statements, on any connection, fail with `kind`.
    pub fn fail_next_statements(&self, kind: BackendErrorKind, n: usize) {
        let mut queue = self.faults.statement_faults.lock();
        queue.extend(std::iter::repeat(kind).take(n));
    }

    /// Connections opened so far (including failed attempts).
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.faults.connects.load(Ordering::Relaxed)
    }

    /// Statements issued so far (including failed ones).
    #[must_use]
    pub fn statements(&self) -> u64 {
        self.faults.statements.load(Ordering::Relaxed)
    }
}

impl ConnectionFactory for FaultInjectingFactory {
    fn connect(&self) -> BackendResult<Box<dyn Connection>> {
        self.faults.connects.fetch_add(1, Ordering::Relaxed);
        let failing = self
            .faults
            .failing_connects
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(BackendError::fatal("injected connect failure"));
        }
        let inner = self.inner.connect()?;
        Ok(Box::new(FaultInjectingConnection {
            inner,
            faults: Arc::clone(&self.faults),
        }))
    }

    fn describe(&self) -> String {
        format!("faulty({})", self.inner.describe())
    }
}

struct FaultInjectingConnection {
    inner: Box<dyn Connection>,
    faults: Arc<Faults>,
}

impl Connection for FaultInjectingConnection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> BackendResult<usize> {
        self.faults.next_statement_fault()?;
        self.inner.execute(sql, params)
    }

    fn query_page(&mut self, sql: &str, params: &[SqlValue]) -> BackendResult<Vec<Vec<SqlValue>>> {
        self.faults.next_statement_fault()?;
        self.inner.query_page(sql, params)
    }

    fn query_exists(&mut self, sql: &str, params: &[SqlValue]) -> BackendResult<bool> {
        self.faults.next_statement_fault()?;
        self.inner.query_exists(sql, params)
    }

    fn begin(&mut self, mode: TransactionMode) -> BackendResult<()> {
        self.faults.next_statement_fault()?;
        self.inner.begin(mode)
    }

    fn commit(&mut self) -> BackendResult<()> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> BackendResult<()> {
        self.inner.rollback()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    fn table_columns(&mut self, table: &str) -> BackendResult<Option<Vec<ColumnInfo>>> {
        self.inner.table_columns(table)
    }

    fn is_valid(&mut self) -> bool {
        self.inner.is_valid()
    }

    fn row_locator(&mut self, table: &str) -> BackendResult<Option<String>> {
        self.inner.row_locator(table)
    }
}
