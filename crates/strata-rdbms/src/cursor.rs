//! Lazy, paged row cursor.
//!
//! A [`RowCursor`] owns one pooled connection for its whole life and reads
//! inside a deferred transaction, so every page comes from the same
//! snapshot. Pages are fetched by row locator (`rowid > last`) when the
//! table has one, and by `LIMIT/OFFSET` otherwise. The lease goes back
//! to the pool once the rows are exhausted, on [`RowCursor::close`], on the
//! first error, or when the cursor is dropped.

use std::collections::VecDeque;
use std::sync::Arc;

use strata_core::AttributeValue;
use tracing::debug;

use crate::connection::TransactionMode;
use crate::error::{BackendError, StoreError};
use crate::metrics::RdbmsTableMetrics;
use crate::pool::{ConnectionPool, PooledConnection};
use crate::schema::{from_row, RelationalSchema};
use crate::types::SqlValue;

enum Paging {
    Keyset { last: i64 },
    Offset { offset: i64 },
}

/// Forward-only iterator over the rows matching a `find`.
///
/// Not restartable. Rows come back in attribute order.
pub struct RowCursor {
    lease: Option<PooledConnection>,
    schema: Arc<RelationalSchema>,
    metrics: Arc<RdbmsTableMetrics>,
    sql: String,
    params: Vec<SqlValue>,
    paging: Paging,
    page_size: usize,
    page: VecDeque<Vec<SqlValue>>,
    last_page: bool,
    rows_read: u64,
}

impl std::fmt::Debug for RowCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowCursor")
            .field("table", &self.schema.table_name())
            .field("open", &self.lease.is_some())
            .field("buffered", &self.page.len())
            .field("rows_read", &self.rows_read)
            .finish_non_exhaustive()
    }
}

fn page_limit(page_size: usize) -> SqlValue {
    SqlValue::Integer(i64::try_from(page_size).unwrap_or(i64::MAX))
}

impl RowCursor {
    /// Leases a connection, opens a read snapshot and fetches the first page.
    ///
    /// `predicate` and `params` come from a resolved compiled condition;
    /// `locator` is the table's row locator column, if it has one.
    pub(crate) fn open(
        pool: &ConnectionPool,
        schema: Arc<RelationalSchema>,
        metrics: Arc<RdbmsTableMetrics>,
        predicate: &str,
        params: Vec<SqlValue>,
        locator: Option<&str>,
        page_size: usize,
    ) -> Result<Self, StoreError> {
        let mut lease = pool.acquire()?;
        let paging = match locator {
            Some(_) => Paging::Keyset { last: i64::MIN },
            None => Paging::Offset { offset: 0 },
        };
        let sql = schema.select_sql(predicate, locator);
        if let Err(e) = lease.begin(TransactionMode::Deferred) {
            let e = lease.check(e);
            return Err(StoreError::from_backend(schema.table_name(), None, e));
        }
        let mut cursor = Self {
            lease: Some(lease),
            schema,
            metrics,
            sql,
            params,
            paging,
            page_size: page_size.max(1),
            page: VecDeque::new(),
            last_page: false,
            rows_read: 0,
        };
        cursor.fetch_page()?;
        Ok(cursor)
    }

    /// Rows handed out so far.
    #[must_use]
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Returns `true` while the cursor still holds its connection.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lease.is_some()
    }

    /// Releases the connection. Remaining rows are discarded.
    pub fn close(&mut self) {
        self.page.clear();
        self.last_page = true;
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut lease) = self.lease.take() {
            if lease.in_transaction() {
                if let Err(e) = lease.commit() {
                    lease.check(e);
                }
            }
            debug!(
                table = %self.schema.table_name(),
                rows = self.rows_read,
                "cursor released"
            );
        }
    }

    fn fail(&mut self, err: BackendError) -> StoreError {
        if let Some(lease) = self.lease.as_mut() {
            lease.check(err.clone());
        }
        self.page.clear();
        self.last_page = true;
        self.release();
        StoreError::from_backend(self.schema.table_name(), None, err)
    }

    fn fetch_page(&mut self) -> Result<(), StoreError> {
        let Some(lease) = self.lease.as_mut() else {
            self.last_page = true;
            return Ok(());
        };
        let mut params = self.params.clone();
        match self.paging {
            Paging::Keyset { last } => {
                params.push(SqlValue::Integer(last));
                params.push(page_limit(self.page_size));
            }
            Paging::Offset { offset } => {
                params.push(page_limit(self.page_size));
                params.push(SqlValue::Integer(offset));
            }
        }
        let rows = match lease.query_page(&self.sql, &params) {
            Ok(rows) => rows,
            Err(e) => return Err(self.fail(e)),
        };
        self.last_page = rows.len() < self.page_size;
        match &mut self.paging {
            Paging::Keyset { last } => {
                if let Some(SqlValue::Integer(loc)) = rows.last().and_then(|r| r.first()) {
                    *last = *loc;
                }
            }
            Paging::Offset { offset } => {
                *offset += i64::try_from(rows.len()).unwrap_or(i64::MAX);
            }
        }
        self.page.extend(rows);
        if self.page.is_empty() && self.last_page {
            self.release();
        }
        Ok(())
    }

    fn next_row(&mut self) -> Option<Result<Vec<AttributeValue>, StoreError>> {
        if self.page.is_empty() {
            if self.last_page {
                self.release();
                return None;
            }
            if let Err(e) = self.fetch_page() {
                return Some(Err(e));
            }
        }
        let mut cells = self.page.pop_front()?;
        if matches!(self.paging, Paging::Keyset { .. }) && !cells.is_empty() {
            cells.remove(0);
        }
        if self.page.is_empty() && self.last_page {
            self.release();
        }
        self.rows_read += 1;
        self.metrics.record_read(1);
        Some(from_row(&self.schema, cells))
    }
}

impl Iterator for RowCursor {
    type Item = Result<Vec<AttributeValue>, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row()
    }
}

impl Drop for RowCursor {
    fn drop(&mut self) {
        self.release();
    }
}
