//! Relational table adapter.
//!
//! [`RdbmsTable`] presents one relational table as an engine table. It
//! owns its connection pool, compiled-condition cache and metrics; nothing
//! is shared between adapters.
//!
//! ## Lifecycle
//!
//! ```text
//! Declared ──ensure_ready──▶ SchemaValidated ──▶ Ready ──close──▶ Closed
//! ```
//!
//! Data operations are only accepted in `Ready`. Each operation leases a
//! connection, runs (inside a transaction when it issues more than one
//! statement) and returns the lease. Transient failures are retried on a
//! fresh lease with exponential backoff.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use strata_core::{
    AttributeValue, ConditionExpr, RowIter, StreamDefinition, StreamEvent, Table, TableCondition,
    TableDefinition,
};
use tracing::{debug, info, warn};

use crate::compiler::{self, CompiledCondition};
use crate::config::{RdbmsStoreConfig, StoreConfig};
use crate::connection::{ConnectionFactory, TransactionMode};
use crate::cursor::RowCursor;
use crate::ddl::{self, DdlOutcome};
use crate::error::{BackendError, StoreError};
use crate::metrics::{MetricsSnapshot, RdbmsTableMetrics};
use crate::pool::{ConnectionPool, PoolConfig, PooledConnection};
use crate::retry::{with_retry, RetryPolicy};
use crate::schema::{derive_schema, to_cell, to_row, RelationalSchema};
use crate::sqlite::SqliteConnectionFactory;
use crate::types::SqlValue;

/// Adapter lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    /// Schema derived, backend not yet checked.
    Declared,
    /// Physical table validated or created.
    SchemaValidated,
    /// Accepting operations.
    Ready,
    /// Pool closed; every operation fails.
    Closed,
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declared => write!(f, "declared"),
            Self::SchemaValidated => write!(f, "schema-validated"),
            Self::Ready => write!(f, "ready"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Result of [`RdbmsTable::update_or_insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Matching rows existed and were updated.
    Updated(usize),
    /// No row matched; the new row was inserted.
    Inserted,
}

/// An engine table stored in a relational database.
pub struct RdbmsTable {
    definition: TableDefinition,
    schema: Arc<RelationalSchema>,
    config: RdbmsStoreConfig,
    pool: ConnectionPool,
    retry: RetryPolicy,
    state: RwLock<TableState>,
    row_locator: RwLock<Option<String>>,
    conditions: RwLock<HashMap<String, Arc<CompiledCondition>>>,
    metrics: Arc<RdbmsTableMetrics>,
}

impl fmt::Debug for RdbmsTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdbmsTable")
            .field("table", &self.schema.table_name())
            .field("state", &*self.state.read())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl RdbmsTable {
    /// Declares an adapter from raw store options.
    ///
    /// The backend is chosen from `jdbc.url`; only SQLite URLs are
    /// recognized. No connection is opened until [`ensure_ready`](Self::ensure_ready).
    ///
    /// # Errors
    ///
    /// Returns configuration errors from [`RdbmsStoreConfig::from_config`],
    /// `StoreError::Configuration` for an unsupported URL, or
    /// `StoreError::Schema` if the definition cannot be mapped.
    pub fn new(definition: TableDefinition, options: &StoreConfig) -> Result<Self, StoreError> {
        let config = RdbmsStoreConfig::from_config(options)?;
        let factory = SqliteConnectionFactory::from_url(&config.url, config.query_timeout)?;
        Self::with_factory(definition, config, Arc::new(factory))
    }

    /// Declares an adapter over an explicit connection factory.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Configuration` on invalid config or
    /// `StoreError::Schema` if the definition cannot be mapped.
    pub fn with_factory(
        definition: TableDefinition,
        config: RdbmsStoreConfig,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<Self, StoreError> {
        config.validate()?;
        let definition = definition.with_field_lengths(&config.field_lengths);
        let mut schema = derive_schema(&definition, config.default_string_length)?;
        if let Some(name) = &config.table_name {
            schema = schema.with_table_name(name.clone());
        }
        let pool = ConnectionPool::new(
            factory,
            PoolConfig {
                max_size: config.pool_size,
                idle_timeout: config.idle_timeout,
                acquire_timeout: config.acquire_timeout,
            },
        );
        debug!(
            table = %definition.name(),
            physical = %schema.table_name(),
            pool = ?pool,
            "declared relational table"
        );
        Ok(Self {
            retry: config.retry_policy(),
            definition,
            schema: Arc::new(schema),
            config,
            pool,
            state: RwLock::new(TableState::Declared),
            row_locator: RwLock::new(None),
            conditions: RwLock::new(HashMap::new()),
            metrics: Arc::new(RdbmsTableMetrics::new()),
        })
    }

    /// Validates or creates the physical table and moves to `Ready`.
    ///
    /// Idempotent once `Ready`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::SchemaValidation` if the table is missing and
    /// `create_if_missing` is false or an existing table is incompatible,
    /// `StoreError::Closed` after [`close`](Self::close), or the backend
    /// failure that prevented the check.
    pub fn ensure_ready(&self, create_if_missing: bool) -> Result<(), StoreError> {
        let mut state = self.state.write();
        match *state {
            TableState::Ready => return Ok(()),
            TableState::Closed => return Err(self.closed()),
            TableState::Declared | TableState::SchemaValidated => {}
        }

        let outcome = with_retry(&self.retry, "ensure_ready", |_| {
            let mut lease = self.pool.acquire()?;
            let outcome = ddl::validate_or_create(&mut *lease, &self.schema, create_if_missing)
                .inspect_err(|e| {
                    if matches!(e, StoreError::Fatal(_)) {
                        lease.mark_broken();
                    }
                })?;
            let locator = lease
                .row_locator(self.schema.table_name())
                .map_err(|e| self.backend(&mut lease, None, e))?;
            Ok((outcome, locator))
        });
        let (outcome, locator) = match outcome {
            Ok(v) => v,
            Err(e) => {
                self.metrics.record_error();
                return Err(e);
            }
        };
        *state = TableState::SchemaValidated;
        debug!(table = %self.schema.table_name(), ?outcome, "schema validated");

        if locator.is_none() {
            warn!(
                table = %self.schema.table_name(),
                "table has no row locator, cursors page by offset"
            );
        }
        *self.row_locator.write() = locator;
        *state = TableState::Ready;
        info!(
            table = %self.schema.table_name(),
            created = outcome == DdlOutcome::Created,
            primary_key = ?self.schema.primary_key(),
            "table ready"
        );
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TableState {
        *self.state.read()
    }

    /// Closes the pool. Cursors still open keep their connection until dropped.
    pub fn close(&self) {
        let mut state = self.state.write();
        if *state == TableState::Closed {
            return;
        }
        *state = TableState::Closed;
        self.pool.close();
        self.conditions.write().clear();
        info!(table = %self.schema.table_name(), "table closed");
    }

    /// Operation counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The connection pool, for observability.
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// The mapped relational schema.
    #[must_use]
    pub fn schema(&self) -> &RelationalSchema {
        &self.schema
    }

    /// The typed store configuration.
    #[must_use]
    pub fn config(&self) -> &RdbmsStoreConfig {
        &self.config
    }

    /// Compiles `condition` against this table, caching the result.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnsupportedCondition` if the condition cannot
    /// be expressed in SQL.
    pub fn compile_condition(
        &self,
        streams: &[StreamDefinition],
        condition: Option<&ConditionExpr>,
    ) -> Result<Arc<CompiledCondition>, StoreError> {
        let key = format!("{streams:?}|{condition:?}");
        if let Some(hit) = self.conditions.read().get(&key) {
            self.metrics.record_cache_hit();
            return Ok(Arc::clone(hit));
        }
        let compiled = Arc::new(compiler::compile(&self.definition, streams, condition)?);
        debug!(
            table = %self.schema.table_name(),
            predicate = %compiled.sql(),
            params = compiled.params().len(),
            "compiled condition"
        );
        self.conditions
            .write()
            .entry(key)
            .or_insert_with(|| Arc::clone(&compiled));
        Ok(compiled)
    }

    fn closed(&self) -> StoreError {
        StoreError::Closed(self.schema.table_name().to_string())
    }

    fn check_ready(&self) -> Result<(), StoreError> {
        match *self.state.read() {
            TableState::Ready => Ok(()),
            TableState::Closed => Err(self.closed()),
            other => Err(StoreError::NotInitialized {
                table: self.schema.table_name().to_string(),
                state: other.to_string(),
            }),
        }
    }

    fn backend(&self, lease: &mut PooledConnection, row: Option<usize>, err: BackendError) -> StoreError {
        let err = lease.check(err);
        StoreError::from_backend(self.schema.table_name(), row, err)
    }

    /// Runs `op` with retry, counting retries and failures.
    fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut(&mut PooledConnection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let result = with_retry(&self.retry, what, |attempt| {
            if attempt > 1 {
                self.metrics.record_retry();
            }
            let mut lease = self.pool.acquire()?;
            op(&mut lease)
        });
        if let Err(e) = &result {
            self.metrics.record_error();
            debug!(table = %self.schema.table_name(), operation = what, error = %e, "operation failed");
        }
        result
    }

    /// Inserts one row. A primary-key conflict is an error, never an update.
    ///
    /// # Errors
    ///
    /// `StoreError::Schema` if the row does not conform,
    /// `StoreError::ConstraintViolation` on a key conflict, or a backend error.
    pub fn insert(&self, row: &[AttributeValue]) -> Result<(), StoreError> {
        self.check_ready()?;
        let cells = to_row(&self.schema, row)?;
        let sql = self.schema.insert_sql();
        self.run("insert", |lease| {
            lease
                .execute(&sql, &cells)
                .map_err(|e| self.backend(lease, None, e))
        })?;
        self.metrics.record_insert(1);
        Ok(())
    }

    /// Inserts `rows` in one transaction. Either every row is stored or none is.
    ///
    /// # Errors
    ///
    /// `StoreError::ConstraintViolation` naming the offending row, or
    /// `StoreError::Batch` wrapping the failure of row `n`.
    pub fn insert_batch(&self, rows: &[Vec<AttributeValue>]) -> Result<usize, StoreError> {
        self.check_ready()?;
        if rows.is_empty() {
            return Ok(0);
        }
        let table = self.schema.table_name();
        let cells = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                to_row(&self.schema, row).map_err(|e| StoreError::Batch {
                    table: table.to_string(),
                    row: i,
                    source: Box::new(e),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let sql = self.schema.insert_sql();

        self.run("insert_batch", |lease| {
            lease
                .begin(TransactionMode::Immediate)
                .map_err(|e| self.backend(lease, None, e))?;
            for (i, row) in cells.iter().enumerate() {
                if let Err(e) = lease.execute(&sql, row) {
                    let err = self.backend(lease, Some(i), e);
                    if !lease.is_broken() {
                        if let Err(e) = lease.rollback() {
                            lease.check(e);
                        }
                    }
                    return Err(match err {
                        e @ StoreError::ConstraintViolation { .. } => e,
                        other => StoreError::Batch {
                            table: table.to_string(),
                            row: i,
                            source: Box::new(other),
                        },
                    });
                }
            }
            lease.commit().map_err(|e| self.backend(lease, None, e))
        })?;
        self.metrics.record_insert(rows.len() as u64);
        debug!(table = %table, rows = rows.len(), "batch inserted");
        Ok(rows.len())
    }

    /// Opens a lazy cursor over rows matching `condition`.
    ///
    /// `values` are the stream values the condition was bound with.
    ///
    /// # Errors
    ///
    /// `StoreError::BindArity` if `values` does not match the condition,
    /// or the backend error that prevented the first page.
    pub fn find(
        &self,
        condition: &CompiledCondition,
        values: &[AttributeValue],
    ) -> Result<RowCursor, StoreError> {
        self.check_ready()?;
        let params = condition.resolve(values)?;
        self.metrics.record_find();
        let locator = self.row_locator.read().clone();
        let result = with_retry(&self.retry, "find", |attempt| {
            if attempt > 1 {
                self.metrics.record_retry();
            }
            RowCursor::open(
                &self.pool,
                Arc::clone(&self.schema),
                Arc::clone(&self.metrics),
                condition.sql(),
                params.clone(),
                locator.as_deref(),
                self.config.cursor_page_size,
            )
        });
        if result.is_err() {
            self.metrics.record_error();
        }
        result
    }

    /// Returns `true` if any row matches `condition`.
    ///
    /// # Errors
    ///
    /// Same as [`find`](Self::find).
    pub fn contains(
        &self,
        condition: &CompiledCondition,
        values: &[AttributeValue],
    ) -> Result<bool, StoreError> {
        self.check_ready()?;
        let params = condition.resolve(values)?;
        let sql = self.schema.exists_sql(condition.sql());
        self.metrics.record_contains();
        self.run("contains", |lease| {
            lease
                .query_exists(&sql, &params)
                .map_err(|e| self.backend(lease, None, e))
        })
    }

    /// Deletes rows matching `condition`. Matching nothing is not an error.
    ///
    /// # Errors
    ///
    /// `StoreError::BindArity` or a backend error.
    pub fn delete(
        &self,
        condition: &CompiledCondition,
        values: &[AttributeValue],
    ) -> Result<usize, StoreError> {
        self.check_ready()?;
        let params = condition.resolve(values)?;
        let sql = self.schema.delete_sql(condition.sql());
        let deleted = self.run("delete", |lease| {
            lease
                .execute(&sql, &params)
                .map_err(|e| self.backend(lease, None, e))
        })?;
        self.metrics.record_delete(deleted as u64);
        Ok(deleted)
    }

    /// Sets the non-key columns of rows matching `condition` from `row`.
    ///
    /// `row` is a full attribute-ordered row; its key values are ignored.
    ///
    /// # Errors
    ///
    /// `StoreError::Schema` if `row` does not conform, `StoreError::BindArity`,
    /// or a backend error.
    pub fn update(
        &self,
        condition: &CompiledCondition,
        values: &[AttributeValue],
        row: &[AttributeValue],
    ) -> Result<usize, StoreError> {
        self.check_ready()?;
        let (sql, params) = self.update_statement(condition, values, row)?;
        let Some(sql) = sql else {
            return Ok(0);
        };
        let updated = self.run("update", |lease| {
            lease
                .execute(&sql, &params)
                .map_err(|e| self.backend(lease, None, e))
        })?;
        self.metrics.record_update(updated as u64);
        Ok(updated)
    }

    /// Applies explicit column assignments to rows matching `condition`.
    ///
    /// Unlike [`update`](Self::update) this may change key columns.
    ///
    /// # Errors
    ///
    /// `StoreError::Schema` for unknown columns or mistyped values,
    /// `StoreError::ConstraintViolation` if a key update collides.
    pub fn update_set(
        &self,
        condition: &CompiledCondition,
        values: &[AttributeValue],
        assignments: &[(&str, AttributeValue)],
    ) -> Result<usize, StoreError> {
        self.check_ready()?;
        if assignments.is_empty() {
            return Ok(0);
        }
        let mut params = Vec::with_capacity(assignments.len() + condition.params().len());
        for (name, value) in assignments {
            let col = self.schema.column(name).ok_or_else(|| {
                StoreError::Schema(format!(
                    "table '{}' has no column '{name}'",
                    self.definition.name()
                ))
            })?;
            params.push(to_cell(col, value)?);
        }
        params.extend(condition.resolve(values)?);
        let sql = self
            .schema
            .update_sql(assignments.iter().map(|(n, _)| *n), condition.sql());
        let updated = self.run("update_set", |lease| {
            lease
                .execute(&sql, &params)
                .map_err(|e| self.backend(lease, None, e))
        })?;
        self.metrics.record_update(updated as u64);
        Ok(updated)
    }

    /// Updates rows matching `condition`, or inserts `row` if none match.
    ///
    /// Runs in one write-locking transaction, so concurrent callers with
    /// the same key never both insert. The insert is a plain `INSERT`: a
    /// row whose key exists but which `condition` did not match is left
    /// alone and the call fails with `StoreError::ConstraintViolation`.
    ///
    /// # Errors
    ///
    /// `StoreError::Schema` if `row` does not conform,
    /// `StoreError::ConstraintViolation` if the insert collides with an
    /// unmatched row, or a backend error.
    pub fn update_or_insert(
        &self,
        condition: &CompiledCondition,
        values: &[AttributeValue],
        row: &[AttributeValue],
    ) -> Result<UpsertOutcome, StoreError> {
        self.check_ready()?;
        let cells = to_row(&self.schema, row)?;
        let (update_sql, update_params) = self.update_statement(condition, values, row)?;
        let exists_sql = self.schema.exists_sql(condition.sql());
        let match_params = condition.resolve(values)?;
        let insert_sql = self.schema.insert_sql();

        let outcome = self.run("update_or_insert", |lease| {
            lease
                .begin(TransactionMode::Immediate)
                .map_err(|e| self.backend(lease, None, e))?;
            let updated = match &update_sql {
                Some(sql) => lease
                    .execute(sql, &update_params)
                    .map_err(|e| self.backend(lease, None, e))?,
                None => usize::from(
                    lease
                        .query_exists(&exists_sql, &match_params)
                        .map_err(|e| self.backend(lease, None, e))?,
                ),
            };
            let outcome = if updated > 0 {
                UpsertOutcome::Updated(updated)
            } else {
                lease
                    .execute(&insert_sql, &cells)
                    .map_err(|e| self.backend(lease, None, e))?;
                UpsertOutcome::Inserted
            };
            lease
                .commit()
                .map_err(|e| self.backend(lease, None, e))?;
            Ok(outcome)
        })?;

        match outcome {
            UpsertOutcome::Updated(n) => self.metrics.record_update(n as u64),
            UpsertOutcome::Inserted => {
                self.metrics.record_insert(1);
                self.metrics.record_upsert_insert();
            }
        }
        Ok(outcome)
    }

    /// `UPDATE` of the non-key columns from `row`, or `None` for key-only tables.
    fn update_statement(
        &self,
        condition: &CompiledCondition,
        values: &[AttributeValue],
        row: &[AttributeValue],
    ) -> Result<(Option<String>, Vec<SqlValue>), StoreError> {
        let cells = to_row(&self.schema, row)?;
        let columns: Vec<(usize, &str)> = self
            .schema
            .non_key_columns()
            .map(|(i, c)| (i, c.name.as_str()))
            .collect();
        if columns.is_empty() {
            return Ok((None, Vec::new()));
        }
        let mut params: Vec<SqlValue> = columns.iter().map(|(i, _)| cells[*i].clone()).collect();
        params.extend(condition.resolve(values)?);
        let sql = self
            .schema
            .update_sql(columns.iter().map(|(_, n)| *n), condition.sql());
        Ok((Some(sql), params))
    }

    fn downcast<'c>(&self, condition: &'c dyn TableCondition) -> strata_core::Result<&'c CompiledCondition> {
        condition
            .as_any()
            .downcast_ref::<CompiledCondition>()
            .ok_or_else(|| {
                strata_core::Error::table(
                    self.definition.name(),
                    StoreError::UnsupportedCondition(format!(
                        "condition was not compiled by a relational table: {condition:?}"
                    )),
                )
            })
    }

    fn core_error(&self, err: StoreError) -> strata_core::Error {
        strata_core::Error::table(self.definition.name(), err)
    }
}

impl Drop for RdbmsTable {
    fn drop(&mut self) {
        if *self.state.get_mut() != TableState::Closed {
            self.pool.close();
        }
    }
}

impl Table for RdbmsTable {
    fn definition(&self) -> &TableDefinition {
        &self.definition
    }

    fn compile_condition(
        &self,
        streams: &[StreamDefinition],
        condition: Option<&ConditionExpr>,
    ) -> strata_core::Result<Arc<dyn TableCondition>> {
        let compiled: Arc<dyn TableCondition> = Self::compile_condition(self, streams, condition)
            .map_err(|e| self.core_error(e))?;
        Ok(compiled)
    }

    fn add(&self, rows: &[Vec<AttributeValue>]) -> strata_core::Result<()> {
        let result = match rows {
            [row] => self.insert(row),
            _ => self.insert_batch(rows).map(|_| ()),
        };
        result.map_err(|e| self.core_error(e))
    }

    fn find<'a>(
        &'a self,
        condition: &dyn TableCondition,
        events: &[&StreamEvent],
    ) -> strata_core::Result<RowIter<'a>> {
        let compiled = self.downcast(condition)?;
        let values = compiled.bind(events).map_err(|e| self.core_error(e))?;
        let cursor = Self::find(self, compiled, &values).map_err(|e| self.core_error(e))?;
        let name = self.definition.name().to_string();
        Ok(Box::new(cursor.map(move |row| {
            row.map_err(|e| strata_core::Error::table(name.clone(), e))
        })))
    }

    fn contains(&self, condition: &dyn TableCondition, events: &[&StreamEvent]) -> strata_core::Result<bool> {
        let compiled = self.downcast(condition)?;
        let values = compiled.bind(events).map_err(|e| self.core_error(e))?;
        Self::contains(self, compiled, &values).map_err(|e| self.core_error(e))
    }
}
