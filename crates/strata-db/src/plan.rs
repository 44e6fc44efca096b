//! A built execution plan.
//!
//! The plan owns one [`RdbmsTable`] per declared table and one
//! [`WindowedTableJoin`] per join. Events are pushed in synchronously with
//! [`ExecutionPlan::send`]; each join fed by the stream processes the
//! event and its output is returned in join declaration order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use strata_core::join::{JoinOutput, WindowedTableJoin};
use strata_core::{StreamDefinition, StreamEvent};
use strata_rdbms::RdbmsTable;
use tracing::{debug, info};

use crate::error::PlanError;

/// Streams, tables and joins wired together and ready for events.
#[derive(Debug)]
pub struct ExecutionPlan {
    streams: HashMap<String, StreamDefinition>,
    tables: HashMap<String, Arc<RdbmsTable>>,
    inserts: HashMap<String, Vec<String>>,
    joins: Vec<Mutex<WindowedTableJoin>>,
    shut_down: AtomicBool,
}

impl ExecutionPlan {
    pub(crate) fn new(
        streams: HashMap<String, StreamDefinition>,
        tables: HashMap<String, Arc<RdbmsTable>>,
        inserts: Vec<(String, String)>,
        joins: Vec<Mutex<WindowedTableJoin>>,
    ) -> Self {
        let mut routes: HashMap<String, Vec<String>> = HashMap::new();
        for (stream, table) in inserts {
            routes.entry(stream).or_default().push(table);
        }
        Self {
            streams,
            tables,
            inserts: routes,
            joins,
            shut_down: AtomicBool::new(false),
        }
    }

    /// The adapter backing `name`.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Arc<RdbmsTable>> {
        self.tables.get(name)
    }

    /// The declared stream `id`.
    #[must_use]
    pub fn stream(&self, id: &str) -> Option<&StreamDefinition> {
        self.streams.get(id)
    }

    /// Number of joins in the plan.
    #[must_use]
    pub fn join_count(&self) -> usize {
        self.joins.len()
    }

    fn check_running(&self) -> Result<(), PlanError> {
        if self.shut_down.load(Ordering::Acquire) {
            Err(PlanError::Shutdown)
        } else {
            Ok(())
        }
    }

    /// Inserts the event's data as one row of `table`.
    ///
    /// # Errors
    ///
    /// `PlanError::TableNotFound`, `PlanError::Shutdown`, or the store error.
    pub fn insert_into(&self, table: &str, event: &StreamEvent) -> Result<(), PlanError> {
        self.check_running()?;
        let target = self
            .tables
            .get(table)
            .ok_or_else(|| PlanError::TableNotFound(table.to_string()))?;
        target.insert(&event.data)?;
        Ok(())
    }

    /// Pushes `event` into `stream`.
    ///
    /// Insert routes from the stream run first, then every join the stream
    /// feeds. Returns one [`JoinOutput`] per join, in declaration order.
    ///
    /// # Errors
    ///
    /// `PlanError::StreamNotFound` for an undeclared stream,
    /// `PlanError::Core` if the event belongs to another stream or a
    /// lookup fails, or the store error of a failed insert.
    pub fn send(&self, stream: &str, event: StreamEvent) -> Result<Vec<JoinOutput>, PlanError> {
        self.check_running()?;
        if !self.streams.contains_key(stream) {
            return Err(PlanError::StreamNotFound(stream.to_string()));
        }
        if event.stream_id != stream {
            return Err(strata_core::Error::StreamMismatch {
                expected: stream.to_string(),
                actual: event.stream_id,
            }
            .into());
        }

        if let Some(tables) = self.inserts.get(stream) {
            for table in tables {
                self.insert_into(table, &event)?;
            }
        }

        let mut outputs = Vec::new();
        for join in &self.joins {
            let mut join = join.lock();
            if join.stream_id() == stream {
                outputs.push(join.process(event.clone())?);
            }
        }
        debug!(stream = %stream, joins = outputs.len(), "event processed");
        Ok(outputs)
    }

    /// Closes every table. Further events are rejected.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for table in self.tables.values() {
            table.close();
        }
        info!(tables = self.tables.len(), "execution plan shut down");
    }

    /// Returns `true` after [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}
