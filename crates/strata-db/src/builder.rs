//! Fluent builder for execution plans.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strata_core::join::{OutputEventType, ProjectionItem, WindowedTableJoin};
use strata_core::window::{Window, WindowSpec};
use strata_core::{ConditionExpr, StreamDefinition, Table, TableCondition, TableDefinition};
use strata_rdbms::{RdbmsTable, StoreConfig};
use tracing::{debug, info};

use crate::error::PlanError;
use crate::plan::ExecutionPlan;

/// A stream joined through a window with a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    /// Stream feeding the join.
    pub stream: String,
    /// Joined table.
    pub table: String,
    /// Window over the stream.
    pub window: WindowSpec,
    /// Join condition; `None` joins every row.
    #[serde(default)]
    pub condition: Option<ConditionExpr>,
    /// Output columns; empty selects everything.
    #[serde(default)]
    pub projection: Vec<ProjectionItem>,
    /// Which events are emitted.
    #[serde(default)]
    pub output: OutputEventType,
}

impl JoinSpec {
    /// Joins `stream` through `window` with `table`, matching every row.
    pub fn new(stream: impl Into<String>, table: impl Into<String>, window: WindowSpec) -> Self {
        Self {
            stream: stream.into(),
            table: table.into(),
            window,
            condition: None,
            projection: Vec::new(),
            output: OutputEventType::default(),
        }
    }

    /// Sets the join condition.
    #[must_use]
    pub fn on(mut self, condition: ConditionExpr) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Sets the output columns.
    #[must_use]
    pub fn select(mut self, projection: impl IntoIterator<Item = ProjectionItem>) -> Self {
        self.projection = projection.into_iter().collect();
        self
    }

    /// Sets which events are emitted.
    #[must_use]
    pub fn output(mut self, output: OutputEventType) -> Self {
        self.output = output;
        self
    }
}

/// A table declaration with its store options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Logical table.
    pub definition: TableDefinition,
    /// `@store` options (`jdbc.url`, ...).
    pub store: StoreConfig,
}

/// A complete plan declaration, loadable from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSpec {
    /// Declared streams.
    #[serde(default)]
    pub streams: Vec<StreamDefinition>,
    /// Declared tables.
    #[serde(default)]
    pub tables: Vec<TableSpec>,
    /// `(stream, table)` pairs whose events are inserted into the table.
    #[serde(default)]
    pub inserts: Vec<(String, String)>,
    /// Stream-table joins.
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
}

/// Fluent builder for an [`ExecutionPlan`].
///
/// # Example
///
/// ```rust,ignore
/// let plan = ExecutionPlanBuilder::new()
///     .define_stream(foo)
///     .define_table(stock, store)
///     .join(JoinSpec::new("FooStream", "StockTable", WindowSpec::Length(1)).on(cond))
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct ExecutionPlanBuilder {
    spec: PlanSpec,
}

impl ExecutionPlanBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a declared plan.
    #[must_use]
    pub fn from_spec(spec: PlanSpec) -> Self {
        Self { spec }
    }

    /// Declares a stream.
    #[must_use]
    pub fn define_stream(mut self, stream: StreamDefinition) -> Self {
        self.spec.streams.push(stream);
        self
    }

    /// Declares a table backed by the store described by `store`.
    #[must_use]
    pub fn define_table(mut self, definition: TableDefinition, store: StoreConfig) -> Self {
        self.spec.tables.push(TableSpec { definition, store });
        self
    }

    /// Inserts every event of `stream` into `table`.
    #[must_use]
    pub fn insert_into(mut self, stream: impl Into<String>, table: impl Into<String>) -> Self {
        self.spec.inserts.push((stream.into(), table.into()));
        self
    }

    /// Adds a stream-table join.
    #[must_use]
    pub fn join(mut self, join: JoinSpec) -> Self {
        self.spec.joins.push(join);
        self
    }

    /// Validates the plan, readies every table and compiles every join.
    ///
    /// All name resolution happens before any table is touched, so a plan
    /// referring to an undeclared stream or table fails without opening
    /// a connection.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::StreamNotFound`/`TableNotFound` for undeclared
    /// names, `PlanError::DuplicateDefinition` for repeated names,
    /// `PlanError::IncompatibleInsert` for mismatched insert routes, and
    /// `PlanError::Store` when a table cannot be readied or a condition
    /// cannot be compiled.
    pub fn build(self) -> Result<ExecutionPlan, PlanError> {
        let PlanSpec {
            streams,
            tables,
            inserts,
            joins,
        } = self.spec;

        let mut names = HashSet::new();
        for name in streams
            .iter()
            .map(StreamDefinition::id)
            .chain(tables.iter().map(|t| t.definition.name()))
        {
            if !names.insert(name) {
                return Err(PlanError::DuplicateDefinition(name.to_string()));
            }
        }

        let streams: HashMap<String, StreamDefinition> = streams
            .into_iter()
            .map(|s| (s.id().to_string(), s))
            .collect();
        let find_stream = |id: &str| {
            streams
                .get(id)
                .ok_or_else(|| PlanError::StreamNotFound(id.to_string()))
        };
        let find_table = |name: &str| {
            tables
                .iter()
                .find(|t| t.definition.name() == name)
                .map(|t| &t.definition)
                .ok_or_else(|| PlanError::TableNotFound(name.to_string()))
        };

        for (stream, table) in &inserts {
            check_insert(find_stream(stream)?, find_table(table)?)?;
        }
        for join in &joins {
            find_stream(&join.stream)?;
            find_table(&join.table)?;
            if let Some(cond) = &join.condition {
                for referenced in cond.streams() {
                    if referenced != join.table && !streams.contains_key(referenced) {
                        return Err(PlanError::StreamNotFound(referenced.to_string()));
                    }
                }
            }
        }

        let mut ready = HashMap::with_capacity(tables.len());
        for TableSpec { definition, store } in tables {
            let name = definition.name().to_string();
            let table = RdbmsTable::new(definition, &store)?;
            table.ensure_ready(table.config().create_table)?;
            ready.insert(name, Arc::new(table));
        }

        let mut compiled = Vec::with_capacity(joins.len());
        for join in joins {
            let stream = find_stream(&join.stream)?.clone();
            let table: &Arc<RdbmsTable> = ready
                .get(&join.table)
                .ok_or_else(|| PlanError::TableNotFound(join.table.clone()))?;
            let condition: Arc<dyn TableCondition> =
                table.compile_condition(std::slice::from_ref(&stream), join.condition.as_ref())?;
            let window = Window::new(join.window)?;
            let operator = WindowedTableJoin::new(
                stream,
                Arc::clone(table) as Arc<dyn Table>,
                condition,
                window,
                &join.projection,
            )?
            .with_output(join.output);
            debug!(
                stream = %join.stream,
                table = %join.table,
                window = ?join.window,
                outputs = ?operator.output_names(),
                "compiled join"
            );
            compiled.push(Mutex::new(operator));
        }

        info!(
            streams = streams.len(),
            tables = ready.len(),
            joins = compiled.len(),
            "execution plan built"
        );
        Ok(ExecutionPlan::new(streams, ready, inserts, compiled))
    }
}

fn check_insert(stream: &StreamDefinition, table: &TableDefinition) -> Result<(), PlanError> {
    let mismatch = |reason: String| PlanError::IncompatibleInsert {
        stream: stream.id().to_string(),
        table: table.name().to_string(),
        reason,
    };
    if stream.attributes().len() != table.attributes().len() {
        return Err(mismatch(format!(
            "{} attributes vs {} columns",
            stream.attributes().len(),
            table.attributes().len()
        )));
    }
    for (s, t) in stream.attributes().iter().zip(table.attributes()) {
        if s.attr_type != t.attr_type {
            return Err(mismatch(format!(
                "'{}' is {} but '{}' is {}",
                s.name, s.attr_type, t.name, t.attr_type
            )));
        }
    }
    Ok(())
}
