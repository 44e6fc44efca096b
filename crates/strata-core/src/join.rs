//! Windowed stream-to-table join.
//!
//! Each event arriving on the stream side is pushed through a window and
//! then matched against the table using a condition compiled by that
//! table. Matching rows are projected into output rows. Events leaving
//! the window are joined again and reported as expired output only when
//! the join was configured to emit them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::definition::StreamDefinition;
use crate::event::StreamEvent;
use crate::table::{Table, TableCondition};
use crate::value::AttributeValue;
use crate::window::Window;
use crate::{Error, Result};

/// Which side of the join an output attribute comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinSide {
    /// The incoming stream.
    Stream,
    /// The table.
    Table,
}

/// One selected output attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionItem {
    /// Side the attribute is read from.
    pub side: JoinSide,
    /// Attribute name on that side.
    pub attribute: String,
    /// Output name, defaults to `attribute`.
    #[serde(default)]
    pub alias: Option<String>,
}

impl ProjectionItem {
    /// Selects a stream attribute.
    pub fn stream(attribute: impl Into<String>) -> Self {
        Self {
            side: JoinSide::Stream,
            attribute: attribute.into(),
            alias: None,
        }
    }

    /// Selects a table attribute.
    pub fn table(attribute: impl Into<String>) -> Self {
        Self {
            side: JoinSide::Table,
            attribute: attribute.into(),
            alias: None,
        }
    }

    /// Renames the output attribute.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Output attribute name.
    #[must_use]
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.attribute)
    }
}

/// Which events the join emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputEventType {
    /// Only arriving events.
    #[default]
    Current,
    /// Only events leaving the window.
    Expired,
    /// Both.
    All,
}

impl OutputEventType {
    fn emits_current(self) -> bool {
        matches!(self, Self::Current | Self::All)
    }

    fn emits_expired(self) -> bool {
        matches!(self, Self::Expired | Self::All)
    }
}

/// Rows produced by processing one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinOutput {
    /// Rows joined from the arriving event.
    pub current: Vec<Vec<AttributeValue>>,
    /// Rows joined from events that left the window.
    pub expired: Vec<Vec<AttributeValue>>,
}

impl JoinOutput {
    /// Returns `true` if neither current nor expired rows were produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.expired.is_empty()
    }
}

/// A stream joined through a window with a table.
#[derive(Debug)]
pub struct WindowedTableJoin {
    stream: StreamDefinition,
    table: Arc<dyn Table>,
    condition: Arc<dyn TableCondition>,
    window: Window,
    projection: Vec<(JoinSide, usize)>,
    output_names: Vec<String>,
    output: OutputEventType,
}

impl WindowedTableJoin {
    /// Creates a join.
    ///
    /// `condition` must have been compiled by `table` for `stream`. An empty
    /// `projection` selects every stream attribute followed by every table
    /// attribute.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AttributeNotFound`] if a projected attribute does
    /// not exist on its side.
    pub fn new(
        stream: StreamDefinition,
        table: Arc<dyn Table>,
        condition: Arc<dyn TableCondition>,
        window: Window,
        projection: &[ProjectionItem],
    ) -> Result<Self> {
        let (projection, output_names) = if projection.is_empty() {
            let stream_cols = stream
                .attributes()
                .iter()
                .enumerate()
                .map(|(i, a)| ((JoinSide::Stream, i), a.name.clone()));
            let table_cols = table
                .definition()
                .attributes()
                .iter()
                .enumerate()
                .map(|(i, a)| ((JoinSide::Table, i), a.name.clone()));
            stream_cols.chain(table_cols).unzip()
        } else {
            let mut cols = Vec::with_capacity(projection.len());
            let mut names = Vec::with_capacity(projection.len());
            for item in projection {
                let (owner, index) = match item.side {
                    JoinSide::Stream => (stream.id(), stream.index_of(&item.attribute)),
                    JoinSide::Table => (
                        table.definition().name(),
                        table.definition().index_of(&item.attribute),
                    ),
                };
                let index = index.ok_or_else(|| Error::AttributeNotFound {
                    owner: owner.to_string(),
                    attribute: item.attribute.clone(),
                })?;
                cols.push((item.side, index));
                names.push(item.output_name().to_string());
            }
            (cols, names)
        };

        Ok(Self {
            stream,
            table,
            condition,
            window,
            projection,
            output_names,
            output: OutputEventType::default(),
        })
    }

    /// Sets which events the join emits.
    #[must_use]
    pub fn with_output(mut self, output: OutputEventType) -> Self {
        self.output = output;
        self
    }

    /// Id of the stream feeding the join.
    #[must_use]
    pub fn stream_id(&self) -> &str {
        self.stream.id()
    }

    /// Name of the joined table.
    #[must_use]
    pub fn table_name(&self) -> &str {
        self.table.definition().name()
    }

    /// Output attribute names, in output row order.
    #[must_use]
    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    /// Processes one stream event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamMismatch`] if `event` belongs to another
    /// stream, or the table's error if a lookup fails.
    pub fn process(&mut self, event: StreamEvent) -> Result<JoinOutput> {
        if event.stream_id != self.stream.id() {
            return Err(Error::StreamMismatch {
                expected: self.stream.id().to_string(),
                actual: event.stream_id,
            });
        }

        let mut out = JoinOutput::default();
        if self.output.emits_current() {
            out.current = self.lookup(&event)?;
        }
        let expired = self.window.add(event);
        if self.output.emits_expired() {
            for old in &expired {
                out.expired.extend(self.lookup(old)?);
            }
        }
        trace!(
            stream = %self.stream.id(),
            table = %self.table_name(),
            current = out.current.len(),
            expired = out.expired.len(),
            "join processed event"
        );
        Ok(out)
    }

    fn lookup(&self, event: &StreamEvent) -> Result<Vec<Vec<AttributeValue>>> {
        let mut rows = Vec::new();
        for row in self.table.find(self.condition.as_ref(), &[event])? {
            let row = row?;
            rows.push(self.project(event, &row));
        }
        Ok(rows)
    }

    fn project(&self, event: &StreamEvent, row: &[AttributeValue]) -> Vec<AttributeValue> {
        self.projection
            .iter()
            .map(|(side, i)| {
                let source = match side {
                    JoinSide::Stream => &event.data,
                    JoinSide::Table => row,
                };
                source.get(*i).cloned().unwrap_or(AttributeValue::Null)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::time::Duration;

    use parking_lot::RwLock;

    use super::*;
    use crate::condition::ConditionExpr;
    use crate::definition::TableDefinition;
    use crate::table::RowIter;
    use crate::value::AttributeType;

    /// Equality of one stream attribute with one table column, or match-all.
    #[derive(Debug)]
    struct EqCondition(Option<(usize, usize)>);

    impl TableCondition for EqCondition {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct VecTable {
        def: TableDefinition,
        rows: RwLock<Vec<Vec<AttributeValue>>>,
    }

    impl VecTable {
        fn matching(&self, cond: &dyn TableCondition, events: &[&StreamEvent]) -> Vec<Vec<AttributeValue>> {
            let cond = cond.as_any().downcast_ref::<EqCondition>().unwrap();
            self.rows
                .read()
                .iter()
                .filter(|row| match cond.0 {
                    None => true,
                    Some((s, t)) => events[0].data.get(s) == row.get(t),
                })
                .cloned()
                .collect()
        }
    }

    impl Table for VecTable {
        fn definition(&self) -> &TableDefinition {
            &self.def
        }

        fn compile_condition(
            &self,
            streams: &[StreamDefinition],
            condition: Option<&ConditionExpr>,
        ) -> Result<Arc<dyn TableCondition>> {
            let Some(ConditionExpr::Compare { left, right, .. }) = condition else {
                return Ok(Arc::new(EqCondition(None)));
            };
            let (ConditionExpr::Attribute { name: s, .. }, ConditionExpr::Attribute { name: t, .. }) =
                (left.as_ref(), right.as_ref())
            else {
                panic!("unsupported test condition");
            };
            let s = streams[0].index_of(s).unwrap();
            let t = self.def.index_of(t).unwrap();
            Ok(Arc::new(EqCondition(Some((s, t)))))
        }

        fn add(&self, rows: &[Vec<AttributeValue>]) -> Result<()> {
            self.rows.write().extend(rows.iter().cloned());
            Ok(())
        }

        fn find<'a>(
            &'a self,
            condition: &dyn TableCondition,
            events: &[&StreamEvent],
        ) -> Result<RowIter<'a>> {
            Ok(Box::new(self.matching(condition, events).into_iter().map(Ok)))
        }

        fn contains(&self, condition: &dyn TableCondition, events: &[&StreamEvent]) -> Result<bool> {
            Ok(!self.matching(condition, events).is_empty())
        }
    }

    fn foo_stream() -> StreamDefinition {
        StreamDefinition::new("FooStream")
            .attribute("name", AttributeType::String)
            .attribute("volume", AttributeType::Long)
    }

    fn stock_table() -> Arc<dyn Table> {
        let table = VecTable {
            def: TableDefinition::new("StockTable")
                .attribute("symbol", AttributeType::String)
                .attribute("price", AttributeType::Double),
            rows: RwLock::new(Vec::new()),
        };
        table
            .add(&[
                vec!["WSO2".into(), 55.6.into()],
                vec!["IBM".into(), 75.6.into()],
            ])
            .unwrap();
        Arc::new(table)
    }

    fn on_symbol() -> ConditionExpr {
        ConditionExpr::eq(
            ConditionExpr::attr("FooStream", "name"),
            ConditionExpr::attr("StockTable", "symbol"),
        )
    }

    fn foo(ts: i64, name: &str) -> StreamEvent {
        StreamEvent::new("FooStream", ts, vec![name.into(), 100_i64.into()])
    }

    #[test]
    fn test_length_one_join_emits_current_only() {
        let table = stock_table();
        let cond = table.compile_condition(&[foo_stream()], Some(&on_symbol())).unwrap();
        let mut join = WindowedTableJoin::new(
            foo_stream(),
            table,
            cond,
            Window::length(1).unwrap(),
            &[
                ProjectionItem::stream("name").alias("symbol"),
                ProjectionItem::table("price"),
            ],
        )
        .unwrap();

        let a = join.process(foo(1, "WSO2")).unwrap();
        let b = join.process(foo(2, "IBM")).unwrap();
        assert_eq!(a.current, vec![vec![AttributeValue::from("WSO2"), 55.6.into()]]);
        assert_eq!(b.current, vec![vec![AttributeValue::from("IBM"), 75.6.into()]]);
        assert!(a.expired.is_empty() && b.expired.is_empty());
        assert_eq!(join.output_names(), ["symbol", "price"]);
    }

    #[test]
    fn test_expired_output_rejoins_evicted_events() {
        let table = stock_table();
        let cond = table.compile_condition(&[foo_stream()], Some(&on_symbol())).unwrap();
        let mut join = WindowedTableJoin::new(
            foo_stream(),
            table,
            cond,
            Window::time(Duration::from_secs(5)).unwrap(),
            &[ProjectionItem::table("symbol")],
        )
        .unwrap()
        .with_output(OutputEventType::All);

        join.process(foo(0, "WSO2")).unwrap();
        let out = join.process(foo(6_000, "IBM")).unwrap();
        assert_eq!(out.current, vec![vec![AttributeValue::from("IBM")]]);
        assert_eq!(out.expired, vec![vec![AttributeValue::from("WSO2")]]);
    }

    #[test]
    fn test_empty_projection_selects_both_sides() {
        let table = stock_table();
        let cond = table.compile_condition(&[foo_stream()], None).unwrap();
        let mut join =
            WindowedTableJoin::new(foo_stream(), table, cond, Window::length(1).unwrap(), &[])
                .unwrap();
        let out = join.process(foo(1, "CSC")).unwrap();
        assert_eq!(out.current.len(), 2);
        assert_eq!(out.current[0].len(), 4);
        assert_eq!(join.output_names(), ["name", "volume", "symbol", "price"]);
    }

    #[test]
    fn test_unknown_projection_attribute() {
        let table = stock_table();
        let cond = table.compile_condition(&[foo_stream()], None).unwrap();
        let err = WindowedTableJoin::new(
            foo_stream(),
            table,
            cond,
            Window::length(1).unwrap(),
            &[ProjectionItem::table("volume")],
        )
        .unwrap_err();
        assert!(matches!(err, Error::AttributeNotFound { .. }));
    }

    #[test]
    fn test_stream_mismatch() {
        let table = stock_table();
        let cond = table.compile_condition(&[foo_stream()], None).unwrap();
        let mut join =
            WindowedTableJoin::new(foo_stream(), table, cond, Window::length(1).unwrap(), &[])
                .unwrap();
        let err = join
            .process(StreamEvent::new("BarStream", 0, vec![]))
            .unwrap_err();
        assert!(matches!(err, Error::StreamMismatch { .. }));
    }
}
