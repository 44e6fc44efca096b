//! The table abstraction seen by joins and query plans.
//!
//! Stores implement [`Table`] and hand out their own compiled condition
//! type behind [`TableCondition`]. Callers never inspect a compiled
//! condition; they only pass it back to the table that produced it, which
//! downcasts through [`TableCondition::as_any`].

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use crate::condition::ConditionExpr;
use crate::definition::{StreamDefinition, TableDefinition};
use crate::event::StreamEvent;
use crate::value::AttributeValue;
use crate::Result;

/// Lazy sequence of table rows, in attribute order.
pub type RowIter<'a> = Box<dyn Iterator<Item = Result<Vec<AttributeValue>>> + 'a>;

/// A condition compiled by a specific [`Table`].
pub trait TableCondition: Debug + Send + Sync {
    /// Downcast hook for the owning table.
    fn as_any(&self) -> &dyn Any;
}

/// A table that rows can be added to and matched against stream events.
pub trait Table: Debug + Send + Sync {
    /// The logical definition of the table.
    fn definition(&self) -> &TableDefinition;

    /// Compiles `condition` against this table and the given incoming streams.
    ///
    /// `None` compiles to a condition that matches every row.
    ///
    /// # Errors
    ///
    /// Returns an error if the condition references unknown streams or
    /// attributes, or uses a shape the table cannot evaluate.
    fn compile_condition(
        &self,
        streams: &[StreamDefinition],
        condition: Option<&ConditionExpr>,
    ) -> Result<Arc<dyn TableCondition>>;

    /// Adds rows to the table.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store rejects any row.
    fn add(&self, rows: &[Vec<AttributeValue>]) -> Result<()>;

    /// Finds rows matching `condition`, with stream values taken from `events`.
    ///
    /// # Errors
    ///
    /// Returns an error if `condition` was not compiled by this table or
    /// the lookup cannot be started.
    fn find<'a>(
        &'a self,
        condition: &dyn TableCondition,
        events: &[&StreamEvent],
    ) -> Result<RowIter<'a>>;

    /// Returns `true` if any row matches `condition`.
    ///
    /// # Errors
    ///
    /// Same as [`Table::find`].
    fn contains(&self, condition: &dyn TableCondition, events: &[&StreamEvent]) -> Result<bool>;
}
