//! Execution plans over relational tables for `strata`.
//!
//! Wires declared streams to [`RdbmsTable`](strata_rdbms::RdbmsTable)s
//! through insert routes and windowed joins. Every name, condition and
//! table schema is checked by [`ExecutionPlanBuilder::build`] before the
//! first event is accepted.
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_db::{ExecutionPlanBuilder, JoinSpec};
//!
//! let plan = ExecutionPlanBuilder::new()
//!     .define_stream(stock_stream)
//!     .define_stream(foo_stream)
//!     .define_table(stock_table, store)
//!     .insert_into("StockStream", "StockTable")
//!     .join(JoinSpec::new("FooStream", "StockTable", WindowSpec::Length(1)).on(on))
//!     .build()?;
//!
//! plan.send("StockStream", StreamEvent::new("StockStream", 0, row))?;
//! let outputs = plan.send("FooStream", StreamEvent::new("FooStream", 1, key))?;
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod builder;
mod error;
mod plan;

pub use builder::{ExecutionPlanBuilder, JoinSpec, PlanSpec, TableSpec};
pub use error::PlanError;
pub use plan::ExecutionPlan;
