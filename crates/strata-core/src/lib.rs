//! # `strata` Core
//!
//! Engine-facing model for streams and tables in `strata`.
//!
//! This crate provides:
//! - **Values**: typed attributes and the values that flow through streams
//! - **Definitions**: stream and table schemas declared by a query plan
//! - **Conditions**: the tagged expression tree used by joins and filters
//! - **Tables**: the [`Table`](table::Table) trait backed by external stores
//! - **Windows & Joins**: length/time windows and the windowed
//!   stream-to-table join that drives table lookups
//!
//! ## Example
//!
//! ```rust
//! use strata_core::condition::ConditionExpr;
//! use strata_core::definition::StreamDefinition;
//! use strata_core::value::AttributeType;
//!
//! let foo = StreamDefinition::new("FooStream")
//!     .attribute("name", AttributeType::String)
//!     .attribute("volume", AttributeType::Long);
//!
//! let on = ConditionExpr::eq(
//!     ConditionExpr::attr("FooStream", "name"),
//!     ConditionExpr::attr("StockTable", "itemId"),
//! );
//! assert_eq!(foo.index_of("volume"), Some(1));
//! assert_eq!(on.streams().len(), 2);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod condition;
pub mod definition;
pub mod event;
pub mod join;
pub mod table;
pub mod value;
pub mod window;

pub use condition::{CompareOp, ConditionExpr};
pub use definition::{Attribute, StreamDefinition, TableDefinition};
pub use event::StreamEvent;
pub use table::{RowIter, Table, TableCondition};
pub use value::{AttributeType, AttributeValue};

/// Result type for strata-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for strata-core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An attribute was referenced that the owning definition does not declare.
    #[error("attribute '{attribute}' not found in '{owner}'")]
    AttributeNotFound {
        /// The stream or table that was searched.
        owner: String,
        /// The missing attribute name.
        attribute: String,
    },

    /// An event was routed to an operator built for a different stream.
    #[error("event for stream '{actual}' sent to operator over '{expected}'")]
    StreamMismatch {
        /// The stream the operator consumes.
        expected: String,
        /// The stream the event came from.
        actual: String,
    },

    /// Window parameters are invalid.
    #[error("invalid window: {0}")]
    InvalidWindow(String),

    /// A table operation failed inside the backing store.
    #[error("table '{table}' operation failed: {source}")]
    Table {
        /// The table name.
        table: String,
        /// The store-specific failure.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    /// Wraps a store-specific error raised while operating on `table`.
    pub fn table(
        table: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Table {
            table: table.into(),
            source: source.into(),
        }
    }
}
