//! # `strata` RDBMS Store
//!
//! Backs a `strata` table with a relational database table.
//!
//! ## Layers
//!
//! - [`schema`] - table definition to columns, rows to cells, statement text
//! - [`compiler`] - join/filter conditions to parameterized `WHERE` clauses
//! - [`pool`] - bounded connection pool with scoped leases
//! - [`table`] - the adapter: lifecycle, CRUD, upsert, lazy cursors
//!
//! ## Architecture
//!
//! ```text
//! TableDefinition + StoreConfig
//!        │
//!        ▼
//!   RdbmsTable ── derive_schema ──▶ RelationalSchema
//!        │ ensure_ready                │ create/validate (ddl)
//!        ▼                             ▼
//!   ConnectionPool ◀── ConnectionFactory (SQLite via rusqlite)
//!        │
//!        ├── insert / insert_batch / update / delete / update_or_insert
//!        └── find ──▶ RowCursor (paged, holds one lease until exhausted)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use strata_core::{AttributeType, ConditionExpr, TableDefinition};
//! use strata_rdbms::{RdbmsTable, StoreConfig};
//!
//! # fn main() -> Result<(), strata_rdbms::StoreError> {
//! let def = TableDefinition::new("StockTable")
//!     .attribute("symbol", AttributeType::String)
//!     .attribute("price", AttributeType::Float)
//!     .primary_key(["symbol"]);
//! let options = StoreConfig::new("rdbms").option("jdbc.url", "sqlite:stocks.db");
//!
//! let table = RdbmsTable::new(def, &options)?;
//! table.ensure_ready(true)?;
//! table.insert(&["WSO2".into(), 55.6f32.into()])?;
//!
//! let cheap = ConditionExpr::compare(
//!     strata_core::CompareOp::Lt,
//!     ConditionExpr::attr("StockTable", "price"),
//!     ConditionExpr::lit(60.0f32),
//! );
//! let cond = table.compile_condition(&[], Some(&cheap))?;
//! for row in table.find(&cond, &[])? {
//!     println!("{:?}", row?);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(
    test,
    allow(
        clippy::float_cmp,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss
    )
)]

/// Condition compilation to SQL.
pub mod compiler;

/// Store configuration.
pub mod config;

/// Backend connection traits.
pub mod connection;

/// Paged row cursor.
pub mod cursor;

/// Table creation and validation.
pub mod ddl;

/// Error types.
pub mod error;

/// Adapter metrics.
pub mod metrics;

/// Connection pool.
pub mod pool;

/// Retry with backoff.
pub mod retry;

/// Schema mapping.
pub mod schema;

/// SQLite backend.
pub mod sqlite;

/// The table adapter.
pub mod table;

/// Testing utilities (fixtures, fault injection).
pub mod testing;

/// SQL types and values.
pub mod types;

pub use compiler::{compile, CompiledCondition, ParamSource};
pub use config::{RdbmsStoreConfig, StoreConfig};
pub use connection::{Connection, ConnectionFactory};
pub use cursor::RowCursor;
pub use error::{BackendError, BackendErrorKind, StoreError};
pub use metrics::{MetricsSnapshot, RdbmsTableMetrics};
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use schema::{derive_schema, RelationalSchema};
pub use sqlite::SqliteConnectionFactory;
pub use table::{RdbmsTable, TableState, UpsertOutcome};
