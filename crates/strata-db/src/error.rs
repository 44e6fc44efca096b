//! Error types for execution plans.

use strata_rdbms::StoreError;

/// Errors from building or running an execution plan.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Table store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Core engine error
    #[error("Engine error: {0}")]
    Core(#[from] strata_core::Error),

    /// Stream not found
    #[error("Stream '{0}' not found")]
    StreamNotFound(String),

    /// Table not found
    #[error("Table '{0}' not found")]
    TableNotFound(String),

    /// A stream or table name was defined twice
    #[error("'{0}' is already defined")]
    DuplicateDefinition(String),

    /// Stream events cannot be stored in the target table
    #[error("Stream '{stream}' cannot be inserted into table '{table}': {reason}")]
    IncompatibleInsert {
        /// Source stream.
        stream: String,
        /// Target table.
        table: String,
        /// What does not line up.
        reason: String,
    },

    /// Plan is shut down
    #[error("Plan is shut down")]
    Shutdown,
}

impl PlanError {
    /// Returns `true` for errors reported by `build()` before any event is processed.
    #[must_use]
    pub fn is_compile_time(&self) -> bool {
        match self {
            Self::Store(e) => e.is_compile_time(),
            Self::Core(_)
            | Self::StreamNotFound(_)
            | Self::TableNotFound(_)
            | Self::DuplicateDefinition(_)
            | Self::IncompatibleInsert { .. } => true,
            Self::Shutdown => false,
        }
    }
}
