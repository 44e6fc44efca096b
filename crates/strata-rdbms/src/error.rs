//! Error types for the relational table adapter.
//!
//! - [`StoreError`]: returned by every adapter operation
//! - [`BackendError`]: raised by a [`Connection`](crate::connection::Connection)
//!   and classified by [`BackendErrorKind`] so the adapter can decide
//!   whether to retry, discard the connection, or surface a constraint
//!   violation

use std::fmt;

use thiserror::Error;

/// Errors that can occur in table adapter operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The table definition cannot be mapped to a relational schema, or a
    /// row does not conform to it.
    #[error("schema error: {0}")]
    Schema(String),

    /// The condition uses a shape that cannot be compiled to SQL.
    #[error("unsupported condition: {0}")]
    UnsupportedCondition(String),

    /// An operation was attempted before the table reached `Ready`.
    #[error("table '{table}' is not initialized (state: {state})")]
    NotInitialized {
        /// The table name.
        table: String,
        /// The current lifecycle state.
        state: String,
    },

    /// An operation was attempted after the table was closed.
    #[error("table '{0}' is closed")]
    Closed(String),

    /// A primary-key or other integrity constraint was violated.
    #[error("constraint violation on '{table}'{}: {message}", row_suffix(.row))]
    ConstraintViolation {
        /// The table name.
        table: String,
        /// Index of the offending row within a batch, if any.
        row: Option<usize>,
        /// Backend message.
        message: String,
    },

    /// A batch insert failed at `row`; the whole batch was rolled back.
    #[error("batch insert into '{table}' failed at row {row}: {source}")]
    Batch {
        /// The table name.
        table: String,
        /// Index of the failing row.
        row: usize,
        /// The underlying failure.
        #[source]
        source: Box<StoreError>,
    },

    /// The backend failed in a way that may succeed on retry.
    #[error("transient backend error: {0}")]
    Transient(String),

    /// The backend failed in a way that retrying will not fix.
    #[error("fatal backend error: {0}")]
    Fatal(String),

    /// An existing table does not match the declared definition.
    #[error("schema validation failed for '{table}': {message}")]
    SchemaValidation {
        /// The table name.
        table: String,
        /// What did not match.
        message: String,
    },

    /// Invalid store configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Required configuration key is missing.
    #[error("missing required config: {0}")]
    MissingConfig(String),

    /// A compiled condition was bound with the wrong number of values.
    #[error("condition expects {expected} bound values, got {actual}")]
    BindArity {
        /// Placeholders in the compiled condition.
        expected: usize,
        /// Values supplied.
        actual: usize,
    },

    /// The backend rejected a statement.
    #[error("query error: {0}")]
    Query(String),

    /// No connection became available within the acquire timeout.
    #[error("timed out after {0}ms waiting for a pooled connection")]
    PoolTimeout(u64),
}

#[allow(clippy::ref_option)]
fn row_suffix(row: &Option<usize>) -> String {
    row.map(|r| format!(" at row {r}")).unwrap_or_default()
}

impl StoreError {
    /// Returns `true` if the operation may be retried on a fresh connection.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) | Self::PoolTimeout(_) => true,
            Self::Batch { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Returns `true` for errors raised while compiling a query plan,
    /// before any event is processed.
    #[must_use]
    pub fn is_compile_time(&self) -> bool {
        matches!(
            self,
            Self::Schema(_)
                | Self::UnsupportedCondition(_)
                | Self::SchemaValidation { .. }
                | Self::Configuration(_)
                | Self::MissingConfig(_)
        )
    }

    /// Converts a backend error raised while operating on `table`.
    pub fn from_backend(table: &str, row: Option<usize>, err: BackendError) -> Self {
        match err.kind {
            BackendErrorKind::Transient => Self::Transient(err.message),
            BackendErrorKind::Fatal => Self::Fatal(err.message),
            BackendErrorKind::Constraint => Self::ConstraintViolation {
                table: table.to_string(),
                row,
                message: err.message,
            },
            BackendErrorKind::Query => Self::Query(err.message),
        }
    }
}

/// Classification of a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Busy, locked, timed out or dropped connection.
    Transient,
    /// Cannot open, authentication, permission, corrupt or not a database.
    Fatal,
    /// Integrity constraint violated.
    Constraint,
    /// Any other statement failure.
    Query,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
            Self::Constraint => write!(f, "constraint"),
            Self::Query => write!(f, "query"),
        }
    }
}

/// A failure reported by a backend connection.
#[derive(Debug, Clone, Error)]
#[error("{kind} backend error: {message}")]
pub struct BackendError {
    /// Failure class.
    pub kind: BackendErrorKind,
    /// Backend message.
    pub message: String,
}

impl BackendError {
    /// Creates a backend error.
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Transient, message)
    }

    /// Creates a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Fatal, message)
    }

    /// Creates a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Query, message)
    }

    /// Returns `true` if the connection that raised this error must be discarded.
    #[must_use]
    pub fn breaks_connection(&self) -> bool {
        self.kind == BackendErrorKind::Fatal
    }
}

/// Result alias for backend calls.
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_violation_display() {
        let err = StoreError::ConstraintViolation {
            table: "StockTable".into(),
            row: Some(2),
            message: "UNIQUE constraint failed".into(),
        };
        assert_eq!(
            err.to_string(),
            "constraint violation on 'StockTable' at row 2: UNIQUE constraint failed"
        );

        let err = StoreError::ConstraintViolation {
            table: "StockTable".into(),
            row: None,
            message: "dup".into(),
        };
        assert_eq!(err.to_string(), "constraint violation on 'StockTable': dup");
    }

    #[test]
    fn test_from_backend_classification() {
        let err = StoreError::from_backend("T", None, BackendError::transient("database is locked"));
        assert!(err.is_transient());

        let err = StoreError::from_backend("T", Some(1), BackendError::new(BackendErrorKind::Constraint, "dup"));
        assert!(matches!(err, StoreError::ConstraintViolation { row: Some(1), .. }));
        assert!(!err.is_transient());

        let err = StoreError::from_backend("T", None, BackendError::fatal("not a database"));
        assert!(matches!(err, StoreError::Fatal(_)));
    }

    #[test]
    fn test_batch_delegates_transience() {
        let err = StoreError::Batch {
            table: "T".into(),
            row: 3,
            source: Box::new(StoreError::Transient("busy".into())),
        };
        assert!(err.is_transient());
        assert!(err.to_string().contains("row 3"));
    }

    #[test]
    fn test_compile_time_classification() {
        assert!(StoreError::UnsupportedCondition("avg".into()).is_compile_time());
        assert!(StoreError::Schema("object".into()).is_compile_time());
        assert!(!StoreError::Closed("T".into()).is_compile_time());
    }

    #[test]
    fn test_backend_error_breaks_connection() {
        assert!(BackendError::fatal("auth").breaks_connection());
        assert!(!BackendError::transient("busy").breaks_connection());
        assert_eq!(
            BackendError::query("syntax").to_string(),
            "query backend error: syntax"
        );
    }
}
