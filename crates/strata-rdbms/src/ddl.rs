//! Table creation and validation.
//!
//! On startup the adapter either finds the physical table and checks it
//! against the derived schema, or creates it (with its indexes) when
//! allowed. An existing table must have every declared column with a
//! compatible type and exactly the declared primary key; extra columns are
//! tolerated.

use tracing::{info, warn};

use crate::connection::Connection;
use crate::error::{BackendError, StoreError};
use crate::schema::RelationalSchema;

/// What [`validate_or_create`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlOutcome {
    /// The table did not exist and was created.
    Created,
    /// The table existed and matches the schema.
    Validated,
}

fn backend(schema: &RelationalSchema, err: BackendError) -> StoreError {
    StoreError::from_backend(schema.table_name(), None, err)
}

/// Ensures the physical table for `schema` exists and is compatible.
///
/// # Errors
///
/// Returns `StoreError::SchemaValidation` if the table is missing and
/// `create_if_missing` is false, or if an existing table lacks a declared
/// column, declares it with an incompatible type or has a different
/// primary key. Backend failures are
/// returned classified.
pub fn validate_or_create(
    conn: &mut dyn Connection,
    schema: &RelationalSchema,
    create_if_missing: bool,
) -> Result<DdlOutcome, StoreError> {
    let table = schema.table_name();
    let existing = conn.table_columns(table).map_err(|e| backend(schema, e))?;

    let outcome = if let Some(columns) = existing {
        validate_columns(schema, &columns)?;
        DdlOutcome::Validated
    } else {
        if !create_if_missing {
            return Err(StoreError::SchemaValidation {
                table: table.to_string(),
                message: "table does not exist and table creation is disabled".into(),
            });
        }
        conn.execute(&schema.create_table_sql(), &[])
            .map_err(|e| backend(schema, e))?;
        info!(table = %table, columns = schema.columns().len(), "created table");
        // A concurrent creator may have won the race with a different shape.
        let columns = conn
            .table_columns(table)
            .map_err(|e| backend(schema, e))?
            .ok_or_else(|| StoreError::SchemaValidation {
                table: table.to_string(),
                message: "table not visible after creation".into(),
            })?;
        validate_columns(schema, &columns)?;
        DdlOutcome::Created
    };

    if create_if_missing {
        for sql in schema.create_index_sql() {
            conn.execute(&sql, &[]).map_err(|e| backend(schema, e))?;
        }
    }
    Ok(outcome)
}

fn validate_columns(
    schema: &RelationalSchema,
    existing: &[crate::connection::ColumnInfo],
) -> Result<(), StoreError> {
    let table = schema.table_name();
    for col in schema.columns() {
        let found = existing
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(&col.name))
            .ok_or_else(|| StoreError::SchemaValidation {
                table: table.to_string(),
                message: format!("missing column '{}'", col.name),
            })?;
        if !col.sql_type.is_compatible_with(&found.declared_type) {
            return Err(StoreError::SchemaValidation {
                table: table.to_string(),
                message: format!(
                    "column '{}' is {} but {} was declared",
                    col.name, found.declared_type, col.sql_type
                ),
            });
        }
    }
    let mut declared: Vec<String> = schema
        .primary_key()
        .iter()
        .map(|k| k.to_lowercase())
        .collect();
    let mut actual: Vec<String> = existing
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.name.to_lowercase())
        .collect();
    declared.sort();
    actual.sort();
    if declared != actual {
        return Err(StoreError::SchemaValidation {
            table: table.to_string(),
            message: format!(
                "primary key is ({}) but ({}) was declared",
                actual.join(", "),
                declared.join(", ")
            ),
        });
    }
    for extra in existing
        .iter()
        .filter(|c| schema.columns().iter().all(|d| !d.name.eq_ignore_ascii_case(&c.name)))
    {
        warn!(table = %table, column = %extra.name, "ignoring undeclared column");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::connection::ConnectionFactory;
    use crate::schema::derive_schema;
    use crate::sqlite::SqliteConnectionFactory;
    use crate::testing::stock_table;

    fn connect(dir: &tempfile::TempDir) -> Box<dyn Connection> {
        SqliteConnectionFactory::file(dir.path().join("ddl.db"), Duration::from_secs(1))
            .connect()
            .unwrap()
    }

    #[test]
    fn test_creates_missing_table_then_validates() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = connect(&dir);
        let schema = derive_schema(&stock_table().index("volume"), 254).unwrap();
        assert_eq!(
            validate_or_create(conn.as_mut(), &schema, true).unwrap(),
            DdlOutcome::Created
        );
        assert_eq!(
            validate_or_create(conn.as_mut(), &schema, true).unwrap(),
            DdlOutcome::Validated
        );
        assert!(conn
            .query_exists(
                "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?)",
                &[crate::types::SqlValue::Text("StockTable_volume_idx".into())],
            )
            .unwrap());
    }

    #[test]
    fn test_missing_table_without_create() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = connect(&dir);
        let schema = derive_schema(&stock_table(), 254).unwrap();
        let err = validate_or_create(conn.as_mut(), &schema, false).unwrap_err();
        assert!(matches!(err, StoreError::SchemaValidation { .. }));
    }

    #[test]
    fn test_incompatible_column_type() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = connect(&dir);
        conn.execute(
            "CREATE TABLE \"StockTable\" (symbol BIGINT, price FLOAT, volume BIGINT)",
            &[],
        )
        .unwrap();
        let schema = derive_schema(&stock_table(), 254).unwrap();
        let err = validate_or_create(conn.as_mut(), &schema, true).unwrap_err();
        assert!(err.to_string().contains("column 'symbol' is BIGINT"));
    }

    #[test]
    fn test_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = connect(&dir);
        conn.execute("CREATE TABLE \"StockTable\" (symbol TEXT, price REAL)", &[])
            .unwrap();
        let schema = derive_schema(&stock_table(), 254).unwrap();
        let err = validate_or_create(conn.as_mut(), &schema, false).unwrap_err();
        assert!(err.to_string().contains("missing column 'volume'"));
    }

    #[test]
    fn test_extra_columns_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = connect(&dir);
        conn.execute(
            "CREATE TABLE \"StockTable\" (symbol TEXT, price REAL, volume INTEGER, note TEXT)",
            &[],
        )
        .unwrap();
        let schema = derive_schema(&stock_table(), 254).unwrap();
        assert_eq!(
            validate_or_create(conn.as_mut(), &schema, false).unwrap(),
            DdlOutcome::Validated
        );
    }

    #[test]
    fn test_created_table_carries_primary_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = connect(&dir);
        let schema = derive_schema(&stock_table().primary_key(["symbol"]), 254).unwrap();
        validate_or_create(conn.as_mut(), &schema, true).unwrap();
        let columns = conn.table_columns("StockTable").unwrap().unwrap();
        let keys: Vec<_> = columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(keys, vec!["symbol"]);
        assert_eq!(
            validate_or_create(conn.as_mut(), &schema, false).unwrap(),
            DdlOutcome::Validated
        );
    }

    #[test]
    fn test_existing_table_without_declared_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = connect(&dir);
        conn.execute(
            "CREATE TABLE \"StockTable\" (symbol VARCHAR(254), price FLOAT, volume BIGINT)",
            &[],
        )
        .unwrap();
        let schema = derive_schema(&stock_table().primary_key(["symbol"]), 254).unwrap();
        let err = validate_or_create(conn.as_mut(), &schema, true).unwrap_err();
        assert!(matches!(err, StoreError::SchemaValidation { .. }));
        assert!(err.to_string().contains("primary key is () but (symbol) was declared"));
    }

    #[test]
    fn test_existing_table_with_other_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = connect(&dir);
        conn.execute(
            "CREATE TABLE \"StockTable\" (symbol TEXT, price REAL, volume INTEGER, \
             PRIMARY KEY (symbol, volume))",
            &[],
        )
        .unwrap();
        let keyed = derive_schema(&stock_table().primary_key(["symbol"]), 254).unwrap();
        assert!(matches!(
            validate_or_create(conn.as_mut(), &keyed, false),
            Err(StoreError::SchemaValidation { .. })
        ));
        let unkeyed = derive_schema(&stock_table(), 254).unwrap();
        assert!(matches!(
            validate_or_create(conn.as_mut(), &unkeyed, false),
            Err(StoreError::SchemaValidation { .. })
        ));
        let matching = derive_schema(&stock_table().primary_key(["volume", "symbol"]), 254).unwrap();
        assert_eq!(
            validate_or_create(conn.as_mut(), &matching, false).unwrap(),
            DdlOutcome::Validated
        );
    }
}
