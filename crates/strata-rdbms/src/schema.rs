//! Schema mapping between table definitions and relational tables.
//!
//! [`derive_schema`] turns a [`TableDefinition`] into a [`RelationalSchema`]
//! with one column per attribute, in attribute order. Rows are converted
//! positionally in both directions by [`to_row`] and [`from_row`], and the
//! schema renders every statement the adapter issues.

use std::collections::HashSet;

use strata_core::{AttributeType, AttributeValue, TableDefinition};

use crate::error::StoreError;
use crate::types::{SqlType, SqlValue};

/// One mapped column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name (same as the attribute name).
    pub name: String,
    /// Column type.
    pub sql_type: SqlType,
    /// Attribute type the column was derived from.
    pub attr_type: AttributeType,
}

/// Relational form of a table definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationalSchema {
    table: String,
    columns: Vec<Column>,
    primary_key: Vec<String>,
    indexes: Vec<String>,
}

/// Quotes an SQL identifier.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Derives the relational schema of `def`.
///
/// Text columns are `VARCHAR(n)` where `n` is the attribute's length
/// override or `default_string_length`.
///
/// # Errors
///
/// Returns `StoreError::Schema` if an attribute type has no relational
/// mapping, attribute names repeat, or a primary key, index or length
/// override names an unknown attribute (length overrides must also name
/// a text attribute).
pub fn derive_schema(
    def: &TableDefinition,
    default_string_length: u32,
) -> Result<RelationalSchema, StoreError> {
    if def.attributes().is_empty() {
        return Err(StoreError::Schema(format!(
            "table '{}' declares no attributes",
            def.name()
        )));
    }

    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(def.attributes().len());
    for attr in def.attributes() {
        if !seen.insert(attr.name.as_str()) {
            return Err(StoreError::Schema(format!(
                "duplicate attribute '{}' in table '{}'",
                attr.name,
                def.name()
            )));
        }
        let length = def
            .field_lengths()
            .get(&attr.name)
            .copied()
            .unwrap_or(default_string_length);
        let sql_type = SqlType::for_attribute(attr.attr_type, length).ok_or_else(|| {
            StoreError::Schema(format!(
                "attribute '{}' of type {} has no relational mapping",
                attr.name, attr.attr_type
            ))
        })?;
        columns.push(Column {
            name: attr.name.clone(),
            sql_type,
            attr_type: attr.attr_type,
        });
    }

    for (attr, _) in def.field_lengths() {
        match def.attribute_type(attr) {
            Some(AttributeType::String) => {}
            Some(other) => {
                return Err(StoreError::Schema(format!(
                    "field length given for non-text attribute '{attr}' ({other})"
                )));
            }
            None => {
                return Err(StoreError::Schema(format!(
                    "field length given for unknown attribute '{attr}'"
                )));
            }
        }
    }
    for key in def.primary_key_attributes() {
        if def.index_of(key).is_none() {
            return Err(StoreError::Schema(format!(
                "primary key attribute '{key}' is not declared in '{}'",
                def.name()
            )));
        }
    }
    for index in def.index_attributes() {
        if def.index_of(index).is_none() {
            return Err(StoreError::Schema(format!(
                "index attribute '{index}' is not declared in '{}'",
                def.name()
            )));
        }
    }

    Ok(RelationalSchema {
        table: def.name().to_string(),
        columns,
        primary_key: def.primary_key_attributes().to_vec(),
        indexes: def.index_attributes().to_vec(),
    })
}

/// Converts an attribute-ordered row to cells.
///
/// # Errors
///
/// Returns `StoreError::Schema` on arity or type mismatch.
pub fn to_row(schema: &RelationalSchema, values: &[AttributeValue]) -> Result<Vec<SqlValue>, StoreError> {
    check_arity(schema, values.len())?;
    schema
        .columns
        .iter()
        .zip(values)
        .map(|(col, value)| to_cell(col, value))
        .collect()
}

/// Converts cells back to an attribute-ordered row.
///
/// # Errors
///
/// Returns `StoreError::Schema` on arity or type mismatch.
pub fn from_row(schema: &RelationalSchema, cells: Vec<SqlValue>) -> Result<Vec<AttributeValue>, StoreError> {
    check_arity(schema, cells.len())?;
    schema
        .columns
        .iter()
        .zip(cells)
        .map(|(col, cell)| from_cell(col, cell))
        .collect()
}

fn check_arity(schema: &RelationalSchema, actual: usize) -> Result<(), StoreError> {
    if actual == schema.columns.len() {
        Ok(())
    } else {
        Err(StoreError::Schema(format!(
            "table '{}' has {} columns, row has {actual} values",
            schema.table,
            schema.columns.len()
        )))
    }
}

fn mismatch(col: &Column, found: &dyn std::fmt::Display) -> StoreError {
    StoreError::Schema(format!(
        "column '{}' expects {}, found {found}",
        col.name, col.attr_type
    ))
}

/// Converts one attribute value to a cell for `col`.
pub(crate) fn to_cell(col: &Column, value: &AttributeValue) -> Result<SqlValue, StoreError> {
    let cell = match (col.attr_type, value) {
        (_, AttributeValue::Null) => SqlValue::Null,
        (AttributeType::String, AttributeValue::String(s)) => {
            if let SqlType::Varchar(max) = col.sql_type {
                if s.chars().count() > max as usize {
                    return Err(StoreError::Schema(format!(
                        "value for '{}' exceeds VARCHAR({max})",
                        col.name
                    )));
                }
            }
            SqlValue::Text(s.clone())
        }
        (AttributeType::Int, AttributeValue::Int(v)) => SqlValue::Integer(i64::from(*v)),
        (AttributeType::Long, AttributeValue::Long(v)) => SqlValue::Integer(*v),
        (AttributeType::Float, AttributeValue::Float(v)) => SqlValue::Real(f64::from(*v)),
        (AttributeType::Double, AttributeValue::Double(v)) => SqlValue::Real(*v),
        (AttributeType::Bool, AttributeValue::Bool(v)) => SqlValue::Integer(i64::from(*v)),
        (_, other) => {
            let found = other
                .value_type()
                .map_or_else(|| "null".to_string(), |t| t.to_string());
            return Err(mismatch(col, &found));
        }
    };
    Ok(cell)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn from_cell(col: &Column, cell: SqlValue) -> Result<AttributeValue, StoreError> {
    let value = match (col.attr_type, cell) {
        (_, SqlValue::Null) => AttributeValue::Null,
        (AttributeType::String, SqlValue::Text(s)) => AttributeValue::String(s),
        (AttributeType::Int, SqlValue::Integer(v)) => {
            AttributeValue::Int(i32::try_from(v).map_err(|_| mismatch(col, &v))?)
        }
        (AttributeType::Long, SqlValue::Integer(v)) => AttributeValue::Long(v),
        (AttributeType::Float, SqlValue::Real(v)) => AttributeValue::Float(v as f32),
        (AttributeType::Float, SqlValue::Integer(v)) => AttributeValue::Float(v as f32),
        (AttributeType::Double, SqlValue::Real(v)) => AttributeValue::Double(v),
        (AttributeType::Double, SqlValue::Integer(v)) => AttributeValue::Double(v as f64),
        (AttributeType::Bool, SqlValue::Integer(v)) => AttributeValue::Bool(v != 0),
        (_, other) => return Err(mismatch(col, &other)),
    };
    Ok(value)
}

impl RelationalSchema {
    /// Returns a copy that maps to the physical table `name`.
    #[must_use]
    pub fn with_table_name(mut self, name: impl Into<String>) -> Self {
        self.table = name.into();
        self
    }

    /// Physical table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Columns in attribute order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column called `name`.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary-key columns.
    #[must_use]
    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    /// Indexed columns.
    #[must_use]
    pub fn indexes(&self) -> &[String] {
        &self.indexes
    }

    /// Returns `true` if `name` belongs to the primary key.
    #[must_use]
    pub fn is_key(&self, name: &str) -> bool {
        self.primary_key.iter().any(|k| k == name)
    }

    /// Non-key columns with their positions.
    pub fn non_key_columns(&self) -> impl Iterator<Item = (usize, &Column)> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !self.is_key(&c.name))
    }

    fn quoted_table(&self) -> String {
        quote_ident(&self.table)
    }

    fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn placeholders(n: usize) -> String {
        vec!["?"; n].join(", ")
    }

    /// `CREATE TABLE` statement, including the primary key.
    ///
    /// ```sql
    /// CREATE TABLE IF NOT EXISTS "StockTable" (
    ///     "symbol" VARCHAR(254) NOT NULL, "price" FLOAT, PRIMARY KEY ("symbol")
    /// )
    /// ```
    #[must_use]
    pub fn create_table_sql(&self) -> String {
        let mut defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let not_null = if self.is_key(&c.name) { " NOT NULL" } else { "" };
                format!("{} {}{not_null}", quote_ident(&c.name), c.sql_type.ddl())
            })
            .collect();
        if !self.primary_key.is_empty() {
            let pk: Vec<String> = self.primary_key.iter().map(|k| quote_ident(k)).collect();
            defs.push(format!("PRIMARY KEY ({})", pk.join(", ")));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.quoted_table(),
            defs.join(", ")
        )
    }

    /// `CREATE INDEX IF NOT EXISTS` statements, one per indexed column.
    #[must_use]
    pub fn create_index_sql(&self) -> Vec<String> {
        self.indexes
            .iter()
            .map(|col| {
                format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    quote_ident(&format!("{}_{}_idx", self.table, col)),
                    self.quoted_table(),
                    quote_ident(col)
                )
            })
            .collect()
    }

    /// Single-row `INSERT` with one placeholder per column.
    #[must_use]
    pub fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quoted_table(),
            self.column_list(),
            Self::placeholders(self.columns.len())
        )
    }

    /// `SELECT` of every column for rows matching `predicate`.
    ///
    /// With a row locator the locator is selected first and paging is keyset
    /// based (`locator > ? ORDER BY locator LIMIT ?`); without one, paging
    /// falls back to `LIMIT ? OFFSET ?`.
    #[must_use]
    pub fn select_sql(&self, predicate: &str, locator: Option<&str>) -> String {
        match locator {
            Some(loc) => format!(
                "SELECT {loc}, {} FROM {} WHERE ({predicate}) AND {loc} > ? ORDER BY {loc} LIMIT ?",
                self.column_list(),
                self.quoted_table()
            ),
            None => format!(
                "SELECT {} FROM {} WHERE ({predicate}) LIMIT ? OFFSET ?",
                self.column_list(),
                self.quoted_table()
            ),
        }
    }

    /// `SELECT EXISTS` over rows matching `predicate`.
    #[must_use]
    pub fn exists_sql(&self, predicate: &str) -> String {
        format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE {predicate})",
            self.quoted_table()
        )
    }

    /// `DELETE` of rows matching `predicate`.
    #[must_use]
    pub fn delete_sql(&self, predicate: &str) -> String {
        format!("DELETE FROM {} WHERE {predicate}", self.quoted_table())
    }

    /// `UPDATE` setting `columns` (one placeholder each) on rows matching `predicate`.
    #[must_use]
    pub fn update_sql<'a>(&self, columns: impl IntoIterator<Item = &'a str>, predicate: &str) -> String {
        let sets: Vec<String> = columns
            .into_iter()
            .map(|c| format!("{} = ?", quote_ident(c)))
            .collect();
        format!(
            "UPDATE {} SET {} WHERE {predicate}",
            self.quoted_table(),
            sets.join(", ")
        )
    }
}
