//! Relational column types and cell values.
//!
//! Maps engine [`AttributeType`]s to SQL column types for:
//! - CREATE TABLE DDL generation
//! - compatibility checks against columns of an existing table
//! - conversion of attribute values to backend-neutral cells

use std::fmt;

use strata_core::{AttributeType, AttributeValue};

/// SQL column type of a mapped attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    /// `VARCHAR(n)`
    Varchar(u32),
    /// `INTEGER`
    Integer,
    /// `BIGINT`
    BigInt,
    /// `FLOAT`
    Float,
    /// `DOUBLE`
    Double,
    /// `BOOLEAN`
    Boolean,
}

impl SqlType {
    /// Maps an attribute type to its column type.
    ///
    /// Returns `None` for types with no relational representation.
    #[must_use]
    pub fn for_attribute(ty: AttributeType, length: u32) -> Option<Self> {
        match ty {
            AttributeType::String => Some(Self::Varchar(length)),
            AttributeType::Int => Some(Self::Integer),
            AttributeType::Long => Some(Self::BigInt),
            AttributeType::Float => Some(Self::Float),
            AttributeType::Double => Some(Self::Double),
            AttributeType::Bool => Some(Self::Boolean),
            AttributeType::Object => None,
        }
    }

    /// DDL type name.
    #[must_use]
    pub fn ddl(&self) -> String {
        match self {
            Self::Varchar(n) => format!("VARCHAR({n})"),
            Self::Integer => "INTEGER".to_string(),
            Self::BigInt => "BIGINT".to_string(),
            Self::Float => "FLOAT".to_string(),
            Self::Double => "DOUBLE".to_string(),
            Self::Boolean => "BOOLEAN".to_string(),
        }
    }

    /// Storage family of this type.
    #[must_use]
    pub const fn family(&self) -> TypeFamily {
        match self {
            Self::Varchar(_) => TypeFamily::Text,
            Self::Integer | Self::BigInt => TypeFamily::Integer,
            Self::Float | Self::Double => TypeFamily::Real,
            Self::Boolean => TypeFamily::Boolean,
        }
    }

    /// Returns `true` if an existing column declared as `declared` can hold this type.
    #[must_use]
    pub fn is_compatible_with(&self, declared: &str) -> bool {
        self.family().accepts(TypeFamily::of_declared(declared))
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ddl())
    }
}

/// Coarse storage class used to compare declared and existing column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    /// Character data.
    Text,
    /// Whole numbers.
    Integer,
    /// Floating point.
    Real,
    /// Booleans.
    Boolean,
    /// Exact numerics (`NUMERIC`, `DECIMAL`).
    Numeric,
    /// Anything else.
    Other,
}

impl TypeFamily {
    /// Classifies a declared column type name the way SQL type affinity does.
    #[must_use]
    pub fn of_declared(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("BOOL") {
            Self::Boolean
        } else if upper.contains("INT") {
            Self::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Self::Text
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Self::Real
        } else if upper.contains("NUMERIC") || upper.contains("DECIMAL") {
            Self::Numeric
        } else {
            Self::Other
        }
    }

    fn accepts(self, existing: Self) -> bool {
        match (self, existing) {
            (a, b) if a == b => true,
            (Self::Boolean, Self::Integer) | (Self::Integer, Self::Boolean) => true,
            (Self::Integer | Self::Real | Self::Boolean, Self::Numeric) => true,
            _ => false,
        }
    }
}

/// A persisted cell, independent of any driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// 64-bit integer (also booleans as 0/1).
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// Text.
    Text(String),
}

impl SqlValue {
    /// Returns `true` for `NULL`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&AttributeValue> for SqlValue {
    /// Untyped conversion used for condition parameters.
    fn from(value: &AttributeValue) -> Self {
        match value {
            AttributeValue::Null => Self::Null,
            AttributeValue::String(s) => Self::Text(s.clone()),
            AttributeValue::Int(v) => Self::Integer(i64::from(*v)),
            AttributeValue::Long(v) => Self::Integer(*v),
            AttributeValue::Float(v) => Self::Real(f64::from(*v)),
            AttributeValue::Double(v) => Self::Real(*v),
            AttributeValue::Bool(v) => Self::Integer(i64::from(*v)),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "'{v}'"),
        }
    }
}
