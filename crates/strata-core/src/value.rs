//! Attribute types and values carried by stream events and table rows.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Primitive type of a stream or table attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    /// UTF-8 text.
    String,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Boolean.
    Bool,
    /// Opaque engine object. Has no relational representation.
    Object,
}

impl AttributeType {
    /// Returns `true` for numeric types.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Long | Self::Float | Self::Double)
    }
}

impl FromStr for AttributeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(Self::String),
            "int" => Ok(Self::Int),
            "long" => Ok(Self::Long),
            "float" => Ok(Self::Float),
            "double" => Ok(Self::Double),
            "bool" | "boolean" => Ok(Self::Bool),
            "object" => Ok(Self::Object),
            other => Err(format!("unknown attribute type: '{other}'")),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Bool => "bool",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// A single attribute value.
///
/// `Null` is a member of every [`AttributeType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// Absent value.
    Null,
    /// UTF-8 text.
    String(String),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    Long(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Boolean.
    Bool(bool),
}

impl AttributeValue {
    /// Returns the type of this value, or `None` for `Null`.
    #[must_use]
    pub const fn value_type(&self) -> Option<AttributeType> {
        match self {
            Self::Null => None,
            Self::String(_) => Some(AttributeType::String),
            Self::Int(_) => Some(AttributeType::Int),
            Self::Long(_) => Some(AttributeType::Long),
            Self::Float(_) => Some(AttributeType::Float),
            Self::Double(_) => Some(AttributeType::Double),
            Self::Bool(_) => Some(AttributeType::Bool),
        }
    }

    /// Returns `true` if this value is `Null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` if this value may be stored in an attribute of type `ty`.
    #[must_use]
    pub fn conforms_to(&self, ty: AttributeType) -> bool {
        self.value_type().map_or(true, |own| own == ty)
    }

    /// Numeric view of the value, used for engine-side aggregation.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(f64::from(*v)),
            #[allow(clippy::cast_precision_loss)]
            Self::Long(v) => Some(*v as f64),
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            Self::Null | Self::String(_) | Self::Bool(_) => None,
        }
    }

    /// String view of the value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::String(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f32> for AttributeValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_type_parse() {
        assert_eq!("string".parse::<AttributeType>().unwrap(), AttributeType::String);
        assert_eq!("LONG".parse::<AttributeType>().unwrap(), AttributeType::Long);
        assert_eq!("boolean".parse::<AttributeType>().unwrap(), AttributeType::Bool);
        assert!("varchar".parse::<AttributeType>().is_err());
    }

    #[test]
    fn test_attribute_type_display_round_trip() {
        for ty in [
            AttributeType::String,
            AttributeType::Int,
            AttributeType::Long,
            AttributeType::Float,
            AttributeType::Double,
            AttributeType::Bool,
            AttributeType::Object,
        ] {
            assert_eq!(ty.to_string().parse::<AttributeType>().unwrap(), ty);
        }
    }

    #[test]
    fn test_value_type() {
        assert_eq!(AttributeValue::from("WSO2").value_type(), Some(AttributeType::String));
        assert_eq!(AttributeValue::from(100_i64).value_type(), Some(AttributeType::Long));
        assert_eq!(AttributeValue::Null.value_type(), None);
    }

    #[test]
    fn test_null_conforms_to_every_type() {
        assert!(AttributeValue::Null.conforms_to(AttributeType::Double));
        assert!(AttributeValue::Null.conforms_to(AttributeType::String));
        assert!(!AttributeValue::Int(1).conforms_to(AttributeType::Long));
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(AttributeValue::Long(150).as_f64(), Some(150.0));
        assert_eq!(AttributeValue::Float(1.5).as_f64(), Some(1.5));
        assert_eq!(AttributeValue::from("x").as_f64(), None);
    }

    #[test]
    fn test_from_option() {
        assert_eq!(AttributeValue::from(None::<i64>), AttributeValue::Null);
        assert_eq!(AttributeValue::from(Some(true)), AttributeValue::Bool(true));
    }

    #[test]
    fn test_serde_round_trip() {
        let values = vec![
            AttributeValue::from("IBM"),
            AttributeValue::Long(10),
            AttributeValue::Null,
        ];
        let json = serde_json::to_string(&values).unwrap();
        let back: Vec<AttributeValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }
}
