//! Condition expressions used by joins, filters and table operations.
//!
//! A [`ConditionExpr`] is a small tagged tree. Attribute references name
//! the stream (or table) they belong to, so a store can tell columns of
//! its own table apart from values that arrive with each event.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::AttributeValue;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

impl CompareOp {
    /// SQL operator text.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A condition expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionExpr {
    /// A constant value.
    Literal {
        /// The value.
        value: AttributeValue,
    },
    /// A reference to an attribute of a stream or table.
    Attribute {
        /// Stream or table id that owns the attribute.
        stream_id: String,
        /// Attribute name.
        name: String,
    },
    /// Binary comparison.
    Compare {
        /// Operator.
        op: CompareOp,
        /// Left operand.
        left: Box<ConditionExpr>,
        /// Right operand.
        right: Box<ConditionExpr>,
    },
    /// Logical conjunction.
    And {
        /// Left operand.
        left: Box<ConditionExpr>,
        /// Right operand.
        right: Box<ConditionExpr>,
    },
    /// Logical disjunction.
    Or {
        /// Left operand.
        left: Box<ConditionExpr>,
        /// Right operand.
        right: Box<ConditionExpr>,
    },
    /// Logical negation.
    Not {
        /// Negated expression.
        expr: Box<ConditionExpr>,
    },
    /// `expr IS NULL`
    IsNull {
        /// Tested expression.
        expr: Box<ConditionExpr>,
    },
    /// A function or aggregate call.
    Function {
        /// Function name.
        name: String,
        /// Arguments.
        args: Vec<ConditionExpr>,
    },
}

impl ConditionExpr {
    /// Attribute reference.
    pub fn attr(stream_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Attribute {
            stream_id: stream_id.into(),
            name: name.into(),
        }
    }

    /// Literal value.
    pub fn lit(value: impl Into<AttributeValue>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    /// Comparison with an arbitrary operator.
    #[must_use]
    pub fn compare(op: CompareOp, left: Self, right: Self) -> Self {
        Self::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Equality comparison.
    #[must_use]
    pub fn eq(left: Self, right: Self) -> Self {
        Self::compare(CompareOp::Eq, left, right)
    }

    /// Conjunction.
    #[must_use]
    pub fn and(left: Self, right: Self) -> Self {
        Self::And {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Disjunction.
    #[must_use]
    pub fn or(left: Self, right: Self) -> Self {
        Self::Or {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Negation.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: Self) -> Self {
        Self::Not {
            expr: Box::new(expr),
        }
    }

    /// Null test.
    #[must_use]
    pub fn is_null(expr: Self) -> Self {
        Self::IsNull {
            expr: Box::new(expr),
        }
    }

    /// Function call.
    pub fn function(name: impl Into<String>, args: Vec<Self>) -> Self {
        Self::Function {
            name: name.into(),
            args,
        }
    }

    /// Ids of every stream or table referenced by the expression.
    #[must_use]
    pub fn streams(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_streams(&mut out);
        out
    }

    fn collect_streams<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Self::Literal { .. } => {}
            Self::Attribute { stream_id, .. } => {
                out.insert(stream_id.as_str());
            }
            Self::Compare { left, right, .. }
            | Self::And { left, right }
            | Self::Or { left, right } => {
                left.collect_streams(out);
                right.collect_streams(out);
            }
            Self::Not { expr } | Self::IsNull { expr } => expr.collect_streams(out),
            Self::Function { args, .. } => {
                for arg in args {
                    arg.collect_streams(out);
                }
            }
        }
    }
}

impl fmt::Display for ConditionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal { value } => match value {
                AttributeValue::String(s) => write!(f, "'{s}'"),
                other => write!(f, "{other}"),
            },
            Self::Attribute { stream_id, name } => write!(f, "{stream_id}.{name}"),
            Self::Compare { op, left, right } => write!(f, "({left} {op} {right})"),
            Self::And { left, right } => write!(f, "({left} and {right})"),
            Self::Or { left, right } => write!(f, "({left} or {right})"),
            Self::Not { expr } => write!(f, "not {expr}"),
            Self::IsNull { expr } => write!(f, "{expr} is null"),
            Self::Function { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streams_collects_all_refs() {
        let expr = ConditionExpr::and(
            ConditionExpr::eq(
                ConditionExpr::attr("FooStream", "name"),
                ConditionExpr::attr("StockTable", "itemId"),
            ),
            ConditionExpr::not(ConditionExpr::is_null(ConditionExpr::attr(
                "StockTable",
                "type",
            ))),
        );
        let streams: Vec<&str> = expr.streams().into_iter().collect();
        assert_eq!(streams, vec!["FooStream", "StockTable"]);
    }

    #[test]
    fn test_literal_has_no_streams() {
        assert!(ConditionExpr::lit(5_i64).streams().is_empty());
    }

    #[test]
    fn test_display() {
        let expr = ConditionExpr::compare(
            CompareOp::GtEq,
            ConditionExpr::attr("StockTable", "price"),
            ConditionExpr::lit(50.0),
        );
        assert_eq!(expr.to_string(), "(StockTable.price >= 50)");
        let f = ConditionExpr::function("avg", vec![ConditionExpr::attr("S", "price")]);
        assert_eq!(f.to_string(), "avg(S.price)");
    }

    #[test]
    fn test_compare_op_sql() {
        assert_eq!(CompareOp::NotEq.as_sql(), "!=");
        assert_eq!(CompareOp::LtEq.to_string(), "<=");
    }

    #[test]
    fn test_serde_tagged() {
        let expr = ConditionExpr::eq(
            ConditionExpr::attr("FooStream", "name"),
            ConditionExpr::lit("WSO2"),
        );
        let json = serde_json::to_value(&expr).unwrap();
        assert_eq!(json["kind"], "compare");
        assert_eq!(json["op"], "eq");
        let back: ConditionExpr = serde_json::from_value(json).unwrap();
        assert_eq!(back, expr);
    }
}
