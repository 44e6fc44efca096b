//! Condition compilation to parameterized SQL.
//!
//! [`compile`] walks a [`ConditionExpr`] once and produces a
//! [`CompiledCondition`]: a `WHERE` predicate with `?` placeholders plus
//! the ordered sources of the values that fill them. References to the
//! table's own attributes become quoted column names. References to a
//! declared incoming stream become placeholders bound from each event.
//! Literals are bound too, never spliced into the SQL text.
//!
//! Aggregates and function calls are rejected; they are evaluated by the
//! engine after rows are fetched.

use std::any::Any;

use strata_core::{
    AttributeType, AttributeValue, CompareOp, ConditionExpr, StreamDefinition, StreamEvent,
    TableCondition, TableDefinition,
};

use crate::error::StoreError;
use crate::schema::quote_ident;
use crate::types::SqlValue;

/// Predicate text that matches every row.
const MATCH_ALL: &str = "1 = 1";

/// Where a placeholder's value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamSource {
    /// A constant from the condition.
    Literal(AttributeValue),
    /// An attribute of an incoming stream event.
    Stream {
        /// Stream id.
        stream_id: String,
        /// Attribute name.
        attribute: String,
        /// Position in the event data.
        index: usize,
    },
}

/// A condition compiled against one table and a set of incoming streams.
///
/// Placeholder count and order are fixed at compile time.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCondition {
    sql: String,
    params: Vec<ParamSource>,
}

impl CompiledCondition {
    /// A condition matching every row.
    #[must_use]
    pub fn match_all() -> Self {
        Self {
            sql: MATCH_ALL.to_string(),
            params: Vec::new(),
        }
    }

    /// Predicate text with `?` placeholders.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Placeholder sources, in placeholder order.
    #[must_use]
    pub fn params(&self) -> &[ParamSource] {
        &self.params
    }

    /// Returns `true` if the condition matches every row.
    #[must_use]
    pub fn is_match_all(&self) -> bool {
        self.sql == MATCH_ALL
    }

    /// Number of values that must be supplied per execution.
    #[must_use]
    pub fn stream_arity(&self) -> usize {
        self.params
            .iter()
            .filter(|p| matches!(p, ParamSource::Stream { .. }))
            .count()
    }

    /// Extracts the stream values this condition needs from `events`, in
    /// placeholder order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::BindArity` if an event for a referenced stream
    /// is missing or lacks the referenced attribute position.
    pub fn bind(&self, events: &[&StreamEvent]) -> Result<Vec<AttributeValue>, StoreError> {
        let expected = self.stream_arity();
        let mut values = Vec::with_capacity(expected);
        for param in &self.params {
            if let ParamSource::Stream {
                stream_id, index, ..
            } = param
            {
                let value = events
                    .iter()
                    .find(|e| &e.stream_id == stream_id)
                    .and_then(|e| e.get(*index))
                    .ok_or(StoreError::BindArity {
                        expected,
                        actual: values.len(),
                    })?;
                values.push(value.clone());
            }
        }
        Ok(values)
    }

    /// Merges literals with `stream_values` into backend parameters.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::BindArity` if `stream_values` does not have
    /// exactly [`stream_arity`](Self::stream_arity) entries.
    pub fn resolve(&self, stream_values: &[AttributeValue]) -> Result<Vec<SqlValue>, StoreError> {
        let expected = self.stream_arity();
        if stream_values.len() != expected {
            return Err(StoreError::BindArity {
                expected,
                actual: stream_values.len(),
            });
        }
        let mut next = stream_values.iter();
        let mut out = Vec::with_capacity(self.params.len());
        for param in &self.params {
            let value = match param {
                ParamSource::Literal(v) => v,
                ParamSource::Stream { .. } => next.next().ok_or(StoreError::BindArity {
                    expected,
                    actual: stream_values.len(),
                })?,
            };
            out.push(SqlValue::from(value));
        }
        Ok(out)
    }
}

impl TableCondition for CompiledCondition {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Compiles `condition` for `table`, resolving stream references against `streams`.
///
/// `None` compiles to a match-all condition.
///
/// # Errors
///
/// Returns `StoreError::UnsupportedCondition` for unknown streams or
/// attributes and for shapes with no SQL translation (functions,
/// aggregates, non-boolean predicates).
pub fn compile(
    table: &TableDefinition,
    streams: &[StreamDefinition],
    condition: Option<&ConditionExpr>,
) -> Result<CompiledCondition, StoreError> {
    let Some(condition) = condition else {
        return Ok(CompiledCondition::match_all());
    };
    let mut compiler = Compiler {
        table,
        streams,
        params: Vec::new(),
    };
    let sql = compiler.predicate(condition)?;
    Ok(CompiledCondition {
        sql,
        params: compiler.params,
    })
}

struct Compiler<'a> {
    table: &'a TableDefinition,
    streams: &'a [StreamDefinition],
    params: Vec<ParamSource>,
}

/// A compiled operand and its type, when known.
struct Operand {
    sql: String,
    ty: Option<AttributeType>,
}

impl Compiler<'_> {
    fn predicate(&mut self, expr: &ConditionExpr) -> Result<String, StoreError> {
        match expr {
            ConditionExpr::Compare { op, left, right } => {
                let l = self.operand(left)?;
                let r = self.operand(right)?;
                check_comparable(*op, &l, &r, expr)?;
                Ok(format!("{} {} {}", l.sql, op.as_sql(), r.sql))
            }
            ConditionExpr::And { left, right } => {
                let l = self.predicate(left)?;
                let r = self.predicate(right)?;
                Ok(format!("({l}) AND ({r})"))
            }
            ConditionExpr::Or { left, right } => {
                let l = self.predicate(left)?;
                let r = self.predicate(right)?;
                Ok(format!("({l}) OR ({r})"))
            }
            ConditionExpr::Not { expr } => Ok(format!("NOT ({})", self.predicate(expr)?)),
            ConditionExpr::IsNull { expr } => Ok(format!("{} IS NULL", self.operand(expr)?.sql)),
            ConditionExpr::Literal {
                value: AttributeValue::Bool(b),
            } => Ok(if *b { MATCH_ALL } else { "1 = 0" }.to_string()),
            ConditionExpr::Attribute { .. } => {
                let operand = self.operand(expr)?;
                if operand.ty == Some(AttributeType::Bool) {
                    Ok(format!("{} = 1", operand.sql))
                } else {
                    Err(StoreError::UnsupportedCondition(format!(
                        "'{expr}' is not a boolean predicate"
                    )))
                }
            }
            ConditionExpr::Literal { .. } => Err(StoreError::UnsupportedCondition(format!(
                "'{expr}' is not a boolean predicate"
            ))),
            ConditionExpr::Function { name, .. } => Err(StoreError::UnsupportedCondition(
                format!("function '{name}' cannot be evaluated by the store"),
            )),
        }
    }

    fn operand(&mut self, expr: &ConditionExpr) -> Result<Operand, StoreError> {
        match expr {
            ConditionExpr::Literal { value } => {
                self.params.push(ParamSource::Literal(value.clone()));
                Ok(Operand {
                    sql: "?".to_string(),
                    ty: value.value_type(),
                })
            }
            ConditionExpr::Attribute { stream_id, name } => self.attribute(stream_id, name),
            ConditionExpr::Function { name, .. } => Err(StoreError::UnsupportedCondition(
                format!("function '{name}' cannot be evaluated by the store"),
            )),
            other => Err(StoreError::UnsupportedCondition(format!(
                "'{other}' cannot be used as a value"
            ))),
        }
    }

    fn attribute(&mut self, stream_id: &str, name: &str) -> Result<Operand, StoreError> {
        if stream_id == self.table.name() {
            let ty = self.table.attribute_type(name).ok_or_else(|| {
                StoreError::UnsupportedCondition(format!(
                    "table '{stream_id}' has no attribute '{name}'"
                ))
            })?;
            return Ok(Operand {
                sql: quote_ident(name),
                ty: Some(ty),
            });
        }

        let stream = self
            .streams
            .iter()
            .find(|s| s.id() == stream_id)
            .ok_or_else(|| {
                StoreError::UnsupportedCondition(format!("stream '{stream_id}' is not defined"))
            })?;
        let index = stream.index_of(name).ok_or_else(|| {
            StoreError::UnsupportedCondition(format!(
                "stream '{stream_id}' has no attribute '{name}'"
            ))
        })?;
        self.params.push(ParamSource::Stream {
            stream_id: stream_id.to_string(),
            attribute: name.to_string(),
            index,
        });
        Ok(Operand {
            sql: "?".to_string(),
            ty: Some(stream.attributes()[index].attr_type),
        })
    }
}

fn check_comparable(
    op: CompareOp,
    l: &Operand,
    r: &Operand,
    expr: &ConditionExpr,
) -> Result<(), StoreError> {
    let (Some(lt), Some(rt)) = (l.ty, r.ty) else {
        return Ok(());
    };
    let ordered = !matches!(op, CompareOp::Eq | CompareOp::NotEq);
    let ok = (lt.is_numeric() && rt.is_numeric())
        || (lt == rt && !(ordered && lt == AttributeType::Bool))
        || lt == AttributeType::Object
        || rt == AttributeType::Object;
    if ok {
        Ok(())
    } else {
        Err(StoreError::UnsupportedCondition(format!(
            "cannot compare {lt} with {rt} in '{expr}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock_table() -> TableDefinition {
        TableDefinition::new("StockTable")
            .attribute("symbol", AttributeType::String)
            .attribute("price", AttributeType::Float)
            .attribute("volume", AttributeType::Long)
            .attribute("active", AttributeType::Bool)
    }

    fn foo_stream() -> StreamDefinition {
        StreamDefinition::new("FooStream")
            .attribute("name", AttributeType::String)
            .attribute("volume", AttributeType::Long)
    }

    fn compile_one(expr: &ConditionExpr) -> Result<CompiledCondition, StoreError> {
        compile(&stock_table(), &[foo_stream()], Some(expr))
    }

    #[test]
    fn test_none_is_match_all() {
        let c = compile(&stock_table(), &[], None).unwrap();
        assert!(c.is_match_all());
        assert_eq!(c.sql(), "1 = 1");
        assert!(c.resolve(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_stream_to_column_equality() {
        let expr = ConditionExpr::eq(
            ConditionExpr::attr("FooStream", "name"),
            ConditionExpr::attr("StockTable", "symbol"),
        );
        let c = compile_one(&expr).unwrap();
        assert_eq!(c.sql(), "? = \"symbol\"");
        assert_eq!(
            c.params(),
            [ParamSource::Stream {
                stream_id: "FooStream".into(),
                attribute: "name".into(),
                index: 0,
            }]
        );
    }

    #[test]
    fn test_literals_are_parameters() {
        let expr = ConditionExpr::and(
            ConditionExpr::compare(
                CompareOp::Gt,
                ConditionExpr::attr("StockTable", "price"),
                ConditionExpr::lit(50.0),
            ),
            ConditionExpr::or(
                ConditionExpr::compare(
                    CompareOp::LtEq,
                    ConditionExpr::attr("StockTable", "volume"),
                    ConditionExpr::attr("FooStream", "volume"),
                ),
                ConditionExpr::not(ConditionExpr::is_null(ConditionExpr::attr(
                    "StockTable",
                    "symbol",
                ))),
            ),
        );
        let c = compile_one(&expr).unwrap();
        assert_eq!(
            c.sql(),
            "(\"price\" > ?) AND ((\"volume\" <= ?) OR (NOT (\"symbol\" IS NULL)))"
        );
        assert_eq!(c.stream_arity(), 1);
        let params = c.resolve(&[AttributeValue::Long(10)]).unwrap();
        assert_eq!(params, vec![SqlValue::Real(50.0), SqlValue::Integer(10)]);
    }

    #[test]
    fn test_bind_from_events() {
        let expr = ConditionExpr::eq(
            ConditionExpr::attr("StockTable", "volume"),
            ConditionExpr::attr("FooStream", "volume"),
        );
        let c = compile_one(&expr).unwrap();
        let event = StreamEvent::new("FooStream", 0, vec!["IBM".into(), 100_i64.into()]);
        assert_eq!(c.bind(&[&event]).unwrap(), vec![AttributeValue::Long(100)]);

        let other = StreamEvent::new("BarStream", 0, vec![]);
        assert!(matches!(
            c.bind(&[&other]),
            Err(StoreError::BindArity { expected: 1, actual: 0 })
        ));
    }

    #[test]
    fn test_resolve_arity_mismatch() {
        let expr = ConditionExpr::eq(
            ConditionExpr::attr("StockTable", "symbol"),
            ConditionExpr::attr("FooStream", "name"),
        );
        let c = compile_one(&expr).unwrap();
        let err = c.resolve(&[]).unwrap_err();
        assert!(matches!(err, StoreError::BindArity { expected: 1, actual: 0 }));
    }

    #[test]
    fn test_unknown_stream_rejected() {
        let expr = ConditionExpr::eq(
            ConditionExpr::attr("BarStream", "name"),
            ConditionExpr::attr("StockTable", "symbol"),
        );
        let err = compile_one(&expr).unwrap_err();
        assert!(err.to_string().contains("stream 'BarStream' is not defined"));
    }

    #[test]
    fn test_unknown_attributes_rejected() {
        let expr = ConditionExpr::eq(
            ConditionExpr::attr("FooStream", "price"),
            ConditionExpr::attr("StockTable", "symbol"),
        );
        assert!(compile_one(&expr).is_err());
        let expr = ConditionExpr::eq(
            ConditionExpr::attr("FooStream", "name"),
            ConditionExpr::attr("StockTable", "itemId"),
        );
        assert!(compile_one(&expr).is_err());
    }

    #[test]
    fn test_functions_rejected() {
        let expr = ConditionExpr::compare(
            CompareOp::Gt,
            ConditionExpr::function("avg", vec![ConditionExpr::attr("StockTable", "price")]),
            ConditionExpr::lit(50.0),
        );
        let err = compile_one(&expr).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedCondition(ref m) if m.contains("avg")));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let expr = ConditionExpr::eq(
            ConditionExpr::attr("StockTable", "symbol"),
            ConditionExpr::lit(5_i64),
        );
        assert!(compile_one(&expr).is_err());
        let expr = ConditionExpr::eq(
            ConditionExpr::attr("StockTable", "price"),
            ConditionExpr::attr("FooStream", "volume"),
        );
        assert!(compile_one(&expr).is_ok());
    }

    #[test]
    fn test_boolean_shapes() {
        let c = compile_one(&ConditionExpr::attr("StockTable", "active")).unwrap();
        assert_eq!(c.sql(), "\"active\" = 1");
        let c = compile_one(&ConditionExpr::lit(false)).unwrap();
        assert_eq!(c.sql(), "1 = 0");
        assert!(compile_one(&ConditionExpr::attr("StockTable", "symbol")).is_err());
        assert!(compile_one(&ConditionExpr::lit(3_i64)).is_err());
    }

    #[test]
    fn test_compound_operand_rejected() {
        let expr = ConditionExpr::eq(
            ConditionExpr::and(ConditionExpr::lit(true), ConditionExpr::lit(true)),
            ConditionExpr::lit(true),
        );
        assert!(compile_one(&expr).is_err());
    }
}
