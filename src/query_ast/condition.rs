//! Flattening of a WHERE tree into AND-combined `(operator, column, value)` triples.

use std::fmt;

use serde_json::Value;

use super::ast::{BinaryOpAst, ExprAst};
use super::errors::{QueryError, QueryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    NotIn,
    Like,
    NotLike,
}

impl Operator {
    pub const ALL: [Operator; 10] = [
        Operator::Eq,
        Operator::NotEq,
        Operator::Lt,
        Operator::LtEq,
        Operator::Gt,
        Operator::GtEq,
        Operator::In,
        Operator::NotIn,
        Operator::Like,
        Operator::NotLike,
    ];

    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
        }
    }

    /// Operator after swapping operands: `5 > col` is `col < 5`.
    pub fn mirror(&self) -> Operator {
        match self {
            Operator::Lt => Operator::Gt,
            Operator::LtEq => Operator::GtEq,
            Operator::Gt => Operator::Lt,
            Operator::GtEq => Operator::LtEq,
            other => *other,
        }
    }

    fn from_comparison(op: BinaryOpAst) -> Option<Operator> {
        Some(match op {
            BinaryOpAst::Eq => Operator::Eq,
            BinaryOpAst::NotEq => Operator::NotEq,
            BinaryOpAst::Lt => Operator::Lt,
            BinaryOpAst::LtEq => Operator::LtEq,
            BinaryOpAst::Gt => Operator::Gt,
            BinaryOpAst::GtEq => Operator::GtEq,
            BinaryOpAst::And | BinaryOpAst::Or => return None,
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Scalar(Value),
    List(Vec<Value>),
}

impl Operand {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Operand::Scalar(v) => Some(v),
            Operand::List(_) => None,
        }
    }

    /// List operands as-is, scalars as a one-element slice.
    pub fn values(&self) -> &[Value] {
        match self {
            Operand::Scalar(v) => std::slice::from_ref(v),
            Operand::List(vs) => vs,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Scalar(v) => write!(f, "{v}"),
            Operand::List(vs) => {
                let parts: Vec<String> = vs.iter().map(Value::to_string).collect();
                write!(f, "({})", parts.join(", "))
            }
        }
    }
}

/// Immutable filter triple. `column` is a flattened dotted path.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    op: Operator,
    column: String,
    value: Operand,
}

impl Condition {
    pub fn new(op: Operator, column: impl Into<String>, value: Operand) -> Self {
        Self { op, column: column.into(), value }
    }

    pub fn scalar(op: Operator, column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(op, column, Operand::Scalar(value.into()))
    }

    pub fn op(&self) -> Operator {
        self.op
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn value(&self) -> &Operand {
        &self.value
    }

    /// Path below `prefix.`, if the column lives in that namespace.
    pub fn field_under(&self, prefix: &str) -> Option<&str> {
        self.column.strip_prefix(prefix)?.strip_prefix('.')
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.op, self.value)
    }
}

/// Ordered, AND-combined conditions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConditionSet(Vec<Condition>);

impl ConditionSet {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self(conditions)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Condition> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Condition] {
        &self.0
    }

    pub fn on_column<'s, 'c>(&'s self, column: &'c str) -> impl Iterator<Item = &'s Condition> + use<'s, 'c> {
        self.0.iter().filter(move |c| c.column == column)
    }

    /// The single `=` value given for `column`, if any.
    pub fn equality(&self, column: &str) -> Option<&Value> {
        self.on_column(column).find(|c| c.op == Operator::Eq).and_then(|c| c.value.as_scalar())
    }
}

impl IntoIterator for ConditionSet {
    type Item = Condition;
    type IntoIter = std::vec::IntoIter<Condition>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ConditionSet {
    type Item = &'a Condition;
    type IntoIter = std::slice::Iter<'a, Condition>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Condition> for ConditionSet {
    fn from_iter<I: IntoIterator<Item = Condition>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Flatten a WHERE tree. `None` (no WHERE clause) yields an empty set.
pub fn extract_conditions(selection: Option<&ExprAst>) -> QueryResult<ConditionSet> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        collect(expr, &mut out)?;
    }
    Ok(ConditionSet(out))
}

fn collect(expr: &ExprAst, out: &mut Vec<Condition>) -> QueryResult<()> {
    match expr {
        ExprAst::BinaryOp { left, op: BinaryOpAst::And, right } => {
            collect(left, out)?;
            collect(right, out)
        }
        ExprAst::BinaryOp { op: BinaryOpAst::Or, .. } => {
            Err(QueryError::UnsupportedFilter("OR is not supported, only AND-combined comparisons".into()))
        }
        ExprAst::BinaryOp { left, op, right } => {
            let op = Operator::from_comparison(*op).ok_or_else(|| unsupported(expr))?;
            match (left.as_ref(), right.as_ref()) {
                (ExprAst::Column(c), ExprAst::Literal(v)) => out.push(Condition::scalar(op, c.clone(), v.clone())),
                (ExprAst::Literal(v), ExprAst::Column(c)) => out.push(Condition::scalar(op.mirror(), c.clone(), v.clone())),
                (ExprAst::Column(_), other) | (other, ExprAst::Column(_)) => return Err(unsupported(other)),
                (other, ExprAst::Literal(_)) | (ExprAst::Literal(_), other) => return Err(unsupported(other)),
                _ => return Err(unsupported(expr)),
            }
            Ok(())
        }
        ExprAst::InList { expr: target, list, negated } => {
            let column = match target.as_ref() {
                ExprAst::Column(c) => c.clone(),
                other => return Err(unsupported(other)),
            };
            let values = list
                .iter()
                .map(|item| match item {
                    ExprAst::Literal(v) => Ok(v.clone()),
                    other => Err(unsupported(other)),
                })
                .collect::<QueryResult<Vec<_>>>()?;
            let op = if *negated { Operator::NotIn } else { Operator::In };
            out.push(Condition::new(op, column, Operand::List(values)));
            Ok(())
        }
        ExprAst::Like { expr: target, pattern, negated } => match (target.as_ref(), pattern.as_ref()) {
            (ExprAst::Column(c), ExprAst::Literal(p @ Value::String(_))) => {
                let op = if *negated { Operator::NotLike } else { Operator::Like };
                out.push(Condition::scalar(op, c.clone(), p.clone()));
                Ok(())
            }
            (ExprAst::Column(_), other) => Err(unsupported(other)),
            (other, _) => Err(unsupported(other)),
        },
        other => Err(unsupported(other)),
    }
}

fn unsupported(expr: &ExprAst) -> QueryError {
    QueryError::UnsupportedFilter(format!("{} in WHERE clause", expr.describe()))
}
