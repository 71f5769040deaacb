//! Splitting a condition set into what the remote system can evaluate and what
//! has to be applied after the fetch.

use log::debug;
use serde_json::Value;

use super::condition::{Condition, ConditionSet, Operator};
use super::errors::{QueryError, QueryResult, json_kind};

pub mod dialect;
pub use dialect::{FilterDialect, ParamDialect, ParamField, VectorExprDialect};

/// Native filter handed to a remote source.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetFilter {
    /// Boolean expression in the store's own syntax.
    Expression(String),
    /// Query parameters, in the order the conditions appeared.
    Params(Vec<(String, String)>),
}

impl TargetFilter {
    pub fn as_expression(&self) -> Option<&str> {
        match self {
            TargetFilter::Expression(e) => Some(e),
            TargetFilter::Params(_) => None,
        }
    }

    pub fn params(&self) -> &[(String, String)] {
        match self {
            TargetFilter::Params(p) => p,
            TargetFilter::Expression(_) => &[],
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params().iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

/// Nearest-neighbour request extracted from the reserved similarity column.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilaritySearch {
    pub column: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Translation {
    pub pushed: Option<TargetFilter>,
    pub residual: ConditionSet,
    pub similarity: Option<SimilaritySearch>,
}

/// Partition `conditions` into a native filter and residual conditions.
///
/// A pushable condition whose operator the dialect cannot express is an
/// error: dropping it would widen the result set.
pub fn translate(conditions: &ConditionSet, dialect: &dyn FilterDialect) -> QueryResult<Translation> {
    let mut parts = Vec::new();
    let mut residual = Vec::new();
    let mut similarity: Option<SimilaritySearch> = None;

    for condition in conditions {
        if dialect.similarity_column() == Some(condition.column()) {
            if similarity.is_some() {
                return Err(QueryError::Invalid(format!(
                    "only one '{}' condition is allowed",
                    condition.column()
                )));
            }
            if condition.op() != Operator::Eq {
                return Err(unsupported_operator(condition, dialect));
            }
            similarity = Some(SimilaritySearch {
                column: condition.column().to_string(),
                vector: parse_vector(condition)?,
            });
            continue;
        }
        if !dialect.is_pushable(condition) {
            residual.push(condition.clone());
            continue;
        }
        let token = dialect
            .operator_token(condition)
            .ok_or_else(|| unsupported_operator(condition, dialect))?;
        parts.push(dialect.render(condition, token)?);
    }

    let pushed = if parts.is_empty() { None } else { Some(dialect.conjoin(parts)?) };
    debug!(
        "translate[{}]: pushed={:?} residual={} similarity={}",
        dialect.target(),
        pushed,
        residual.len(),
        similarity.is_some()
    );
    Ok(Translation { pushed, residual: ConditionSet::new(residual), similarity })
}

fn unsupported_operator(condition: &Condition, dialect: &dyn FilterDialect) -> QueryError {
    QueryError::UnsupportedOperator {
        op: condition.op(),
        column: condition.column().to_string(),
        target: dialect.target().to_string(),
    }
}

/// Vectors arrive either as array literals or as JSON text (`'[1.0, 2.0]'`).
fn parse_vector(condition: &Condition) -> QueryResult<Vec<f32>> {
    let raw = condition.value().as_scalar().cloned().unwrap_or(Value::Null);
    let value = match raw {
        Value::String(text) => serde_json::from_str::<Value>(&text)
            .map_err(|_| QueryError::schema_mismatch(condition.column(), "array of numbers", &Value::String(text)))?,
        other => other,
    };
    let items = match &value {
        Value::Array(items) if !items.is_empty() => items,
        other => return Err(QueryError::schema_mismatch(condition.column(), "array of numbers", other)),
    };
    items
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| QueryError::SchemaMismatch {
                field: condition.column().to_string(),
                expected: "array of numbers",
                found: format!("array containing {}", json_kind(v)),
            })
        })
        .collect()
}
