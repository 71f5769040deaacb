//! Target-system filter dialects.
//!
//! Each dialect declares which conditions it can push and an explicit
//! operator table; `translate` refuses anything outside that table.

use serde_json::Value;

use super::TargetFilter;
use crate::query_ast::condition::{Condition, Operand, Operator};
use crate::query_ast::errors::{QueryError, QueryResult};

pub trait FilterDialect: Send + Sync {
    /// Name used in error messages.
    fn target(&self) -> &str;

    /// Reserved column that requests a similarity search instead of a filter.
    fn similarity_column(&self) -> Option<&str> {
        None
    }

    fn is_pushable(&self, condition: &Condition) -> bool;

    /// Native token for the condition's operator, `None` if the target has none.
    fn operator_token(&self, condition: &Condition) -> Option<&'static str>;

    fn render(&self, condition: &Condition, token: &'static str) -> QueryResult<TargetFilter>;

    /// Combine rendered conditions with the target's AND.
    fn conjoin(&self, parts: Vec<TargetFilter>) -> QueryResult<TargetFilter>;
}

/// Boolean-expression filters over a JSON metadata namespace (Milvus style):
/// `metadata.price < 1000 AND metadata.price > 300` becomes
/// `(price < 1000) and (price > 300)`.
#[derive(Debug, Clone)]
pub struct VectorExprDialect {
    target: String,
    prefix: String,
    similarity: String,
}

impl VectorExprDialect {
    pub fn new(target: impl Into<String>, prefix: impl Into<String>, similarity: impl Into<String>) -> Self {
        Self { target: target.into(), prefix: prefix.into(), similarity: similarity.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn field_path(field: &str) -> String {
        let mut parts = field.split('.');
        let mut out = parts.next().unwrap_or_default().to_string();
        for p in parts {
            out.push_str(&format!("[\"{p}\"]"));
        }
        out
    }

    fn literal(&self, condition: &Condition, value: &Value) -> QueryResult<String> {
        match value {
            Value::Null => Err(QueryError::Invalid(format!(
                "cannot compare '{}' with NULL in a {} filter",
                condition.column(),
                self.target
            ))),
            Value::Object(_) => Err(QueryError::schema_mismatch(condition.column(), "scalar", value)),
            other => Ok(other.to_string()),
        }
    }
}

impl FilterDialect for VectorExprDialect {
    fn target(&self) -> &str {
        &self.target
    }

    fn similarity_column(&self) -> Option<&str> {
        Some(&self.similarity)
    }

    fn is_pushable(&self, condition: &Condition) -> bool {
        condition.field_under(&self.prefix).is_some_and(|f| !f.is_empty())
    }

    fn operator_token(&self, condition: &Condition) -> Option<&'static str> {
        Some(match condition.op() {
            Operator::Eq => "==",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::Like => "like",
            Operator::NotLike => "not like",
        })
    }

    fn render(&self, condition: &Condition, token: &'static str) -> QueryResult<TargetFilter> {
        let field = condition.field_under(&self.prefix).unwrap_or(condition.column());
        let value = match condition.value() {
            Operand::Scalar(v) => self.literal(condition, v)?,
            Operand::List(vs) => {
                let items = vs.iter().map(|v| self.literal(condition, v)).collect::<QueryResult<Vec<_>>>()?;
                format!("[{}]", items.join(", "))
            }
        };
        Ok(TargetFilter::Expression(format!("({} {} {})", Self::field_path(field), token, value)))
    }

    fn conjoin(&self, parts: Vec<TargetFilter>) -> QueryResult<TargetFilter> {
        let exprs: Vec<String> = parts
            .into_iter()
            .filter_map(|p| match p {
                TargetFilter::Expression(e) => Some(e),
                TargetFilter::Params(_) => None,
            })
            .collect();
        Ok(TargetFilter::Expression(exprs.join(" and ")))
    }
}

/// One row of a declarative column → request-parameter mapping table.
#[derive(Debug, Clone)]
pub struct ParamField {
    pub column: String,
    pub param: String,
    pub operators: Vec<Operator>,
    pub list_separator: Option<&'static str>,
}

impl ParamField {
    pub fn new(column: impl Into<String>, param: impl Into<String>, operators: &[Operator]) -> Self {
        Self { column: column.into(), param: param.into(), operators: operators.to_vec(), list_separator: None }
    }

    pub fn with_list_separator(mut self, sep: &'static str) -> Self {
        self.list_separator = Some(sep);
        self
    }
}

/// Query-parameter filters for REST APIs without a filter language.
#[derive(Debug, Clone)]
pub struct ParamDialect {
    target: String,
    fields: Vec<ParamField>,
}

impl ParamDialect {
    pub fn new(target: impl Into<String>, fields: Vec<ParamField>) -> Self {
        Self { target: target.into(), fields }
    }

    fn field(&self, column: &str) -> Option<&ParamField> {
        self.fields.iter().find(|f| f.column == column)
    }

    fn scalar_text(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl FilterDialect for ParamDialect {
    fn target(&self) -> &str {
        &self.target
    }

    fn is_pushable(&self, condition: &Condition) -> bool {
        self.field(condition.column()).is_some()
    }

    fn operator_token(&self, condition: &Condition) -> Option<&'static str> {
        let field = self.field(condition.column())?;
        if !field.operators.contains(&condition.op()) {
            return None;
        }
        match condition.op() {
            Operator::In if field.list_separator.is_none() => None,
            op => Some(op.as_sql()),
        }
    }

    fn render(&self, condition: &Condition, _token: &'static str) -> QueryResult<TargetFilter> {
        let Some(field) = self.field(condition.column()) else {
            return Err(QueryError::UnknownColumn { column: condition.column().to_string(), context: "filter" });
        };
        let text = match condition.value() {
            Operand::Scalar(Value::Null) => {
                return Err(QueryError::Invalid(format!("'{}' cannot be NULL", condition.column())));
            }
            Operand::Scalar(v) => Self::scalar_text(v),
            Operand::List(vs) => {
                let sep = field.list_separator.unwrap_or(",");
                vs.iter().map(Self::scalar_text).collect::<Vec<_>>().join(sep)
            }
        };
        Ok(TargetFilter::Params(vec![(field.param.clone(), text)]))
    }

    fn conjoin(&self, parts: Vec<TargetFilter>) -> QueryResult<TargetFilter> {
        let mut params: Vec<(String, String)> = Vec::new();
        for (name, value) in parts.iter().flat_map(|p| p.params().iter().cloned()) {
            if params.iter().any(|(existing, _)| existing == &name) {
                return Err(QueryError::Invalid(format!(
                    "{} accepts a single value for '{}'",
                    self.target, name
                )));
            }
            params.push((name, value));
        }
        Ok(TargetFilter::Params(params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vector_literals_and_lists() {
        let d = VectorExprDialect::new("milvus", "metadata", "search_vector");
        let c = Condition::new(Operator::In, "metadata.tag", Operand::List(vec![json!("a"), json!(2)]));
        let token = d.operator_token(&c).unwrap();
        assert_eq!(d.render(&c, token).unwrap(), TargetFilter::Expression("(tag in [\"a\", 2])".into()));
    }

    #[test]
    fn vector_nested_field_path() {
        let d = VectorExprDialect::new("milvus", "metadata", "search_vector");
        let c = Condition::scalar(Operator::Like, "metadata.author.name", "Jo%");
        assert_eq!(
            d.render(&c, "like").unwrap(),
            TargetFilter::Expression("(author[\"name\"] like \"Jo%\")".into())
        );
    }

    #[test]
    fn vector_null_comparison_is_rejected() {
        let d = VectorExprDialect::new("milvus", "metadata", "search_vector");
        let c = Condition::scalar(Operator::Eq, "metadata.x", Value::Null);
        assert!(matches!(d.render(&c, "=="), Err(QueryError::Invalid(_))));
    }

    #[test]
    fn bare_prefix_is_not_pushable() {
        let d = VectorExprDialect::new("milvus", "metadata", "search_vector");
        assert!(!d.is_pushable(&Condition::scalar(Operator::Eq, "metadata", "x")));
        assert!(d.is_pushable(&Condition::scalar(Operator::Eq, "metadata.x", "x")));
    }

    #[test]
    fn params_refuse_duplicates() {
        let d = ParamDialect::new("youtube", vec![ParamField::new("video_id", "videoId", &[Operator::Eq])]);
        let parts = vec![
            TargetFilter::Params(vec![("videoId".into(), "a".into())]),
            TargetFilter::Params(vec![("videoId".into(), "b".into())]),
        ];
        assert!(matches!(d.conjoin(parts), Err(QueryError::Invalid(_))));
    }

    #[test]
    fn in_without_separator_has_no_token() {
        let d = ParamDialect::new("news", vec![ParamField::new("kind", "kind", &[Operator::Eq, Operator::In])]);
        let c = Condition::new(Operator::In, "kind", Operand::List(vec![json!("news")]));
        assert_eq!(d.operator_token(&c), None);
        assert_eq!(d.operator_token(&Condition::scalar(Operator::Eq, "kind", "news")), Some("="));
    }
}
