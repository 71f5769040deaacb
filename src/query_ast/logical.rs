//! Per-statement query description handed to planners and handlers.

use super::ast::{ExprAst, SelectAst, SelectItemAst};
use super::condition::{ConditionSet, extract_conditions};
use super::errors::{QueryError, QueryResult};
use crate::models::SortDirection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedColumn {
    pub name: String,
    pub alias: Option<String>,
}

impl ProjectedColumn {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), alias: None }
    }

    /// Key used for this column in result rows.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    All,
    Columns(Vec<ProjectedColumn>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self { column: column.into(), direction: SortDirection::Asc }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self { column: column.into(), direction: SortDirection::Desc }
    }
}

/// Read-only description of one SELECT.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub table: Option<String>,
    pub projection: Projection,
    pub conditions: ConditionSet,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl QuerySpec {
    pub fn all() -> Self {
        Self {
            table: None,
            projection: Projection::All,
            conditions: ConditionSet::empty(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn from_select(select: &SelectAst) -> QueryResult<Self> {
        let conditions = extract_conditions(select.selection.as_ref())?;

        let mut columns: Vec<ProjectedColumn> = Vec::new();
        let mut wildcard = false;
        for item in &select.projection {
            match item {
                SelectItemAst::Wildcard => wildcard = true,
                SelectItemAst::Expr { expr: ExprAst::Column(name), alias } => {
                    let output = alias.as_deref().unwrap_or(name);
                    if !columns.iter().any(|c| c.output_name() == output) {
                        columns.push(ProjectedColumn { name: name.clone(), alias: alias.clone() });
                    }
                }
                SelectItemAst::Expr { expr, .. } => {
                    return Err(QueryError::Invalid(format!("unsupported query target: {}", expr.describe())));
                }
            }
        }
        let projection = if wildcard || columns.is_empty() { Projection::All } else { Projection::Columns(columns) };

        let order_by = select
            .order_by
            .iter()
            .map(|o| match &o.expr {
                ExprAst::Column(c) => Ok(OrderBy {
                    column: c.clone(),
                    direction: if o.asc { SortDirection::Asc } else { SortDirection::Desc },
                }),
                other => Err(QueryError::Invalid(format!("unsupported ORDER BY target: {}", other.describe()))),
            })
            .collect::<QueryResult<Vec<_>>>()?;

        Ok(Self {
            table: select.from.as_ref().map(|t| t.name.clone()),
            projection,
            conditions,
            order_by,
            limit: select.limit,
            offset: select.offset,
        })
    }

    pub fn with_conditions(mut self, conditions: ConditionSet) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_order_by(mut self, order_by: Vec<OrderBy>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Projection::Columns(columns.into_iter().map(ProjectedColumn::new).collect());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_ast::parser::parse_select;

    fn spec(sql: &str) -> QueryResult<QuerySpec> {
        QuerySpec::from_select(&parse_select(sql)?)
    }

    #[test]
    fn wildcard_wins_over_columns() {
        assert_eq!(spec("SELECT *, a FROM t").unwrap().projection, Projection::All);
    }

    #[test]
    fn explicit_columns_keep_order_and_drop_duplicates() {
        let s = spec("SELECT c, a, c, b AS bee FROM t").unwrap();
        match s.projection {
            Projection::Columns(cols) => {
                let names: Vec<_> = cols.iter().map(ProjectedColumn::output_name).collect();
                assert_eq!(names, vec!["c", "a", "bee"]);
            }
            Projection::All => panic!("expected explicit columns"),
        }
    }

    #[test]
    fn order_by_and_window() {
        let s = spec("SELECT * FROM t ORDER BY price DESC, name LIMIT 2 OFFSET 1").unwrap();
        assert_eq!(s.order_by, vec![OrderBy::desc("price"), OrderBy::asc("name")]);
        assert_eq!((s.limit, s.offset), (Some(2), Some(1)));
        assert_eq!(s.table.as_deref(), Some("t"));
    }

    #[test]
    fn expressions_in_targets_are_rejected() {
        assert!(matches!(spec("SELECT count(a) FROM t"), Err(QueryError::Invalid(_))));
        assert!(matches!(spec("SELECT a FROM t ORDER BY lower(a)"), Err(QueryError::Invalid(_))));
    }
}
