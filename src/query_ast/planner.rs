//! Client-side query planning: decide what is pushed to the remote system and
//! what the local executor has to finish. Every column reference is checked
//! here, before any remote call is issued.

use log::debug;
use serde::{Deserialize, Serialize};

use super::condition::ConditionSet;
use super::errors::{QueryError, QueryResult};
use super::logical::{OrderBy, ProjectedColumn, Projection, QuerySpec};
use super::translate::{FilterDialect, SimilaritySearch, TargetFilter, Translation, translate};
use crate::models::TableSchema;

/// What a target can evaluate natively.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub filter: bool,
    pub sort: bool,
    pub limit: bool,
    pub offset: bool,
    /// `limit + offset` must stay strictly below this value.
    pub window_ceiling: Option<u64>,
    /// Safety cap for requests that would otherwise be unbounded.
    pub default_limit: Option<u64>,
}

impl Capabilities {
    /// Nothing is pushed; everything runs locally.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self) -> Self {
        self.filter = true;
        self
    }

    pub fn with_sort(mut self) -> Self {
        self.sort = true;
        self
    }

    pub fn with_limit(mut self) -> Self {
        self.limit = true;
        self
    }

    pub fn with_offset(mut self) -> Self {
        self.offset = true;
        self
    }

    pub fn with_window_ceiling(mut self, ceiling: u64) -> Self {
        self.window_ceiling = Some(ceiling);
        self
    }

    pub fn with_default_limit(mut self, limit: u64) -> Self {
        self.default_limit = Some(limit);
        self
    }
}

/// The part of a query sent to the remote collaborator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemoteRequest {
    pub table: String,
    /// Top-level fields the local stage needs.
    pub columns: Vec<String>,
    pub filter: Option<TargetFilter>,
    pub similarity: Option<SimilaritySearch>,
    pub sort: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Pagination may stop once this many records have been collected.
    pub max_records: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub remote: RemoteRequest,
    pub residual: ConditionSet,
    pub local_sort: Vec<OrderBy>,
    pub local_offset: Option<u64>,
    pub local_limit: Option<u64>,
    pub output: Vec<ProjectedColumn>,
}

impl ExecutionPlan {
    pub fn output_names(&self) -> Vec<String> {
        self.output.iter().map(|c| c.output_name().to_string()).collect()
    }
}

pub fn plan(
    spec: &QuerySpec,
    schema: &TableSchema,
    capabilities: &Capabilities,
    dialect: Option<&dyn FilterDialect>,
) -> QueryResult<ExecutionPlan> {
    let output = resolve_projection(&spec.projection, schema)?;
    for condition in &spec.conditions {
        schema.require(condition.column(), "filter")?;
    }
    for order in &spec.order_by {
        schema.require(&order.column, "order by")?;
        if schema.is_filter_only(&order.column) {
            return Err(QueryError::UnknownColumn { column: order.column.clone(), context: "order by" });
        }
    }
    check_window(spec, capabilities)?;

    let translation = match dialect {
        Some(d) if capabilities.filter => translate(&spec.conditions, d)?,
        _ => Translation { residual: spec.conditions.clone(), ..Translation::default() },
    };
    if let Some(c) = translation.residual.iter().find(|c| schema.is_filter_only(c.column())) {
        return Err(QueryError::UnsupportedFilter(format!(
            "'{}' can only be filtered by the remote source, not with {}",
            c.column(),
            c.op()
        )));
    }

    let sort_pushed = capabilities.sort
        && !spec.order_by.is_empty()
        && spec.order_by.iter().all(|o| schema.column(&o.column).is_some());
    let window_pushable = translation.residual.is_empty() && (spec.order_by.is_empty() || sort_pushed);

    let mut remote_limit = None;
    let mut remote_offset = None;
    let mut local_limit = spec.limit;
    let mut local_offset = spec.offset;
    if window_pushable && capabilities.limit {
        match spec.offset {
            Some(off) if capabilities.offset => {
                remote_limit = spec.limit;
                remote_offset = Some(off);
                local_limit = None;
                local_offset = None;
            }
            // Fetch the whole window and skip locally.
            Some(off) => remote_limit = spec.limit.map(|l| l.saturating_add(off)),
            None => {
                remote_limit = spec.limit;
                local_limit = None;
            }
        }
    }

    let mut max_records = match remote_limit {
        Some(l) => Some(l),
        None if window_pushable => spec.limit.map(|l| l.saturating_add(spec.offset.unwrap_or(0))),
        None => None,
    };
    if max_records.is_none()
        && let Some(default) = capabilities.default_limit
    {
        let default = match capabilities.window_ceiling {
            Some(ceiling) => default.min(ceiling.saturating_sub(1)),
            None => default,
        };
        debug!("plan[{}]: unbounded request capped at default limit {}", schema.table(), default);
        if capabilities.limit {
            remote_limit = Some(default);
        }
        max_records = Some(default);
    }

    let (sort, local_sort) = if sort_pushed {
        (spec.order_by.clone(), Vec::new())
    } else {
        (Vec::new(), spec.order_by.clone())
    };

    let columns = needed_columns(&output, &translation.residual, &local_sort);
    let plan = ExecutionPlan {
        remote: RemoteRequest {
            table: schema.table().to_string(),
            columns,
            filter: translation.pushed,
            similarity: translation.similarity,
            sort,
            limit: remote_limit,
            offset: remote_offset,
            max_records,
        },
        residual: translation.residual,
        local_sort,
        local_offset,
        local_limit,
        output,
    };
    debug!(
        "plan[{}]: filter={:?} sort={} limit={:?} offset={:?} residual={} local_sort={} local_window={:?}/{:?}",
        schema.table(),
        plan.remote.filter,
        plan.remote.sort.len(),
        plan.remote.limit,
        plan.remote.offset,
        plan.residual.len(),
        plan.local_sort.len(),
        plan.local_limit,
        plan.local_offset,
    );
    Ok(plan)
}

fn resolve_projection(projection: &Projection, schema: &TableSchema) -> QueryResult<Vec<ProjectedColumn>> {
    match projection {
        Projection::All => Ok(schema.output_columns().into_iter().map(ProjectedColumn::new).collect()),
        Projection::Columns(cols) => {
            for c in cols {
                schema.require(&c.name, "projection")?;
                if schema.is_filter_only(&c.name) {
                    return Err(QueryError::UnknownColumn { column: c.name.clone(), context: "projection" });
                }
            }
            Ok(cols.clone())
        }
    }
}

fn check_window(spec: &QuerySpec, capabilities: &Capabilities) -> QueryResult<()> {
    let Some(ceiling) = capabilities.window_ceiling else {
        return Ok(());
    };
    if spec.limit.is_none() && spec.offset.is_none() {
        return Ok(());
    }
    let limit = spec.limit.unwrap_or(0);
    let offset = spec.offset.unwrap_or(0);
    if limit.saturating_add(offset) >= ceiling {
        return Err(QueryError::WindowOutOfRange { limit, offset, ceiling });
    }
    Ok(())
}

fn needed_columns(output: &[ProjectedColumn], residual: &ConditionSet, sort: &[OrderBy]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let paths = output
        .iter()
        .map(|c| c.name.as_str())
        .chain(residual.iter().map(|c| c.column()))
        .chain(sort.iter().map(|o| o.column.as_str()));
    for path in paths {
        if !out.iter().any(|c| c == path) {
            out.push(path.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnDef, ColumnType};
    use crate::query_ast::condition::{Condition, Operator};
    use crate::query_ast::translate::VectorExprDialect;

    fn schema() -> TableSchema {
        TableSchema::new(
            "docs",
            vec![
                ColumnDef::new("id", ColumnType::Text),
                ColumnDef::new("content", ColumnType::Text),
                ColumnDef::new("metadata", ColumnType::Json),
                ColumnDef::new("price", ColumnType::Float),
                ColumnDef::filter_only("search_vector", ColumnType::Vector),
            ],
        )
    }

    fn vector_caps() -> Capabilities {
        Capabilities::none()
            .with_filter()
            .with_limit()
            .with_offset()
            .with_window_ceiling(16384)
            .with_default_limit(100)
    }

    fn dialect() -> VectorExprDialect {
        VectorExprDialect::new("milvus", "metadata", "search_vector")
    }

    #[test]
    fn unknown_columns_fail_at_plan_time() {
        let caps = Capabilities::none();
        let s = QuerySpec::all().with_columns(["nope"]);
        assert!(matches!(plan(&s, &schema(), &caps, None), Err(QueryError::UnknownColumn { context: "projection", .. })));
        let s = QuerySpec::all().with_conditions(ConditionSet::new(vec![Condition::scalar(Operator::Eq, "x", 1)]));
        assert!(matches!(plan(&s, &schema(), &caps, None), Err(QueryError::UnknownColumn { context: "filter", .. })));
        let s = QuerySpec::all().with_order_by(vec![OrderBy::asc("y")]);
        assert!(matches!(plan(&s, &schema(), &caps, None), Err(QueryError::UnknownColumn { context: "order by", .. })));
    }

    #[test]
    fn filter_only_columns_cannot_be_projected() {
        let s = QuerySpec::all().with_columns(["search_vector"]);
        assert!(plan(&s, &schema(), &Capabilities::none(), None).is_err());
    }

    #[test]
    fn star_expands_to_declared_order() {
        let p = plan(&QuerySpec::all(), &schema(), &Capabilities::none(), None).unwrap();
        assert_eq!(p.output_names(), vec!["id", "content", "metadata", "price"]);
    }

    #[test]
    fn window_at_ceiling_is_rejected() {
        let s = QuerySpec::all().with_limit(16000).with_offset(384);
        let err = plan(&s, &schema(), &vector_caps(), Some(&dialect())).unwrap_err();
        assert!(matches!(err, QueryError::WindowOutOfRange { ceiling: 16384, .. }));
        let s = QuerySpec::all().with_limit(16000).with_offset(383);
        assert!(plan(&s, &schema(), &vector_caps(), Some(&dialect())).is_ok());
    }

    #[test]
    fn fully_pushed_window() {
        let s = QuerySpec::all()
            .with_conditions(ConditionSet::new(vec![Condition::scalar(Operator::Eq, "metadata.k", "v")]))
            .with_limit(10)
            .with_offset(5);
        let p = plan(&s, &schema(), &vector_caps(), Some(&dialect())).unwrap();
        assert_eq!((p.remote.limit, p.remote.offset), (Some(10), Some(5)));
        assert_eq!((p.local_limit, p.local_offset), (None, None));
        assert!(p.residual.is_empty());
    }

    #[test]
    fn residual_filter_keeps_window_local_and_caps_fetch() {
        let s = QuerySpec::all()
            .with_conditions(ConditionSet::new(vec![Condition::scalar(Operator::Eq, "content", "x")]))
            .with_limit(10);
        let p = plan(&s, &schema(), &vector_caps(), Some(&dialect())).unwrap();
        assert_eq!(p.residual.len(), 1);
        assert_eq!(p.local_limit, Some(10));
        assert_eq!(p.remote.limit, Some(100));
        assert_eq!(p.remote.filter, None);
    }

    #[test]
    fn offset_without_offset_pushdown_widens_remote_limit() {
        let caps = Capabilities::none().with_limit();
        let s = QuerySpec::all().with_limit(10).with_offset(5);
        let p = plan(&s, &schema(), &caps, None).unwrap();
        assert_eq!(p.remote.limit, Some(15));
        assert_eq!(p.remote.offset, None);
        assert_eq!((p.local_limit, p.local_offset), (Some(10), Some(5)));
    }

    #[test]
    fn local_sort_blocks_window_pushdown() {
        let s = QuerySpec::all().with_order_by(vec![OrderBy::desc("price")]).with_limit(2);
        let p = plan(&s, &schema(), &vector_caps(), Some(&dialect())).unwrap();
        assert_eq!(p.local_sort, vec![OrderBy::desc("price")]);
        assert_eq!(p.local_limit, Some(2));
        assert_eq!(p.remote.limit, Some(100));
    }

    #[test]
    fn pushed_sort_allows_pushed_limit() {
        let caps = Capabilities::none().with_sort().with_limit();
        let s = QuerySpec::all().with_order_by(vec![OrderBy::asc("price")]).with_limit(3);
        let p = plan(&s, &schema(), &caps, None).unwrap();
        assert_eq!(p.remote.sort, vec![OrderBy::asc("price")]);
        assert!(p.local_sort.is_empty());
        assert_eq!((p.remote.limit, p.local_limit), (Some(3), None));
    }

    #[test]
    fn similarity_without_limit_gets_default() {
        let s = QuerySpec::all().with_conditions(ConditionSet::new(vec![Condition::scalar(
            Operator::Eq,
            "search_vector",
            "[0.1, 0.2]",
        )]));
        let p = plan(&s, &schema(), &vector_caps(), Some(&dialect())).unwrap();
        assert!(p.remote.similarity.is_some());
        assert_eq!(p.remote.limit, Some(100));
        assert_eq!(p.remote.offset, None);
    }

    #[test]
    fn no_pushdown_target_without_default_fetches_everything() {
        let p = plan(&QuerySpec::all().with_limit(3), &schema(), &Capabilities::none(), None).unwrap();
        assert_eq!(p.remote.limit, None);
        assert_eq!(p.remote.max_records, Some(3));
        assert_eq!(p.local_limit, Some(3));
    }

    #[test]
    fn residual_on_filter_only_column_fails() {
        let s = QuerySpec::all().with_conditions(ConditionSet::new(vec![Condition::scalar(
            Operator::Eq,
            "search_vector",
            "[1]",
        )]));
        assert!(matches!(plan(&s, &schema(), &Capabilities::none(), None), Err(QueryError::UnsupportedFilter(_))));
    }

    #[test]
    fn needed_columns_cover_residual_and_sort() {
        let s = QuerySpec::all()
            .with_columns(["id"])
            .with_conditions(ConditionSet::new(vec![Condition::scalar(Operator::Eq, "content", "x")]))
            .with_order_by(vec![OrderBy::asc("price")]);
        let p = plan(&s, &schema(), &Capabilities::none(), None).unwrap();
        assert_eq!(p.remote.columns, vec!["id", "content", "price"]);
    }
}
