//! Table handlers and statement dispatch.
//!
//! A handler declares its schema and what it can push down; the shared
//! SELECT pipeline (plan, fetch, unify, local execution) lives in
//! [`TablePipeline`] so every API-backed table behaves the same way.

use std::collections::HashMap;

use log::info;
use serde_json::Value;

use super::ast::{ExprAst, StatementAst};
use super::condition::{ConditionSet, extract_conditions};
use super::errors::{QueryError, QueryResult};
use super::fetch::{RemoteSource, fetch_all};
use super::local;
use super::logical::QuerySpec;
use super::parser::parse_statement;
use super::planner::{Capabilities, ExecutionPlan, plan};
use super::translate::FilterDialect;
use super::unify::Unifier;
use crate::models::{Record, TableResult, TableSchema};

#[derive(Debug, Clone, PartialEq)]
pub enum StatementOutcome {
    Rows(TableResult),
    Affected(u64),
}

impl StatementOutcome {
    pub fn rows(&self) -> Option<&TableResult> {
        match self {
            StatementOutcome::Rows(r) => Some(r),
            StatementOutcome::Affected(_) => None,
        }
    }
}

#[async_trait::async_trait]
pub trait TableHandler: Send + Sync {
    fn name(&self) -> &str;

    fn schema(&self) -> &TableSchema;

    fn capabilities(&self) -> Capabilities;

    async fn select(&self, spec: &QuerySpec) -> QueryResult<TableResult>;

    async fn insert(&self, _rows: Vec<Record>) -> QueryResult<u64> {
        Err(QueryError::UnsupportedStatement(format!("INSERT into '{}'", self.name())))
    }

    async fn update(&self, _assignments: Record, _conditions: &ConditionSet) -> QueryResult<u64> {
        Err(QueryError::UnsupportedStatement(format!("UPDATE of '{}'", self.name())))
    }

    async fn delete(&self, _conditions: &ConditionSet) -> QueryResult<u64> {
        Err(QueryError::UnsupportedStatement(format!("DELETE from '{}'", self.name())))
    }
}

/// Table name → handler, filled once at configuration time.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn TableHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own name. Names are case-insensitive.
    pub fn register(&mut self, handler: Box<dyn TableHandler>) {
        let name = handler.name().to_ascii_lowercase();
        self.handlers.insert(name, handler);
    }

    pub fn get(&self, table: &str) -> Option<&dyn TableHandler> {
        self.handlers.get(&table.to_ascii_lowercase()).map(|b| &**b)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Parse `sql`, find the handler for its table and dispatch by verb.
pub async fn execute_sql(sql: &str, registry: &HandlerRegistry) -> QueryResult<StatementOutcome> {
    let statement = parse_statement(sql)?;
    let table = statement
        .table()
        .ok_or_else(|| QueryError::Invalid("statement has no target table".into()))?
        .to_string();
    let handler = registry
        .get(&table)
        .ok_or_else(|| QueryError::Invalid(format!("no handler registered for table '{table}'")))?;

    match statement {
        StatementAst::Select(select) => {
            let spec = QuerySpec::from_select(&select)?;
            info!("SELECT on '{}'", handler.name());
            handler.select(&spec).await.map(StatementOutcome::Rows)
        }
        StatementAst::Insert(insert) => {
            for column in &insert.columns {
                require_writable(handler.schema(), column, "insert")?;
            }
            let rows = insert
                .rows
                .iter()
                .map(|values| {
                    insert
                        .columns
                        .iter()
                        .zip(values)
                        .map(|(column, expr)| Ok((column.clone(), literal(column, expr)?)))
                        .collect::<QueryResult<Record>>()
                })
                .collect::<QueryResult<Vec<_>>>()?;
            info!("INSERT of {} rows into '{}'", rows.len(), handler.name());
            handler.insert(rows).await.map(StatementOutcome::Affected)
        }
        StatementAst::Update(update) => {
            let mut assignments = Record::new();
            for (column, expr) in &update.assignments {
                require_writable(handler.schema(), column, "update")?;
                assignments.insert(column.clone(), literal(column, expr)?);
            }
            let conditions = extract_conditions(update.selection.as_ref())?;
            info!("UPDATE of '{}' ({} conditions)", handler.name(), conditions.len());
            handler.update(assignments, &conditions).await.map(StatementOutcome::Affected)
        }
        StatementAst::Delete(delete) => {
            let conditions = extract_conditions(delete.selection.as_ref())?;
            info!("DELETE from '{}' ({} conditions)", handler.name(), conditions.len());
            handler.delete(&conditions).await.map(StatementOutcome::Affected)
        }
    }
}

fn require_writable(schema: &TableSchema, column: &str, context: &'static str) -> QueryResult<()> {
    if schema.is_output_column(column) {
        Ok(())
    } else {
        Err(QueryError::UnknownColumn { column: column.to_string(), context })
    }
}

fn literal(column: &str, expr: &ExprAst) -> QueryResult<Value> {
    match expr {
        ExprAst::Literal(v) => Ok(v.clone()),
        other => Err(QueryError::Invalid(format!(
            "value for '{}' must be a literal, got {}",
            column,
            other.describe()
        ))),
    }
}

/// Schema, capabilities and translation rules of one API-backed table.
pub struct TablePipeline {
    schema: TableSchema,
    capabilities: Capabilities,
    dialect: Option<Box<dyn FilterDialect>>,
    explode: Option<String>,
}

impl TablePipeline {
    pub fn new(schema: TableSchema, capabilities: Capabilities) -> Self {
        Self { schema, capabilities, dialect: None, explode: None }
    }

    pub fn with_dialect(mut self, dialect: impl FilterDialect + 'static) -> Self {
        self.dialect = Some(Box::new(dialect));
        self
    }

    pub fn exploding(mut self, field: impl Into<String>) -> Self {
        self.explode = Some(field.into());
        self
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn plan(&self, spec: &QuerySpec) -> QueryResult<ExecutionPlan> {
        match &self.explode {
            // One remote record can unify into several rows, so LIMIT and
            // OFFSET count rows only after exploding.
            Some(_) => {
                let capabilities = Capabilities { limit: false, offset: false, ..self.capabilities.clone() };
                plan(spec, &self.schema, &capabilities, self.dialect.as_deref())
            }
            None => plan(spec, &self.schema, &self.capabilities, self.dialect.as_deref()),
        }
    }

    pub fn unify(&self, raw: Vec<Value>) -> QueryResult<Vec<Record>> {
        let unifier = Unifier::new(&self.schema);
        match &self.explode {
            Some(field) => unifier.exploding(field.as_str()).unify(raw),
            None => unifier.unify(raw),
        }
    }

    /// Plan, drain `source`, unify, then finish locally.
    pub async fn run<S>(&self, spec: &QuerySpec, source: &S) -> QueryResult<TableResult>
    where
        S: RemoteSource + ?Sized,
    {
        let plan = self.plan(spec)?;
        self.run_plan(&plan, source).await
    }

    pub async fn run_plan<S>(&self, plan: &ExecutionPlan, source: &S) -> QueryResult<TableResult>
    where
        S: RemoteSource + ?Sized,
    {
        let raw = fetch_all(source, &plan.remote).await?;
        self.finish(plan, raw)
    }

    /// Unify already-fetched payloads and apply the local part of `plan`.
    pub fn finish(&self, plan: &ExecutionPlan, raw: Vec<Value>) -> QueryResult<TableResult> {
        let rows = self.unify(raw)?;
        local::execute(rows, plan, &self.schema)
    }
}

/// Read-only table over a single remote source.
pub struct ApiTable<S> {
    pipeline: TablePipeline,
    source: S,
}

impl<S: RemoteSource> ApiTable<S> {
    pub fn new(pipeline: TablePipeline, source: S) -> Self {
        Self { pipeline, source }
    }

    pub fn pipeline(&self) -> &TablePipeline {
        &self.pipeline
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

#[async_trait::async_trait]
impl<S: RemoteSource> TableHandler for ApiTable<S> {
    fn name(&self) -> &str {
        self.pipeline.schema().table()
    }

    fn schema(&self) -> &TableSchema {
        self.pipeline.schema()
    }

    fn capabilities(&self) -> Capabilities {
        self.pipeline.capabilities().clone()
    }

    async fn select(&self, spec: &QuerySpec) -> QueryResult<TableResult> {
        self.pipeline.run(spec, &self.source).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnDef, ColumnType};
    use crate::query_ast::errors::FetchError;
    use crate::query_ast::fetch::Page;
    use crate::query_ast::planner::RemoteRequest;
    use serde_json::json;

    struct Fixed(Vec<Value>);

    #[async_trait::async_trait]
    impl RemoteSource for Fixed {
        async fn fetch(&self, _request: &RemoteRequest, _token: Option<&str>) -> Result<Page, FetchError> {
            Ok(Page::last(self.0.clone()))
        }
    }

    fn registry() -> HandlerRegistry {
        let schema = TableSchema::new(
            "Items",
            vec![ColumnDef::new("name", ColumnType::Text), ColumnDef::new("price", ColumnType::Integer)],
        );
        let source = Fixed(vec![
            json!({"name": "a", "price": 10}),
            json!({"name": "b", "price": 30}),
            json!({"name": "c"}),
        ]);
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(ApiTable::new(TablePipeline::new(schema, Capabilities::none()), source)));
        registry
    }

    #[tokio::test]
    async fn select_runs_the_whole_pipeline() {
        let out = execute_sql("SELECT name FROM items WHERE price >= 10 ORDER BY price DESC", &registry())
            .await
            .unwrap();
        let rows = out.rows().unwrap();
        assert_eq!(rows.columns(), &["name".to_string()]);
        assert_eq!(rows.column_values("name"), vec![&json!("b"), &json!("a")]);
    }

    #[tokio::test]
    async fn unknown_table_and_read_only_verbs() {
        let r = registry();
        assert!(matches!(execute_sql("SELECT * FROM nope", &r).await, Err(QueryError::Invalid(_))));
        let err = execute_sql("DELETE FROM items WHERE name = 'a'", &r).await.unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedStatement(_)));
    }

    #[tokio::test]
    async fn insert_checks_columns_before_dispatch() {
        let err = execute_sql("INSERT INTO items (colour) VALUES ('red')", &registry()).await.unwrap_err();
        assert!(matches!(err, QueryError::UnknownColumn { context: "insert", .. }));
    }

    #[tokio::test]
    async fn empty_fetch_keeps_declared_columns() {
        let schema = TableSchema::new(
            "t",
            vec![ColumnDef::new("a", ColumnType::Text), ColumnDef::new("b", ColumnType::Text)],
        );
        let table = ApiTable::new(TablePipeline::new(schema, Capabilities::none()), Fixed(vec![]));
        let out = table.select(&QuerySpec::all()).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(out.columns(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn exploding_pipelines_keep_the_window_local() {
        let schema = TableSchema::new(
            "threads",
            vec![ColumnDef::new("id", ColumnType::Text), ColumnDef::new("replies.text", ColumnType::Text)],
        );
        let caps = Capabilities::none().with_limit().with_offset();
        let pipeline = TablePipeline::new(schema, caps).exploding("replies");
        let p = pipeline.plan(&QuerySpec::all().with_limit(1).with_offset(1)).unwrap();
        assert_eq!((p.remote.limit, p.remote.offset), (None, None));
        assert_eq!((p.local_limit, p.local_offset), (Some(1), Some(1)));

        let rows = pipeline
            .finish(&p, vec![json!({"id": "t1", "replies": [{"text": "a"}, {"text": "b"}, {"text": "c"}]})])
            .unwrap();
        assert_eq!(rows.column_values("replies.text"), vec![&json!("b")]);
    }

    #[test]
    fn registry_lists_lowercase_names() {
        assert_eq!(registry().names(), vec!["items"]);
    }
}
