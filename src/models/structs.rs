use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::enums::ColumnType;
use crate::query_ast::errors::{QueryError, QueryResult};

/// One row keyed by column name. Insertion order is preserved (`preserve_order`).
pub type Record = serde_json::Map<String, Value>;

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    /// Accepted in WHERE (pushed to the remote API) but never returned as data.
    #[serde(default)]
    pub filter_only: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self { name: name.into(), ty, filter_only: false }
    }

    pub fn filter_only(name: impl Into<String>, ty: ColumnType) -> Self {
        Self { name: name.into(), ty, filter_only: true }
    }
}

/// Declared column set of a table, in canonical order.
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct TableSchema {
    table: String,
    columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self { table: table.into(), columns }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns returned by `SELECT *`, in declared order.
    pub fn output_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !c.filter_only)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn is_output_column(&self, name: &str) -> bool {
        self.column(name).is_some_and(|c| !c.filter_only)
    }

    pub fn is_filter_only(&self, name: &str) -> bool {
        self.column(name).is_some_and(|c| c.filter_only)
    }

    /// Resolve a possibly dotted column path.
    ///
    /// Exact names win (`replies.user_id` is a flat column of its own). A
    /// dotted path whose head is a declared JSON column addresses a field of
    /// that document, e.g. `metadata.price`.
    pub fn resolve(&self, path: &str) -> Option<ColumnType> {
        if let Some(col) = self.column(path) {
            return Some(col.ty);
        }
        let (head, _) = path.split_once('.')?;
        match self.column(head) {
            Some(col) if col.ty == ColumnType::Json => Some(ColumnType::Json),
            _ => None,
        }
    }

    pub fn require(&self, path: &str, context: &'static str) -> QueryResult<ColumnType> {
        self.resolve(path).ok_or_else(|| QueryError::UnknownColumn {
            column: path.to_string(),
            context,
        })
    }

    /// Build a schema from already-flat records: union of keys in first-seen
    /// order, typed from the first non-null value.
    pub fn infer(table: impl Into<String>, records: &[Record]) -> Self {
        let mut columns: Vec<ColumnDef> = Vec::new();
        for record in records {
            for (key, value) in record {
                match columns.iter_mut().find(|c| &c.name == key) {
                    Some(existing) => {
                        if existing.ty == ColumnType::Text && !value.is_null() && !value.is_string() {
                            existing.ty = ColumnType::infer(value);
                        }
                    }
                    None => columns.push(ColumnDef::new(key.clone(), ColumnType::infer(value))),
                }
            }
        }
        Self::new(table, columns)
    }
}

/// Unified tabular output. Every row carries exactly `columns`, in order.
#[derive(Clone, PartialEq, Serialize, Debug, Default)]
pub struct TableResult {
    columns: Vec<String>,
    rows: Vec<Record>,
}

impl TableResult {
    pub(crate) fn new(columns: Vec<String>, rows: Vec<Record>) -> Self {
        debug_assert!(rows.iter().all(|r| r.keys().eq(columns.iter())));
        Self { columns, rows }
    }

    pub fn empty(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All values of one column, top to bottom. Unknown columns yield nulls.
    pub fn column_values(&self, name: &str) -> Vec<&Value> {
        self.rows
            .iter()
            .map(|r| r.get(name).unwrap_or(&Value::Null))
            .collect()
    }

    pub fn into_rows(self) -> Vec<Record> {
        self.rows
    }
}
