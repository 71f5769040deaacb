//! Tables over an already-fetched JSON dataset.

use std::fs;
use std::path::Path;

use log::info;
use serde_json::Value;

use crate::models::{Record, TableSchema};
use crate::query_ast::{ApiTable, Capabilities, FetchError, Page, QueryError, QueryResult, RemoteRequest, RemoteSource, TablePipeline};

/// Serves its records as a single page.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: Vec<Value>,
}

impl MemorySource {
    pub fn new(records: Vec<Value>) -> Self {
        Self { records }
    }
}

#[async_trait::async_trait]
impl RemoteSource for MemorySource {
    async fn fetch(&self, _request: &RemoteRequest, _token: Option<&str>) -> Result<Page, FetchError> {
        Ok(Page::last(self.records.clone()))
    }
}

pub type JsonTable = ApiTable<MemorySource>;

/// Dataset table with a declared schema, or one inferred from the records.
pub fn json_table(records: Vec<Value>, schema: Option<TableSchema>, name: &str) -> QueryResult<JsonTable> {
    let schema = match schema {
        Some(s) => s,
        None => {
            let objects = records
                .iter()
                .enumerate()
                .map(|(i, r)| match r {
                    Value::Object(o) => Ok(o.clone()),
                    other => Err(QueryError::SchemaMismatch {
                        field: format!("{name}[{i}]"),
                        expected: "object",
                        found: crate::query_ast::errors::json_kind(other).to_string(),
                    }),
                })
                .collect::<QueryResult<Vec<Record>>>()?;
            TableSchema::infer(name, &objects)
        }
    };
    Ok(ApiTable::new(TablePipeline::new(schema, Capabilities::none()), MemorySource::new(records)))
}

/// Read a JSON array or JSON-lines file and register it under its file stem.
pub fn load_json_table(path: &Path) -> QueryResult<JsonTable> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| QueryError::Invalid(format!("cannot name a table after {}", path.display())))?;
    let text = fs::read_to_string(path).map_err(|e| QueryError::Connection(format!("{}: {e}", path.display())))?;
    let records = parse_records(&text)?;
    info!("Loaded {} records from {} as table '{}'", records.len(), path.display(), name);
    json_table(records, None, name)
}

fn parse_records(text: &str) -> QueryResult<Vec<Value>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| QueryError::Invalid(format!("bad JSON dataset: {e}")));
    }
    trimmed
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|e| QueryError::Invalid(format!("bad JSON on line {}: {e}", n + 1)))
        })
        .collect()
}
