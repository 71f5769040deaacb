//! Shaping raw remote payloads into rows with exactly the declared columns.

use log::debug;
use serde_json::Value;

use super::errors::{QueryError, QueryResult, json_kind};
use crate::models::{ColumnType, Record, TableSchema};

pub struct Unifier<'a> {
    schema: &'a TableSchema,
    explode: Option<String>,
}

impl<'a> Unifier<'a> {
    pub fn new(schema: &'a TableSchema) -> Self {
        Self { schema, explode: None }
    }

    /// Emit one row per element of the array under `field`, with the element's
    /// keys flattened to `field.key`.
    pub fn exploding(mut self, field: impl Into<String>) -> Self {
        self.explode = Some(field.into());
        self
    }

    pub fn unify(&self, records: Vec<Value>) -> QueryResult<Vec<Record>> {
        let received = records.len();
        let columns = self.schema.output_columns();
        let mut out = Vec::with_capacity(received);
        for (index, raw) in records.into_iter().enumerate() {
            let mut object = match raw {
                Value::Object(object) => object,
                other => {
                    return Err(QueryError::SchemaMismatch {
                        field: format!("{}[{}]", self.schema.table(), index),
                        expected: "object",
                        found: json_kind(&other).to_string(),
                    });
                }
            };
            let exploded = match &self.explode {
                Some(field) => Some((field.as_str(), self.explode_items(field, object.remove(field))?)),
                None => None,
            };
            let base = self.flatten(object);
            match exploded {
                None => out.push(self.project(&columns, base)?),
                Some((_, items)) if items.is_empty() => out.push(self.project(&columns, base)?),
                Some((field, items)) => {
                    for item in items {
                        let mut row = base.clone();
                        for (key, value) in item {
                            row.insert(format!("{field}.{key}"), value);
                        }
                        out.push(self.project(&columns, row)?);
                    }
                }
            }
        }
        debug!("unify[{}]: {} records -> {} rows", self.schema.table(), received, out.len());
        Ok(out)
    }

    fn explode_items(&self, field: &str, value: Option<Value>) -> QueryResult<Vec<Record>> {
        match value {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(o) => Ok(o),
                    other => Err(QueryError::schema_mismatch(field, "list of objects", &other)),
                })
                .collect(),
            Some(other) => Err(QueryError::schema_mismatch(field, "list of objects", &other)),
        }
    }

    /// One level: `{"source": {"title": ..}}` becomes `source.title`. Objects
    /// under a declared column stay whole, so `project` can type-check them.
    fn flatten(&self, object: Record) -> Record {
        let mut flat = Record::new();
        for (key, value) in object {
            match value {
                Value::Object(inner) if self.schema.column(&key).is_none() => {
                    for (inner_key, inner_value) in inner {
                        flat.insert(format!("{key}.{inner_key}"), inner_value);
                    }
                }
                other => {
                    flat.insert(key, other);
                }
            }
        }
        flat
    }

    fn project(&self, columns: &[String], mut flat: Record) -> QueryResult<Record> {
        let mut row = Record::new();
        for name in columns {
            let value = flat.remove(name).unwrap_or(Value::Null);
            if let Some(col) = self.schema.column(name)
                && is_scalar_type(col.ty)
                && (value.is_object() || value.is_array())
            {
                return Err(QueryError::schema_mismatch(name.as_str(), col.ty.as_str(), &value));
            }
            row.insert(name.clone(), value);
        }
        Ok(row)
    }
}

fn is_scalar_type(ty: ColumnType) -> bool {
    !matches!(ty, ColumnType::Json | ColumnType::Vector)
}
