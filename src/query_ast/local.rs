//! Client-side completion of a plan: residual filters, ordering, the
//! offset/limit window, and projection, applied in that order.

use std::cmp::Ordering;

use chrono::DateTime;
use log::debug;
use regex::Regex;
use serde_json::Value;

use super::condition::{Condition, Operand, Operator};
use super::errors::{QueryError, QueryResult};
use super::logical::OrderBy;
use super::planner::ExecutionPlan;
use crate::models::{ColumnType, Record, TableResult, TableSchema};

pub fn execute(rows: Vec<Record>, plan: &ExecutionPlan, schema: &TableSchema) -> QueryResult<TableResult> {
    let fetched = rows.len();
    let filters = plan
        .residual
        .iter()
        .map(|c| CompiledCondition::compile(c, schema))
        .collect::<QueryResult<Vec<_>>>()?;

    let mut rows: Vec<Record> = rows.into_iter().filter(|row| filters.iter().all(|f| f.matches(row))).collect();
    let kept = rows.len();

    if !plan.local_sort.is_empty() {
        let keys: Vec<(&OrderBy, ColumnType)> = plan
            .local_sort
            .iter()
            .map(|o| (o, schema.resolve(&o.column).unwrap_or(ColumnType::Json)))
            .collect();
        rows.sort_by(|a, b| compare_rows(a, b, &keys));
    }

    let offset = plan.local_offset.map_or(0, |o| o as usize);
    let limit = plan.local_limit.map_or(usize::MAX, |l| l as usize);
    let columns = plan.output_names();
    let out: Vec<Record> = rows
        .iter()
        .skip(offset)
        .take(limit)
        .map(|row| {
            plan.output
                .iter()
                .map(|c| (c.output_name().to_string(), lookup(row, &c.name).cloned().unwrap_or(Value::Null)))
                .collect()
        })
        .collect();

    debug!("local[{}]: fetched={} filtered={} returned={}", schema.table(), fetched, kept, out.len());
    Ok(TableResult::new(columns, out))
}

/// Value at a possibly dotted path. An exact key wins over descending into
/// a nested object.
pub fn lookup<'a>(row: &'a Record, path: &str) -> Option<&'a Value> {
    if let Some(v) = row.get(path) {
        return Some(v);
    }
    let (head, rest) = path.split_once('.')?;
    match row.get(head)? {
        Value::Object(inner) => lookup(inner, rest),
        _ => None,
    }
}

struct CompiledCondition<'a> {
    condition: &'a Condition,
    ty: ColumnType,
    pattern: Option<Regex>,
}

impl<'a> CompiledCondition<'a> {
    fn compile(condition: &'a Condition, schema: &TableSchema) -> QueryResult<Self> {
        let ty = schema.require(condition.column(), "filter")?;
        for value in condition.value().values() {
            check_literal(condition.column(), ty, value)?;
        }
        let pattern = match (condition.op(), condition.value()) {
            (Operator::Like | Operator::NotLike, Operand::Scalar(Value::String(p))) => Some(like_regex(p)?),
            (Operator::Like | Operator::NotLike, Operand::Scalar(other)) => {
                return Err(QueryError::schema_mismatch(condition.column(), "string pattern", other));
            }
            _ => None,
        };
        Ok(Self { condition, ty, pattern })
    }

    fn matches(&self, row: &Record) -> bool {
        let value = match lookup(row, self.condition.column()) {
            None | Some(Value::Null) => return false,
            Some(v) => v,
        };
        let cmp = |literal: &Value| compare(value, literal, self.ty);
        match (self.condition.op(), self.condition.value()) {
            (Operator::Eq, Operand::Scalar(v)) => cmp(v) == Some(Ordering::Equal),
            (Operator::NotEq, Operand::Scalar(v)) => cmp(v).is_some_and(|o| o != Ordering::Equal),
            (Operator::Lt, Operand::Scalar(v)) => cmp(v) == Some(Ordering::Less),
            (Operator::LtEq, Operand::Scalar(v)) => cmp(v).is_some_and(|o| o != Ordering::Greater),
            (Operator::Gt, Operand::Scalar(v)) => cmp(v) == Some(Ordering::Greater),
            (Operator::GtEq, Operand::Scalar(v)) => cmp(v).is_some_and(|o| o != Ordering::Less),
            (Operator::In, operand) => operand.values().iter().any(|v| cmp(v) == Some(Ordering::Equal)),
            (Operator::NotIn, operand) => operand
                .values()
                .iter()
                .all(|v| cmp(v).is_some_and(|o| o != Ordering::Equal)),
            (Operator::Like, _) => self.like(value),
            (Operator::NotLike, _) => !self.like(value),
            (_, Operand::List(_)) => false,
        }
    }

    fn like(&self, value: &Value) -> bool {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.pattern.as_ref().is_some_and(|re| re.is_match(&text))
    }
}

fn check_literal(column: &str, ty: ColumnType, value: &Value) -> QueryResult<()> {
    if value.is_null() {
        return Ok(());
    }
    let ok = match ty {
        ColumnType::Integer | ColumnType::Float => as_number(value).is_some(),
        ColumnType::Boolean => as_bool(value).is_some(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(QueryError::schema_mismatch(column, ty.as_str(), value))
    }
}

/// SQL LIKE as an anchored regex: `%` is any run, `_` any single character.
pub(crate) fn like_regex(pattern: &str) -> QueryResult<Regex> {
    let mut out = String::from("(?s)^");
    for ch in pattern.chars() {
        match ch {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| QueryError::Invalid(format!("bad LIKE pattern '{pattern}': {e}")))
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compare under the column's declared type. `None` means incomparable
/// (including any NULL), which every predicate treats as false.
fn compare(a: &Value, b: &Value, ty: ColumnType) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    match ty {
        ColumnType::Integer | ColumnType::Float => as_number(a)?.partial_cmp(&as_number(b)?),
        ColumnType::Boolean => Some(as_bool(a)?.cmp(&as_bool(b)?)),
        ColumnType::Timestamp => {
            let (x, y) = (as_text(a), as_text(b));
            match (DateTime::parse_from_rfc3339(&x), DateTime::parse_from_rfc3339(&y)) {
                (Ok(x), Ok(y)) => Some(x.cmp(&y)),
                _ => Some(x.cmp(&y)),
            }
        }
        ColumnType::Text => Some(as_text(a).cmp(&as_text(b))),
        ColumnType::Json | ColumnType::Vector => compare_dynamic(a, b),
    }
}

fn compare_dynamic(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_))
        | (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_)) => as_number(a)?.partial_cmp(&as_number(b)?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Bool(_) => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Array(_) => 3,
        Value::Object(_) => 4,
        Value::Null => 5,
    }
}

/// Multi-key ordering; NULLs sort last in both directions.
fn compare_rows(a: &Record, b: &Record, keys: &[(&OrderBy, ColumnType)]) -> Ordering {
    for (order, ty) in keys {
        let x = lookup(a, &order.column).unwrap_or(&Value::Null);
        let y = lookup(b, &order.column).unwrap_or(&Value::Null);
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {
                let ord = compare(x, y, *ty)
                    .unwrap_or_else(|| type_rank(x).cmp(&type_rank(y)).then_with(|| as_text(x).cmp(&as_text(y))));
                if order.direction.is_ascending() { ord } else { ord.reverse() }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
