use serde::{Deserialize, Serialize};

/// Declared type of a table column.
///
/// Residual filters and local sorting compare values according to the
/// declared type, never by whatever JSON type a remote API happened to send
/// (YouTube statistics arrive as strings, for instance).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Json,
    Vector,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Json => "json",
            ColumnType::Vector => "vector",
        }
    }

    /// Best-effort type of a sample value, used when a dataset has no declared schema.
    pub fn infer(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Bool(_) => ColumnType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => ColumnType::Integer,
            Value::Number(_) => ColumnType::Float,
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_number) => {
                ColumnType::Vector
            }
            Value::Array(_) | Value::Object(_) => ColumnType::Json,
            Value::String(_) | Value::Null => ColumnType::Text,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }

    pub fn is_ascending(&self) -> bool {
        matches!(self, SortDirection::Asc)
    }
}
