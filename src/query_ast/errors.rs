use super::condition::Operator;

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("unsupported statement: {0}")]
    UnsupportedStatement(String),
    #[error("unsupported filter: {0}")]
    UnsupportedFilter(String),
    #[error("operator '{op}' is not supported on column '{column}' by {target}")]
    UnsupportedOperator {
        op: Operator,
        column: String,
        target: String,
    },
    #[error("unknown column '{column}' in {context}")]
    UnknownColumn { column: String, context: &'static str },
    #[error("limit {limit} + offset {offset} must be less than {ceiling}")]
    WindowOutOfRange { limit: u64, offset: u64, ceiling: u64 },
    #[error("remote fetch failed on page {page} (after {offset} records): {source}")]
    RemoteFetch {
        page: usize,
        offset: u64,
        #[source]
        source: FetchError,
    },
    #[error("schema mismatch on '{field}': expected {expected}, found {found}")]
    SchemaMismatch {
        field: String,
        expected: &'static str,
        found: String,
    },
    #[error("invalid query: {0}")]
    Invalid(String),
    #[error("connection error: {0}")]
    Connection(String),
}

/// Failure reported by a remote collaborator. Never retried by this crate.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("status {code}: {body}")]
    Status { code: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("timed out")]
    Timeout,
    #[error("decode: {0}")]
    Decode(String),
    #[error("protocol: {0}")]
    Protocol(String),
}

impl QueryError {
    pub(crate) fn schema_mismatch(field: impl Into<String>, expected: &'static str, found: &serde_json::Value) -> Self {
        QueryError::SchemaMismatch {
            field: field.into(),
            expected,
            found: json_kind(found).to_string(),
        }
    }
}

pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl From<sqlparser::parser::ParserError> for QueryError {
    fn from(e: sqlparser::parser::ParserError) -> Self {
        QueryError::Parse(e.to_string())
    }
}
