//! Milvus-style vector collections: metadata filters, similarity search,
//! INSERT and metadata-filtered DELETE.

use std::time::Duration;

use log::{debug, info};
use serde_json::{Value, json};

use crate::config::EngineConfig;
use crate::connection::{Connector, ScopedConnection};
use crate::models::{ColumnDef, ColumnType, Record, TableResult, TableSchema};
use crate::query_ast::{
    Capabilities, ConditionSet, FetchError, FilterDialect, Page, QueryError, QueryResult, QuerySpec, RemoteRequest,
    RemoteSource, TableHandler, TablePipeline, VectorExprDialect, translate,
};

pub const WINDOW_CEILING: u64 = 16384;
const STORE_FIELDS: [&str; 4] = ["id", "content", "embeddings", "metadata"];
/// Metadata keys live as dynamic top-level fields; `*` asks for all of them.
const DYNAMIC_FIELDS: &str = "*";
const RESERVED_FIELDS: [&str; 5] = ["id", "content", "embeddings", "metadata", "distance"];

/// One collection read, either a filtered scan or a nearest-neighbour search.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorQuery {
    pub collection: String,
    pub expr: Option<String>,
    pub vector: Option<Vec<f32>>,
    pub output_fields: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[async_trait::async_trait]
pub trait VectorClient: Send + Sync {
    /// Search hits carry a `distance` field next to the entity fields.
    async fn query(&self, query: &VectorQuery) -> Result<Vec<Value>, FetchError>;

    async fn insert(&self, collection: &str, rows: Vec<Record>) -> Result<u64, FetchError>;

    async fn delete(&self, collection: &str, expr: &str) -> Result<u64, FetchError>;
}

struct CollectionSource<'a, C: ?Sized> {
    client: &'a C,
    collection: &'a str,
}

#[async_trait::async_trait]
impl<C: VectorClient + ?Sized> RemoteSource for CollectionSource<'_, C> {
    async fn fetch(&self, request: &RemoteRequest, _token: Option<&str>) -> Result<Page, FetchError> {
        let mut output_fields: Vec<String> = Vec::new();
        for column in &request.columns {
            let head = match column.split('.').next().unwrap_or(column) {
                "metadata" => DYNAMIC_FIELDS,
                head if STORE_FIELDS.contains(&head) => head,
                _ => continue,
            };
            if !output_fields.iter().any(|f| f == head) {
                output_fields.push(head.to_string());
            }
        }
        if output_fields.is_empty() {
            output_fields = ["id", "content", "embeddings", DYNAMIC_FIELDS].map(String::from).to_vec();
        }
        let vector = request.similarity.as_ref().map(|s| s.vector.clone());
        if vector.is_some() && request.limit.is_none() {
            return Err(FetchError::Protocol("similarity search needs a limit".into()));
        }
        let query = VectorQuery {
            collection: self.collection.to_string(),
            expr: request.filter.as_ref().and_then(|f| f.as_expression()).map(str::to_string),
            vector,
            output_fields,
            limit: request.limit,
            offset: request.offset,
        };
        debug!("milvus[{}]: expr={:?} search={} limit={:?}", query.collection, query.expr, query.vector.is_some(), query.limit);
        let hits = self.client.query(&query).await?;
        Ok(Page::last(hits.into_iter().map(fold_metadata).collect()))
    }
}

fn collection_schema(collection: &str) -> TableSchema {
    TableSchema::new(
        collection,
        vec![
            ColumnDef::new("id", ColumnType::Integer),
            ColumnDef::new("content", ColumnType::Text),
            ColumnDef::new("embeddings", ColumnType::Vector),
            ColumnDef::new("metadata", ColumnType::Json),
            ColumnDef::new("distance", ColumnType::Float),
            ColumnDef::filter_only("search_vector", ColumnType::Vector),
        ],
    )
}

pub struct VectorStoreTable<C> {
    connector: C,
    pipeline: TablePipeline,
    dialect: VectorExprDialect,
}

impl<C> VectorStoreTable<C>
where
    C: Connector,
    C::Client: VectorClient,
{
    pub fn new(collection: &str, connector: C, config: &EngineConfig) -> Self {
        let dialect = VectorExprDialect::new("milvus", "metadata", "search_vector");
        let base = Capabilities::none()
            .with_filter()
            .with_limit()
            .with_offset()
            .with_window_ceiling(WINDOW_CEILING)
            .with_default_limit(config.default_limit);
        let capabilities = config.capabilities_for(collection, base);
        let pipeline = TablePipeline::new(collection_schema(collection), capabilities).with_dialect(dialect.clone());
        Self { connector, pipeline, dialect }
    }

    fn collection(&self) -> &str {
        self.pipeline.schema().table()
    }
}

/// `metadata` and `embeddings` may be given as JSON text in VALUES.
fn decode_json_text(column: &str, value: Value, expected: &'static str) -> QueryResult<Value> {
    match value {
        Value::String(text) => serde_json::from_str(&text)
            .map_err(|_| QueryError::schema_mismatch(column, expected, &Value::String(text))),
        other => Ok(other),
    }
}

/// Inserted metadata keys become top-level fields so filters can address them.
fn spread_metadata(out: &mut Record, metadata: Value) -> QueryResult<()> {
    let Value::Object(fields) = metadata else {
        return Ok(());
    };
    for (key, value) in fields {
        if RESERVED_FIELDS.contains(&key.as_str()) {
            return Err(QueryError::Invalid(format!("metadata key `{key}` clashes with a collection field")));
        }
        out.insert(key, value);
    }
    Ok(())
}

/// Collect a hit's dynamic fields (and any `$meta` bag) back under `metadata`.
fn fold_metadata(hit: Value) -> Value {
    let Value::Object(fields) = hit else {
        return hit;
    };
    let mut out = Record::new();
    let mut metadata = Record::new();
    for (key, value) in fields {
        if key == "metadata" || key == "$meta" {
            match value {
                Value::Object(inner) => metadata.extend(inner),
                Value::Null => {}
                other => {
                    out.insert(key, other);
                }
            }
        } else if RESERVED_FIELDS.contains(&key.as_str()) {
            out.insert(key, value);
        } else {
            metadata.insert(key, value);
        }
    }
    if !metadata.is_empty() {
        out.insert("metadata".into(), Value::Object(metadata));
    }
    Value::Object(out)
}

fn remote(source: FetchError) -> QueryError {
    QueryError::RemoteFetch { page: 0, offset: 0, source }
}

#[async_trait::async_trait]
impl<C> TableHandler for VectorStoreTable<C>
where
    C: Connector,
    C::Client: VectorClient,
{
    fn name(&self) -> &str {
        self.collection()
    }

    fn schema(&self) -> &TableSchema {
        self.pipeline.schema()
    }

    fn capabilities(&self) -> Capabilities {
        self.pipeline.capabilities().clone()
    }

    async fn select(&self, spec: &QuerySpec) -> QueryResult<TableResult> {
        let plan = self.pipeline.plan(spec)?;
        let conn = ScopedConnection::open(&self.connector).await?;
        let source = CollectionSource { client: &*conn, collection: self.collection() };
        self.pipeline.run_plan(&plan, &source).await
    }

    async fn insert(&self, rows: Vec<Record>) -> QueryResult<u64> {
        let mut prepared = Vec::with_capacity(rows.len());
        for row in rows {
            let mut out = Record::new();
            let mut metadata = None;
            for (column, value) in row {
                let value = match column.as_str() {
                    "distance" => {
                        return Err(QueryError::Invalid("distance is computed by the store and cannot be inserted".into()));
                    }
                    "metadata" => {
                        match decode_json_text(&column, value, "object")? {
                            v @ (Value::Object(_) | Value::Null) => metadata = Some(v),
                            other => return Err(QueryError::schema_mismatch(column.as_str(), "object", &other)),
                        }
                        continue;
                    }
                    "embeddings" => match decode_json_text(&column, value, "array of numbers")? {
                        v @ Value::Array(_) => v,
                        other => return Err(QueryError::schema_mismatch(column.as_str(), "array of numbers", &other)),
                    },
                    _ => value,
                };
                out.insert(column, value);
            }
            if let Some(metadata) = metadata {
                spread_metadata(&mut out, metadata)?;
            }
            prepared.push(out);
        }
        let conn = ScopedConnection::open(&self.connector).await?;
        let inserted = conn.insert(self.collection(), prepared).await.map_err(remote)?;
        info!("milvus[{}]: inserted {} rows", self.collection(), inserted);
        Ok(inserted)
    }

    async fn delete(&self, conditions: &ConditionSet) -> QueryResult<u64> {
        if conditions.on_column("id").next().is_some() {
            return Err(QueryError::UnsupportedFilter("deletion by id is not supported by this store".into()));
        }
        let translation = translate(conditions, &self.dialect)?;
        if !translation.residual.is_empty() || translation.similarity.is_some() {
            return Err(QueryError::UnsupportedFilter(format!(
                "DELETE accepts only metadata filters in {}",
                self.dialect.target()
            )));
        }
        let expr = translation
            .pushed
            .as_ref()
            .and_then(|f| f.as_expression())
            .ok_or_else(|| QueryError::Invalid("metadata filters are required for DELETE".into()))?;
        let conn = ScopedConnection::open(&self.connector).await?;
        let deleted = conn.delete(self.collection(), expr).await.map_err(remote)?;
        info!("milvus[{}]: deleted {} rows where {}", self.collection(), deleted, expr);
        Ok(deleted)
    }
}

/// Client for the Milvus RESTful API (`/v2/vectordb/entities/*`).
pub struct MilvusRestClient {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl MilvusRestClient {
    async fn post(&self, path: &str, body: Value) -> Result<Value, FetchError> {
        let mut req = self.http.post(format!("{}/v2/vectordb/entities/{}", self.endpoint, path)).json(&body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Transport(e.to_string())
            }
        })?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status { code: status.as_u16(), body });
        }
        let reply: Value = response.json().await.map_err(|e| FetchError::Decode(e.to_string()))?;
        match reply.get("code").and_then(Value::as_i64) {
            Some(0) | None => Ok(reply.get("data").cloned().unwrap_or(Value::Null)),
            Some(code) => Err(FetchError::Status {
                code: u16::try_from(code).unwrap_or(u16::MAX),
                body: reply.get("message").and_then(Value::as_str).unwrap_or_default().to_string(),
            }),
        }
    }
}

pub(crate) fn query_body(query: &VectorQuery) -> Value {
    let mut body = json!({
        "collectionName": query.collection,
        "outputFields": query.output_fields,
        "filter": query.expr.clone().unwrap_or_default(),
    });
    if let Some(vector) = &query.vector {
        body["data"] = json!([vector]);
        body["annsField"] = json!("embeddings");
    }
    if let Some(limit) = query.limit {
        body["limit"] = json!(limit);
    }
    if let Some(offset) = query.offset {
        body["offset"] = json!(offset);
    }
    body
}

fn count_in(data: &Value, key: &str) -> u64 {
    data.get(key).and_then(Value::as_u64).unwrap_or(0)
}

#[async_trait::async_trait]
impl VectorClient for MilvusRestClient {
    async fn query(&self, query: &VectorQuery) -> Result<Vec<Value>, FetchError> {
        let path = if query.vector.is_some() { "search" } else { "query" };
        match self.post(path, query_body(query)).await? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Err(FetchError::Decode(format!("expected a list of entities, got {other}"))),
        }
    }

    async fn insert(&self, collection: &str, rows: Vec<Record>) -> Result<u64, FetchError> {
        let data = self.post("insert", json!({"collectionName": collection, "data": rows})).await?;
        Ok(count_in(&data, "insertCount"))
    }

    async fn delete(&self, collection: &str, expr: &str) -> Result<u64, FetchError> {
        let data = self.post("delete", json!({"collectionName": collection, "filter": expr})).await?;
        Ok(count_in(&data, "deleteCount"))
    }
}

pub struct MilvusConnector {
    endpoint: String,
    token: Option<String>,
    timeout: Duration,
}

impl MilvusConnector {
    pub fn new(endpoint: impl Into<String>, token: Option<String>, config: &EngineConfig) -> Self {
        Self { endpoint: endpoint.into().trim_end_matches('/').to_string(), token, timeout: config.http_timeout() }
    }
}

#[async_trait::async_trait]
impl Connector for MilvusConnector {
    type Client = MilvusRestClient;

    fn target(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> QueryResult<MilvusRestClient> {
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| QueryError::Connection(e.to_string()))?;
        Ok(MilvusRestClient { http, endpoint: self.endpoint.clone(), token: self.token.clone() })
    }

    fn disconnect(&self, _client: &mut MilvusRestClient) {}
}
