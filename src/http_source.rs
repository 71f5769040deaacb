//! Paginated JSON-over-HTTP source for REST APIs.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use crate::query_ast::{FetchError, Page, RemoteRequest, RemoteSource};

/// How the continuation token is handed back to the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Sent as a query parameter, e.g. `pageToken`.
    Param(String),
    /// The token is the complete URL of the next page.
    Url,
}

#[derive(Debug, Clone)]
pub struct HttpJsonSource {
    client: reqwest::Client,
    endpoint: String,
    fixed_params: Vec<(String, String)>,
    items_pointer: String,
    next_pointer: Option<String>,
    continuation: Continuation,
    limit_param: Option<String>,
}

impl HttpJsonSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("sqlbridge/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            fixed_params: Vec::new(),
            items_pointer: "/items".into(),
            next_pointer: None,
            continuation: Continuation::Url,
            limit_param: None,
        })
    }

    /// Parameter sent with every first-page request (API keys, `part=...`).
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fixed_params.push((name.into(), value.into()));
        self
    }

    /// JSON pointer of the record array in a response body.
    pub fn items_at(mut self, pointer: impl Into<String>) -> Self {
        self.items_pointer = pointer.into();
        self
    }

    pub fn next_token_at(mut self, pointer: impl Into<String>, continuation: Continuation) -> Self {
        self.next_pointer = Some(pointer.into());
        self.continuation = continuation;
        self
    }

    /// Parameter that carries a pushed limit as the page size.
    pub fn limit_param(mut self, name: impl Into<String>) -> Self {
        self.limit_param = Some(name.into());
        self
    }

    fn query_params(&self, request: &RemoteRequest, token: Option<&str>) -> Vec<(String, String)> {
        let mut params = self.fixed_params.clone();
        if let Some(filter) = &request.filter {
            params.extend(filter.params().iter().cloned());
        }
        if let (Some(name), Some(limit)) = (&self.limit_param, request.limit) {
            params.push((name.clone(), limit.to_string()));
        }
        if let (Continuation::Param(name), Some(token)) = (&self.continuation, token) {
            params.push((name.clone(), token.to_string()));
        }
        params
    }

    fn extract_page(&self, body: &Value) -> Result<Page, FetchError> {
        let records = match body.pointer(&self.items_pointer) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(FetchError::Decode(format!("expected an array at '{}'", self.items_pointer)));
            }
        };
        let next_token = self
            .next_pointer
            .as_deref()
            .and_then(|p| body.pointer(p))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Page { records, next_token })
    }
}

#[async_trait]
impl RemoteSource for HttpJsonSource {
    async fn fetch(&self, request: &RemoteRequest, token: Option<&str>) -> Result<Page, FetchError> {
        let builder = match (&self.continuation, token) {
            (Continuation::Url, Some(next_url)) => self.client.get(next_url),
            _ => self.client.get(&self.endpoint).query(&self.query_params(request, token)),
        };
        let response = builder.send().await.map_err(|e| {
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
        let body: Value = response.json().await.map_err(|e| FetchError::Decode(e.to_string()))?;
        let page = self.extract_page(&body)?;
        debug!("GET {}: {} records", self.endpoint, page.records.len());
        Ok(page)
    }
}
