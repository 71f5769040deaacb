//! Paginated retrieval from a remote collaborator.

use std::collections::HashSet;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use super::errors::{FetchError, QueryError, QueryResult};
use super::planner::RemoteRequest;

/// One page of raw remote records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Value>,
    pub next_token: Option<String>,
}

impl Page {
    pub fn last(records: Vec<Value>) -> Self {
        Self { records, next_token: None }
    }

    pub fn with_next(records: Vec<Value>, token: impl Into<String>) -> Self {
        Self { records, next_token: Some(token.into()) }
    }
}

#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch the page identified by `token` (`None` for the first page).
    async fn fetch(&self, request: &RemoteRequest, token: Option<&str>) -> Result<Page, FetchError>;
}

/// Drain every page of `request`, one after another.
///
/// Stops when the source returns no continuation token or once
/// `max_records` records are held. A failing page aborts the whole fetch and
/// nothing collected so far is returned.
pub async fn fetch_all<S>(source: &S, request: &RemoteRequest) -> QueryResult<Vec<Value>>
where
    S: RemoteSource + ?Sized,
{
    let mut records: Vec<Value> = Vec::new();
    let mut token: Option<String> = None;
    let mut seen: HashSet<String> = HashSet::new();
    let mut page = 0usize;

    loop {
        let offset = records.len() as u64;
        let fetched = source
            .fetch(request, token.as_deref())
            .await
            .map_err(|source| QueryError::RemoteFetch { page, offset, source })?;
        debug!(
            "fetch[{}]: page {} returned {} records (next={})",
            request.table,
            page,
            fetched.records.len(),
            fetched.next_token.is_some()
        );
        records.extend(fetched.records);

        if let Some(max) = request.max_records
            && records.len() as u64 >= max
        {
            records.truncate(max as usize);
            debug!("fetch[{}]: stopping at budget of {} records", request.table, max);
            break;
        }
        match fetched.next_token.filter(|t| !t.is_empty()) {
            None => break,
            Some(next) => {
                if !seen.insert(next.clone()) {
                    return Err(QueryError::RemoteFetch {
                        page,
                        offset: records.len() as u64,
                        source: FetchError::Protocol(format!("continuation token '{next}' returned twice")),
                    });
                }
                token = Some(next);
            }
        }
        page += 1;
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Serves pages by token; records which tokens were asked for.
    struct Scripted {
        pages: Vec<(Option<&'static str>, Result<Page, FetchError>)>,
        calls: Mutex<Vec<Option<String>>>,
    }

    impl Scripted {
        fn new(pages: Vec<(Option<&'static str>, Result<Page, FetchError>)>) -> Self {
            Self { pages, calls: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl RemoteSource for Scripted {
        async fn fetch(&self, _request: &RemoteRequest, token: Option<&str>) -> Result<Page, FetchError> {
            self.calls.lock().unwrap().push(token.map(str::to_string));
            let (_, page) = self.pages.iter().find(|(t, _)| *t == token).expect("unexpected token");
            match page {
                Ok(p) => Ok(p.clone()),
                Err(FetchError::RateLimited) => Err(FetchError::RateLimited),
                Err(e) => Err(FetchError::Transport(e.to_string())),
            }
        }
    }

    fn request() -> RemoteRequest {
        RemoteRequest { table: "t".into(), ..RemoteRequest::default() }
    }

    #[tokio::test]
    async fn follows_tokens_until_exhausted() {
        let src = Scripted::new(vec![
            (None, Ok(Page::with_next(vec![json!(1), json!(2)], "p2"))),
            (Some("p2"), Ok(Page::with_next(vec![json!(3)], "p3"))),
            (Some("p3"), Ok(Page::last(vec![json!(4)]))),
        ]);
        let records = fetch_all(&src, &request()).await.unwrap();
        assert_eq!(records, vec![json!(1), json!(2), json!(3), json!(4)]);
        assert_eq!(src.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn budget_stops_early_and_truncates() {
        let src = Scripted::new(vec![
            (None, Ok(Page::with_next(vec![json!(1), json!(2)], "p2"))),
            (Some("p2"), Ok(Page::with_next(vec![json!(3), json!(4)], "p3"))),
        ]);
        let req = RemoteRequest { max_records: Some(3), ..request() };
        let records = fetch_all(&src, &req).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(src.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn page_failure_discards_everything() {
        let src = Scripted::new(vec![
            (None, Ok(Page::with_next(vec![json!(1)], "p2"))),
            (Some("p2"), Err(FetchError::RateLimited)),
        ]);
        let err = fetch_all(&src, &request()).await.unwrap_err();
        match err {
            QueryError::RemoteFetch { page, offset, source: FetchError::RateLimited } => {
                assert_eq!((page, offset), (1, 1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeated_token_is_protocol_error() {
        let src = Scripted::new(vec![
            (None, Ok(Page::with_next(vec![json!(1)], "again"))),
            (Some("again"), Ok(Page::with_next(vec![json!(2)], "again"))),
        ]);
        let err = fetch_all(&src, &request()).await.unwrap_err();
        assert!(matches!(err, QueryError::RemoteFetch { source: FetchError::Protocol(_), .. }));
    }

    #[tokio::test]
    async fn empty_token_ends_pagination() {
        let src = Scripted::new(vec![(None, Ok(Page::with_next(vec![json!(1)], "")))]);
        assert_eq!(fetch_all(&src, &request()).await.unwrap().len(), 1);
    }
}
