use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use sqlbridge::config::{CapabilityOverrides, EngineConfig};
use sqlbridge::connection::Connector;
use sqlbridge::handlers::{ChannelsTable, CommentsTable, VectorClient, VectorQuery, VectorStoreTable, VideosTable, news_table};
use sqlbridge::models::Record;
use sqlbridge::query_ast::{
    FetchError, HandlerRegistry, Page, QueryError, QueryResult, RemoteRequest, RemoteSource, StatementOutcome,
    execute_sql,
};

/// Pages keyed by continuation token; remembers every request it saw.
struct PagedSource {
    pages: Vec<(Option<&'static str>, Page)>,
    seen: Mutex<Vec<RemoteRequest>>,
}

impl PagedSource {
    fn new(pages: Vec<(Option<&'static str>, Page)>) -> Self {
        Self { pages, seen: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl RemoteSource for PagedSource {
    async fn fetch(&self, request: &RemoteRequest, token: Option<&str>) -> Result<Page, FetchError> {
        self.seen.lock().unwrap().push(request.clone());
        self.pages
            .iter()
            .find(|(t, _)| *t == token)
            .map(|(_, p)| p.clone())
            .ok_or_else(|| FetchError::Protocol(format!("no page for {token:?}")))
    }
}

/// Lets a test keep a handle on the source after registering its table.
struct SharedSource(Arc<PagedSource>);

#[async_trait]
impl RemoteSource for SharedSource {
    async fn fetch(&self, request: &RemoteRequest, token: Option<&str>) -> Result<Page, FetchError> {
        self.0.fetch(request, token).await
    }
}

fn thread(id: &str, replies: Value) -> Value {
    json!({
        "snippet": {
            "channelId": "ch1",
            "videoId": "vid1",
            "topLevelComment": {"snippet": {
                "authorChannelId": {"value": format!("author-{id}")},
                "authorDisplayName": format!("Author {id}"),
                "textDisplay": format!("comment {id}")
            }}
        },
        "replies": replies
    })
}

fn reply(user: &str, text: &str) -> Value {
    json!({"snippet": {"authorChannelId": {"value": user}, "authorDisplayName": user.to_uppercase(), "textOriginal": text}})
}

fn rows(outcome: &StatementOutcome) -> &[Record] {
    outcome.rows().expect("rows").rows()
}

#[tokio::test]
async fn comments_explode_replies_across_pages() {
    let source = PagedSource::new(vec![
        (None, Page::with_next(vec![thread("1", json!({"comments": [reply("u1", "a"), reply("u2", "b")]}))], "p2")),
        (Some("p2"), Page::last(vec![thread("2", Value::Null)])),
    ]);
    let mut registry = HandlerRegistry::new();
    registry.register(Box::new(CommentsTable::new(source, &EngineConfig::default())));

    let out = execute_sql(
        "SELECT comment, replies.user_id, replies.reply FROM comments WHERE video_id = 'vid1'",
        &registry,
    )
    .await
    .expect("ok");
    let got = rows(&out);
    assert_eq!(got.len(), 3);
    assert_eq!(got[0]["replies.user_id"], json!("u1"));
    assert_eq!(got[1]["replies.reply"], json!("b"));
    assert_eq!(got[2]["comment"], json!("comment 2"));
    assert_eq!(got[2]["replies.user_id"], Value::Null);
}

#[tokio::test]
async fn comments_push_video_id_and_filter_the_rest_locally() {
    let source = PagedSource::new(vec![(
        None,
        Page::last(vec![thread("1", json!({"comments": [reply("u1", "keep"), reply("u2", "drop")]}))]),
    )]);
    let table = CommentsTable::new(source, &EngineConfig::default());
    let mut registry = HandlerRegistry::new();
    registry.register(Box::new(table));

    let out = execute_sql(
        "SELECT replies.reply FROM comments WHERE video_id = 'vid1' AND replies.user_id = 'u1'",
        &registry,
    )
    .await
    .expect("ok");
    assert_eq!(rows(&out).len(), 1);
    assert_eq!(rows(&out)[0]["replies.reply"], json!("keep"));
}

#[tokio::test]
async fn comments_need_a_target_and_only_equality() {
    let mut registry = HandlerRegistry::new();
    registry.register(Box::new(CommentsTable::new(PagedSource::new(vec![]), &EngineConfig::default())));
    let err = execute_sql("SELECT * FROM comments", &registry).await.unwrap_err();
    assert!(matches!(err, QueryError::Invalid(_)));
    let err = execute_sql("SELECT * FROM comments WHERE video_id != 'x'", &registry).await.unwrap_err();
    assert!(matches!(err, QueryError::UnsupportedOperator { .. }));
}

#[tokio::test]
async fn videos_shape_statistics_and_duration() {
    let source = PagedSource::new(vec![(
        None,
        Page::last(vec![json!({
            "id": "v9",
            "snippet": {"channelTitle": "Chan", "title": "Talk", "publishedAt": "2024-05-01T10:00:00Z"},
            "statistics": {"viewCount": "1500", "likeCount": "20", "commentCount": "3"},
            "contentDetails": {"duration": "PT1H5M9S"}
        })]),
    )]);
    let mut registry = HandlerRegistry::new();
    registry.register(Box::new(VideosTable::new(source, &EngineConfig::default())));
    let out = execute_sql(
        "SELECT title, view_count, duration_str FROM videos WHERE video_id = 'v9' AND view_count > 1000",
        &registry,
    )
    .await
    .expect("ok");
    assert_eq!(Value::Object(rows(&out)[0].clone()), json!({"title": "Talk", "view_count": 1500, "duration_str": "1:5:9"}));
}

#[tokio::test]
async fn comments_window_counts_exploded_rows() {
    let config = EngineConfig {
        targets: HashMap::from([(
            "comments".to_string(),
            CapabilityOverrides { limit: Some(true), offset: Some(true), ..Default::default() },
        )]),
        ..EngineConfig::default()
    };
    let source = PagedSource::new(vec![(
        None,
        Page::last(vec![thread("1", json!({"comments": [reply("u1", "a"), reply("u2", "b"), reply("u3", "c")]}))]),
    )]);
    let mut registry = HandlerRegistry::new();
    registry.register(Box::new(CommentsTable::new(source, &config)));

    let out = execute_sql("SELECT replies.reply FROM comments WHERE video_id = 'vid1' LIMIT 2 OFFSET 1", &registry)
        .await
        .expect("ok");
    let replies: Vec<&Value> = rows(&out).iter().map(|r| &r["replies.reply"]).collect();
    assert_eq!(replies, vec![&json!("b"), &json!("c")]);
}

#[tokio::test]
async fn channels_push_channel_id_and_shape_statistics() {
    let source = Arc::new(PagedSource::new(vec![(
        None,
        Page::last(vec![json!({
            "id": "UC7",
            "snippet": {"title": "Chan", "country": "ID", "publishedAt": "2016-01-01T00:00:00Z"},
            "statistics": {"subscriberCount": "12000", "videoCount": "40", "viewCount": "900000"}
        })]),
    )]));
    let mut registry = HandlerRegistry::new();
    registry.register(Box::new(ChannelsTable::new(SharedSource(source.clone()), &EngineConfig::default())));

    let out = execute_sql(
        "SELECT title, subscriber_count FROM channels WHERE channel_id = 'UC7' AND video_count > 10",
        &registry,
    )
    .await
    .expect("ok");
    assert_eq!(Value::Object(rows(&out)[0].clone()), json!({"title": "Chan", "subscriber_count": 12000}));
    let seen = source.seen.lock().unwrap();
    let params = seen[0].filter.as_ref().map(|f| f.params().to_vec()).unwrap_or_default();
    assert_eq!(params, vec![("id".to_string(), "UC7".to_string())]);
}

#[tokio::test]
async fn channels_need_an_equality_on_channel_id() {
    let mut registry = HandlerRegistry::new();
    registry.register(Box::new(ChannelsTable::new(PagedSource::new(vec![]), &EngineConfig::default())));
    let err = execute_sql("SELECT * FROM channels WHERE title = 'x'", &registry).await.unwrap_err();
    assert!(matches!(err, QueryError::Invalid(_)));
    let err = execute_sql("SELECT * FROM channels WHERE channel_id > 'x'", &registry).await.unwrap_err();
    assert!(matches!(err, QueryError::UnsupportedOperator { .. }));
}

#[tokio::test]
async fn news_flattens_nested_objects_and_stops_at_limit() {
    let post = |id: i64| {
        json!({"id": id, "kind": "news", "title": format!("post {id}"),
               "source": {"title": "Desk", "region": "en"}, "votes": {"positive": id * 2}})
    };
    let source = PagedSource::new(vec![
        (None, Page::with_next(vec![post(1), post(2)], "page2")),
        (Some("page2"), Page::with_next(vec![post(3), post(4)], "page3")),
    ]);
    let table = news_table(source, &EngineConfig::default());
    let out = sqlbridge::query_ast::TableHandler::select(
        &table,
        &sqlbridge::query_ast::QuerySpec::all().with_columns(["id", "source.title", "votes.positive"]).with_limit(3),
    )
    .await
    .expect("ok");
    assert_eq!(out.len(), 3);
    assert_eq!(out.rows()[2]["votes.positive"], json!(6));
    assert_eq!(out.rows()[0]["source.title"], json!("Desk"));
    assert_eq!(table.source().seen.lock().unwrap().len(), 2);
}

#[derive(Default)]
struct FakeStore {
    queries: Mutex<Vec<VectorQuery>>,
    inserted: Mutex<Vec<Record>>,
    deleted: Mutex<Vec<String>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// The connected client: a handle on the shared fake store.
struct StoreHandle(Arc<FakeStore>);

#[async_trait]
impl VectorClient for StoreHandle {
    async fn query(&self, query: &VectorQuery) -> Result<Vec<Value>, FetchError> {
        self.0.queries.lock().unwrap().push(query.clone());
        let mut hits = vec![
            json!({"id": 1, "content": "alpha", "metadata": {"price": 500, "tag": "a"}}),
            json!({"id": 2, "content": "beta", "metadata": {"price": 800, "tag": "b"}}),
        ];
        if query.vector.is_some() {
            hits[0]["distance"] = json!(0.25);
            hits[1]["distance"] = json!(0.75);
        }
        Ok(hits)
    }

    async fn insert(&self, _collection: &str, rows: Vec<Record>) -> Result<u64, FetchError> {
        let n = rows.len() as u64;
        self.0.inserted.lock().unwrap().extend(rows);
        Ok(n)
    }

    async fn delete(&self, _collection: &str, expr: &str) -> Result<u64, FetchError> {
        self.0.deleted.lock().unwrap().push(expr.to_string());
        Ok(1)
    }
}

struct FakeConnector(Arc<FakeStore>);

#[async_trait]
impl Connector for FakeConnector {
    type Client = StoreHandle;

    fn target(&self) -> &str {
        "fake-milvus"
    }

    async fn connect(&self) -> QueryResult<StoreHandle> {
        self.0.opened.fetch_add(1, Ordering::SeqCst);
        Ok(StoreHandle(self.0.clone()))
    }

    fn disconnect(&self, _client: &mut StoreHandle) {
        self.0.closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn vector_registry() -> (HandlerRegistry, Arc<FakeStore>) {
    let store = Arc::new(FakeStore::default());
    let mut registry = HandlerRegistry::new();
    registry.register(Box::new(VectorStoreTable::new("docs", FakeConnector(store.clone()), &EngineConfig::default())));
    (registry, store)
}

#[tokio::test]
async fn vector_metadata_filter_and_window_are_pushed() {
    let (registry, store) = vector_registry();
    execute_sql(
        "SELECT id, content FROM docs WHERE metadata.price < 1000 AND metadata.price > 300 LIMIT 10 OFFSET 5",
        &registry,
    )
    .await
    .expect("ok");
    let q = store.queries.lock().unwrap()[0].clone();
    assert_eq!(q.expr.as_deref(), Some("(price < 1000) and (price > 300)"));
    assert_eq!((q.limit, q.offset), (Some(10), Some(5)));
    assert_eq!(q.output_fields, vec!["id", "content"]);
    assert_eq!(store.opened.load(Ordering::SeqCst), 1);
    assert_eq!(store.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn vector_similarity_search_uses_default_limit_and_returns_distance() {
    let (registry, store) = vector_registry();
    let out = execute_sql(
        "SELECT id, distance FROM docs WHERE search_vector = '[0.1, 0.2]' ORDER BY distance",
        &registry,
    )
    .await
    .expect("ok");
    let q = store.queries.lock().unwrap()[0].clone();
    assert_eq!(q.vector, Some(vec![0.1, 0.2]));
    assert_eq!(q.limit, Some(100));
    assert_eq!(rows(&out)[0]["distance"], json!(0.25));
}

#[tokio::test]
async fn vector_window_ceiling_is_enforced_before_connecting() {
    let (registry, store) = vector_registry();
    let err = execute_sql("SELECT * FROM docs LIMIT 16000 OFFSET 384", &registry).await.unwrap_err();
    assert!(matches!(err, QueryError::WindowOutOfRange { ceiling: 16384, .. }));
    assert!(store.queries.lock().unwrap().is_empty());
    assert_eq!(store.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn vector_insert_decodes_json_text() {
    let (registry, store) = vector_registry();
    let out = execute_sql(
        "INSERT INTO docs (id, content, metadata) VALUES (7, 'gamma', '{\"tag\": \"c\"}')",
        &registry,
    )
    .await
    .expect("ok");
    assert_eq!(out, StatementOutcome::Affected(1));
    let inserted = store.inserted.lock().unwrap()[0].clone();
    assert_eq!(Value::Object(inserted), json!({"id": 7, "content": "gamma", "tag": "c"}));
}

/// A collection that keeps inserted rows and understands `(field == literal)`.
#[derive(Default)]
struct MemoryStore {
    rows: Mutex<Vec<Record>>,
}

impl MemoryStore {
    fn matches(row: &Record, expr: &str) -> bool {
        let inner = expr.trim_start_matches('(').trim_end_matches(')');
        match inner.split_once(" == ") {
            Some((field, literal)) => row.get(field).is_some_and(|v| v.to_string() == literal),
            None => false,
        }
    }
}

struct MemoryHandle(Arc<MemoryStore>);

#[async_trait]
impl VectorClient for MemoryHandle {
    async fn query(&self, query: &VectorQuery) -> Result<Vec<Value>, FetchError> {
        let rows = self.0.rows.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|r| query.expr.as_deref().is_none_or(|e| MemoryStore::matches(r, e)))
            .map(|r| Value::Object(r.clone()))
            .collect())
    }

    async fn insert(&self, _collection: &str, rows: Vec<Record>) -> Result<u64, FetchError> {
        let n = rows.len() as u64;
        self.0.rows.lock().unwrap().extend(rows);
        Ok(n)
    }

    async fn delete(&self, _collection: &str, expr: &str) -> Result<u64, FetchError> {
        let mut rows = self.0.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| !MemoryStore::matches(r, expr));
        Ok((before - rows.len()) as u64)
    }
}

struct MemoryConnector(Arc<MemoryStore>);

#[async_trait]
impl Connector for MemoryConnector {
    type Client = MemoryHandle;

    fn target(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> QueryResult<MemoryHandle> {
        Ok(MemoryHandle(self.0.clone()))
    }

    fn disconnect(&self, _client: &mut MemoryHandle) {}
}

#[tokio::test]
async fn inserted_metadata_is_filterable_and_deletable() {
    let store = Arc::new(MemoryStore::default());
    let mut registry = HandlerRegistry::new();
    registry.register(Box::new(VectorStoreTable::new("docs", MemoryConnector(store.clone()), &EngineConfig::default())));

    execute_sql(
        "INSERT INTO docs (id, content, metadata) VALUES (7, 'gamma', '{\"tag\": \"c\"}'), (8, 'delta', '{\"tag\": \"d\"}')",
        &registry,
    )
    .await
    .expect("insert");

    let out = execute_sql("SELECT id, metadata FROM docs WHERE metadata.tag = 'c'", &registry).await.expect("select");
    assert_eq!(rows(&out).len(), 1);
    assert_eq!(Value::Object(rows(&out)[0].clone()), json!({"id": 7, "metadata": {"tag": "c"}}));

    let out = execute_sql("DELETE FROM docs WHERE metadata.tag = 'c'", &registry).await.expect("delete");
    assert_eq!(out, StatementOutcome::Affected(1));
    let out = execute_sql("SELECT id FROM docs WHERE metadata.tag = 'c'", &registry).await.expect("select");
    assert!(rows(&out).is_empty());
    assert_eq!(store.rows.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn vector_delete_rules() {
    let (registry, store) = vector_registry();
    let err = execute_sql("DELETE FROM docs WHERE id = 1", &registry).await.unwrap_err();
    assert!(matches!(err, QueryError::UnsupportedFilter(_)));
    let err = execute_sql("DELETE FROM docs", &registry).await.unwrap_err();
    assert!(matches!(err, QueryError::Invalid(_)));
    execute_sql("DELETE FROM docs WHERE metadata.tag = 'a'", &registry).await.expect("ok");
    assert_eq!(store.deleted.lock().unwrap().as_slice(), &["(tag == \"a\")".to_string()]);
}
