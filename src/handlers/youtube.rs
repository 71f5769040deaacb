//! YouTube Data API tables: comment threads, video details and channel details.

use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use serde_json::{Value, json};

use crate::config::EngineConfig;
use crate::http_source::{Continuation, HttpJsonSource};
use crate::models::{ColumnDef, ColumnType, TableResult, TableSchema};
use crate::query_ast::{
    Capabilities, FetchError, Operator, ParamDialect, ParamField, QueryError, QueryResult, QuerySpec, RemoteSource,
    TableHandler, TablePipeline, fetch_all,
};

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";

static DURATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?$").ok());

fn at(value: &Value, pointer: &str) -> Value {
    value.pointer(pointer).cloned().unwrap_or(Value::Null)
}

/// Statistics arrive as decimal strings.
fn count_at(value: &Value, pointer: &str) -> Value {
    match value.pointer(pointer) {
        Some(Value::String(s)) => s.parse::<i64>().map(Value::from).unwrap_or_else(|_| Value::String(s.clone())),
        Some(other) => other.clone(),
        None => Value::Null,
    }
}

/// `PT1H2M3S` → `1:2:3`, `PT4M5S` → `4:5`. Unparseable input is returned as is.
pub fn duration_str(iso: &str) -> String {
    let Some(caps) = DURATION.as_ref().and_then(|re| re.captures(iso)) else {
        return iso.to_string();
    };
    let parts: Vec<&str> = (1..=3).filter_map(|i| caps.get(i).map(|m| m.as_str())).collect();
    parts.join(":")
}

fn comments_schema() -> TableSchema {
    TableSchema::new(
        "comments",
        vec![
            ColumnDef::new("channel_id", ColumnType::Text),
            ColumnDef::new("video_id", ColumnType::Text),
            ColumnDef::new("user_id", ColumnType::Text),
            ColumnDef::new("display_name", ColumnType::Text),
            ColumnDef::new("comment", ColumnType::Text),
            ColumnDef::new("replies.user_id", ColumnType::Text),
            ColumnDef::new("replies.reply_author", ColumnType::Text),
            ColumnDef::new("replies.reply", ColumnType::Text),
        ],
    )
}

/// Comment threads of one video or one channel, one row per reply.
pub struct CommentsTable<S> {
    pipeline: TablePipeline,
    source: S,
}

impl<S: RemoteSource> CommentsTable<S> {
    pub fn new(source: S, config: &EngineConfig) -> Self {
        let dialect = ParamDialect::new(
            "youtube",
            vec![
                ParamField::new("video_id", "videoId", &[Operator::Eq]),
                ParamField::new("channel_id", "allThreadsRelatedToChannelId", &[Operator::Eq]),
            ],
        );
        let capabilities = config.capabilities_for("comments", Capabilities::none().with_filter());
        let pipeline = TablePipeline::new(comments_schema(), capabilities)
            .with_dialect(dialect)
            .exploding("replies");
        Self { pipeline, source }
    }

    fn check_target(spec: &QuerySpec) -> QueryResult<()> {
        let video = spec.conditions.on_column("video_id").next().is_some();
        let channel = spec.conditions.on_column("channel_id").next().is_some();
        match (video, channel) {
            (true, true) => Err(QueryError::Invalid(
                "only one of video_id or channel_id can be present in the WHERE clause".into(),
            )),
            (false, false) => Err(QueryError::Invalid("video_id or channel_id is required in the WHERE clause".into())),
            _ => Ok(()),
        }
    }
}

impl CommentsTable<HttpJsonSource> {
    pub fn http(api_key: &str, config: &EngineConfig) -> Result<Self, FetchError> {
        let source = HttpJsonSource::new(format!("{API_BASE}/commentThreads"), config.http_timeout())?
            .with_param("part", "snippet,replies")
            .with_param("textFormat", "plainText")
            .with_param("maxResults", "100")
            .with_param("key", api_key)
            .items_at("/items")
            .next_token_at("/nextPageToken", Continuation::Param("pageToken".into()));
        Ok(Self::new(source, config))
    }
}

/// Reduce one `commentThread` resource to the table's fields, with replies as
/// a list for the unifier to explode.
pub fn shape_thread(thread: &Value) -> QueryResult<Value> {
    let top = "/snippet/topLevelComment/snippet";
    let replies = match thread.pointer("/replies/comments") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|reply| {
                json!({
                    "user_id": at(reply, "/snippet/authorChannelId/value"),
                    "reply_author": at(reply, "/snippet/authorDisplayName"),
                    "reply": at(reply, "/snippet/textOriginal"),
                })
            })
            .collect(),
        Some(other) => return Err(QueryError::schema_mismatch("replies", "list of objects", other)),
    };
    Ok(json!({
        "channel_id": at(thread, "/snippet/channelId"),
        "video_id": at(thread, "/snippet/videoId"),
        "user_id": at(thread, &format!("{top}/authorChannelId/value")),
        "display_name": at(thread, &format!("{top}/authorDisplayName")),
        "comment": at(thread, &format!("{top}/textDisplay")),
        "replies": replies,
    }))
}

#[async_trait::async_trait]
impl<S: RemoteSource> TableHandler for CommentsTable<S> {
    fn name(&self) -> &str {
        "comments"
    }

    fn schema(&self) -> &TableSchema {
        self.pipeline.schema()
    }

    fn capabilities(&self) -> Capabilities {
        self.pipeline.capabilities().clone()
    }

    async fn select(&self, spec: &QuerySpec) -> QueryResult<TableResult> {
        Self::check_target(spec)?;
        let plan = self.pipeline.plan(spec)?;
        let threads = fetch_all(&self.source, &plan.remote).await?;
        debug!("youtube: {} comment threads", threads.len());
        let shaped = threads.iter().map(shape_thread).collect::<QueryResult<Vec<_>>>()?;
        self.pipeline.finish(&plan, shaped)
    }
}

fn videos_schema() -> TableSchema {
    TableSchema::new(
        "videos",
        vec![
            ColumnDef::new("channel_title", ColumnType::Text),
            ColumnDef::new("title", ColumnType::Text),
            ColumnDef::new("description", ColumnType::Text),
            ColumnDef::new("publish_time", ColumnType::Timestamp),
            ColumnDef::new("comment_count", ColumnType::Integer),
            ColumnDef::new("like_count", ColumnType::Integer),
            ColumnDef::new("view_count", ColumnType::Integer),
            ColumnDef::new("video_id", ColumnType::Text),
            ColumnDef::new("duration_str", ColumnType::Text),
        ],
    )
}

/// Details of a single video, selected with `video_id = ...`.
pub struct VideosTable<S> {
    pipeline: TablePipeline,
    source: S,
}

impl<S: RemoteSource> VideosTable<S> {
    pub fn new(source: S, config: &EngineConfig) -> Self {
        let dialect = ParamDialect::new("youtube", vec![ParamField::new("video_id", "id", &[Operator::Eq])]);
        let capabilities = config.capabilities_for("videos", Capabilities::none().with_filter());
        Self { pipeline: TablePipeline::new(videos_schema(), capabilities).with_dialect(dialect), source }
    }
}

impl VideosTable<HttpJsonSource> {
    pub fn http(api_key: &str, config: &EngineConfig) -> Result<Self, FetchError> {
        let source = HttpJsonSource::new(format!("{API_BASE}/videos"), config.http_timeout())?
            .with_param("part", "statistics,snippet,contentDetails")
            .with_param("key", api_key)
            .items_at("/items");
        Ok(Self::new(source, config))
    }
}

pub fn shape_video(video: &Value) -> Value {
    let duration = video
        .pointer("/contentDetails/duration")
        .and_then(Value::as_str)
        .map(|d| Value::String(duration_str(d)))
        .unwrap_or(Value::Null);
    json!({
        "channel_title": at(video, "/snippet/channelTitle"),
        "title": at(video, "/snippet/title"),
        "description": at(video, "/snippet/description"),
        "publish_time": at(video, "/snippet/publishedAt"),
        "comment_count": count_at(video, "/statistics/commentCount"),
        "like_count": count_at(video, "/statistics/likeCount"),
        "view_count": count_at(video, "/statistics/viewCount"),
        "video_id": at(video, "/id"),
        "duration_str": duration,
    })
}

#[async_trait::async_trait]
impl<S: RemoteSource> TableHandler for VideosTable<S> {
    fn name(&self) -> &str {
        "videos"
    }

    fn schema(&self) -> &TableSchema {
        self.pipeline.schema()
    }

    fn capabilities(&self) -> Capabilities {
        self.pipeline.capabilities().clone()
    }

    async fn select(&self, spec: &QuerySpec) -> QueryResult<TableResult> {
        if spec.conditions.on_column("video_id").next().is_none() {
            return Err(QueryError::Invalid("video_id is required in the WHERE clause".into()));
        }
        let plan = self.pipeline.plan(spec)?;
        let videos = fetch_all(&self.source, &plan.remote).await?;
        self.pipeline.finish(&plan, videos.iter().map(shape_video).collect())
    }
}

fn channels_schema() -> TableSchema {
    TableSchema::new(
        "channels",
        vec![
            ColumnDef::new("country", ColumnType::Text),
            ColumnDef::new("description", ColumnType::Text),
            ColumnDef::new("creation_date", ColumnType::Timestamp),
            ColumnDef::new("title", ColumnType::Text),
            ColumnDef::new("subscriber_count", ColumnType::Integer),
            ColumnDef::new("video_count", ColumnType::Integer),
            ColumnDef::new("view_count", ColumnType::Integer),
            ColumnDef::new("channel_id", ColumnType::Text),
        ],
    )
}

/// Details of a single channel, selected with `channel_id = ...`.
pub struct ChannelsTable<S> {
    pipeline: TablePipeline,
    source: S,
}

impl<S: RemoteSource> ChannelsTable<S> {
    pub fn new(source: S, config: &EngineConfig) -> Self {
        let dialect = ParamDialect::new("youtube", vec![ParamField::new("channel_id", "id", &[Operator::Eq])]);
        let capabilities = config.capabilities_for("channels", Capabilities::none().with_filter());
        Self { pipeline: TablePipeline::new(channels_schema(), capabilities).with_dialect(dialect), source }
    }
}

impl ChannelsTable<HttpJsonSource> {
    pub fn http(api_key: &str, config: &EngineConfig) -> Result<Self, FetchError> {
        let source = HttpJsonSource::new(format!("{API_BASE}/channels"), config.http_timeout())?
            .with_param("part", "statistics,snippet,contentDetails")
            .with_param("key", api_key)
            .items_at("/items");
        Ok(Self::new(source, config))
    }
}

pub fn shape_channel(channel: &Value) -> Value {
    json!({
        "country": at(channel, "/snippet/country"),
        "description": at(channel, "/snippet/description"),
        "creation_date": at(channel, "/snippet/publishedAt"),
        "title": at(channel, "/snippet/title"),
        "subscriber_count": count_at(channel, "/statistics/subscriberCount"),
        "video_count": count_at(channel, "/statistics/videoCount"),
        "view_count": count_at(channel, "/statistics/viewCount"),
        "channel_id": at(channel, "/id"),
    })
}

#[async_trait::async_trait]
impl<S: RemoteSource> TableHandler for ChannelsTable<S> {
    fn name(&self) -> &str {
        "channels"
    }

    fn schema(&self) -> &TableSchema {
        self.pipeline.schema()
    }

    fn capabilities(&self) -> Capabilities {
        self.pipeline.capabilities().clone()
    }

    async fn select(&self, spec: &QuerySpec) -> QueryResult<TableResult> {
        if spec.conditions.on_column("channel_id").next().is_none() {
            return Err(QueryError::Invalid("channel_id is required in the WHERE clause".into()));
        }
        let plan = self.pipeline.plan(spec)?;
        let channels = fetch_all(&self.source, &plan.remote).await?;
        debug!("youtube: {} channels", channels.len());
        self.pipeline.finish(&plan, channels.iter().map(shape_channel).collect())
    }
}
