//! CryptoPanic-style news feed.

use crate::config::EngineConfig;
use crate::http_source::{Continuation, HttpJsonSource};
use crate::models::{ColumnDef, ColumnType, TableSchema};
use crate::query_ast::{ApiTable, Capabilities, FetchError, Operator, ParamDialect, ParamField, RemoteSource, TablePipeline};

pub const DEFAULT_BUDGET: u64 = 200;
const POSTS_URL: &str = "https://cryptopanic.com/api/v1/posts/";

fn news_schema() -> TableSchema {
    let mut columns = vec![
        ColumnDef::new("id", ColumnType::Integer),
        ColumnDef::new("kind", ColumnType::Text),
        ColumnDef::new("domain", ColumnType::Text),
        ColumnDef::new("title", ColumnType::Text),
        ColumnDef::new("slug", ColumnType::Text),
        ColumnDef::new("url", ColumnType::Text),
        ColumnDef::new("published_at", ColumnType::Timestamp),
        ColumnDef::new("created_at", ColumnType::Timestamp),
        ColumnDef::new("source.title", ColumnType::Text),
        ColumnDef::new("source.region", ColumnType::Text),
        ColumnDef::new("source.domain", ColumnType::Text),
        ColumnDef::new("source.path", ColumnType::Text),
    ];
    for vote in ["negative", "positive", "important", "liked", "disliked", "lol", "toxic", "saved", "comments"] {
        columns.push(ColumnDef::new(format!("votes.{vote}"), ColumnType::Integer));
    }
    columns.push(ColumnDef::new("currencies", ColumnType::Json));
    for param in ["filters", "currency", "regions"] {
        columns.push(ColumnDef::filter_only(param, ColumnType::Text));
    }
    columns.push(ColumnDef::filter_only("following", ColumnType::Boolean));
    TableSchema::new("news", columns)
}

fn news_dialect() -> ParamDialect {
    let listed = [Operator::Eq, Operator::In];
    ParamDialect::new(
        "cryptopanic",
        vec![
            ParamField::new("filters", "filter", &listed).with_list_separator(","),
            ParamField::new("currency", "currencies", &listed).with_list_separator(","),
            ParamField::new("regions", "regions", &listed).with_list_separator(","),
            ParamField::new("kind", "kind", &[Operator::Eq]),
            ParamField::new("following", "following", &[Operator::Eq]),
        ],
    )
}

/// Posts table over any source of raw post objects.
pub fn news_table<S: RemoteSource>(source: S, config: &EngineConfig) -> ApiTable<S> {
    let base = Capabilities::none().with_filter().with_default_limit(DEFAULT_BUDGET);
    let pipeline = TablePipeline::new(news_schema(), config.capabilities_for("news", base)).with_dialect(news_dialect());
    ApiTable::new(pipeline, source)
}

pub fn news_http(api_token: &str, config: &EngineConfig) -> Result<ApiTable<HttpJsonSource>, FetchError> {
    let source = HttpJsonSource::new(POSTS_URL, config.http_timeout())?
        .with_param("auth_token", api_token)
        .with_param("public", "true")
        .items_at("/results")
        .next_token_at("/next", Continuation::Url);
    Ok(news_table(source, config))
}
