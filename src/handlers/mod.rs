//! Concrete tables.

pub mod json_file;
pub mod news;
pub mod vector;
pub mod youtube;

pub use json_file::{JsonTable, MemorySource, json_table, load_json_table};
pub use news::{news_http, news_table};
pub use vector::{MilvusConnector, MilvusRestClient, VectorClient, VectorQuery, VectorStoreTable};
pub use youtube::{ChannelsTable, CommentsTable, VideosTable};
