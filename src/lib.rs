pub mod config;
pub mod connection;
pub mod export;
pub mod handlers;
pub mod http_source;
pub mod models;
pub mod query_ast;

use std::path::PathBuf;

use clap::Parser;
use log::{LevelFilter, info};

use crate::config::EngineConfig;
use crate::handlers::{ChannelsTable, CommentsTable, MilvusConnector, VectorStoreTable, VideosTable};
use crate::query_ast::{HandlerRegistry, StatementOutcome, execute_sql};

/// Run one SQL statement against a JSON dataset and the API tables configured in the environment
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "sqlbridge")]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// JSON file served as a local table named after its file stem
    pub dataset: PathBuf,

    /// SQL statement to execute
    pub sql: String,

    /// Print rows as JSON lines instead of CSV
    #[arg(long)]
    pub json: bool,

    /// Write rows to a CSV file instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

fn init_logging(config: &EngineConfig) {
    let level = config.log_level.parse().unwrap_or(LevelFilter::Info);
    let _ = env_logger::Builder::from_default_env()
        .filter_module("sqlbridge", level)
        .is_test(false)
        .try_init();
}

/// Entry point of the `sqlbridge` binary.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let config = EngineConfig::load();
    init_logging(&config);

    let args = CliArgs::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(run_cli(args, &config))
}

/// API-backed tables whose credentials are present in the environment.
pub fn register_remote_tables(
    registry: &mut HandlerRegistry,
    config: &EngineConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(key) = env("YOUTUBE_API_KEY") {
        registry.register(Box::new(CommentsTable::http(&key, config)?));
        registry.register(Box::new(VideosTable::http(&key, config)?));
        registry.register(Box::new(ChannelsTable::http(&key, config)?));
    }
    if let Some(token) = env("CRYPTOPANIC_API_TOKEN") {
        registry.register(Box::new(handlers::news_http(&token, config)?));
    }
    if let Some(uri) = env("MILVUS_URI") {
        let collections = env("MILVUS_COLLECTIONS").unwrap_or_default();
        for collection in collections.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let connector = MilvusConnector::new(uri.as_str(), env("MILVUS_TOKEN"), config);
            registry.register(Box::new(VectorStoreTable::new(collection, connector, config)));
        }
    }
    info!("registered tables: {}", registry.names().join(", "));
    Ok(())
}

pub async fn run_cli(args: CliArgs, config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let table = handlers::load_json_table(&args.dataset)?;
    let mut registry = HandlerRegistry::new();
    register_remote_tables(&mut registry, config, |name| std::env::var(name).ok())?;
    registry.register(Box::new(table));

    match execute_sql(&args.sql, &registry).await? {
        StatementOutcome::Rows(result) => {
            info!("{} rows", result.len());
            match (&args.out, args.json) {
                (Some(path), _) => export::write_csv_file(path, &result)?,
                (None, true) => export::write_json_lines(&result, std::io::stdout().lock())?,
                (None, false) => export::write_csv(&result, std::io::stdout().lock())?,
            }
        }
        StatementOutcome::Affected(n) => println!("{n} rows affected"),
    }
    Ok(())
}
