mod amount;
mod api;
mod batch;
mod brc20;
mod cache;
mod chain_state;
mod charms;
mod config;
mod errors;
mod inscriptions;
mod keys;
mod metrics;
mod reorg;
mod sat;
mod sync;
mod telemetry;
mod types;


use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::brc20::Brc20Config;
use crate::cache::CacheManager;
use crate::chain_state::TipCache;
use crate::config::{
    get_brc20_genesis_block, get_brc20_self_mint_activation_block, get_db_path,
    get_event_log_path, get_global_config, get_io_retry, get_server_bind, get_server_version,
    init_global_config,
};
use crate::sync::{run_ingest_service, run_jsonl_source, RetryPolicy};

#[derive(Parser, Debug)]
#[command(name = "ordblox", about = "Ordinals + BRC-20 indexer and read API")]
struct Cli {
    /// Path of the configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Override the block-directive event log path
    #[arg(long)]
    events: Option<String>,
}

async fn start_web_server(
    db: Arc<rocksdb::DB>,
    cache: Arc<CacheManager>,
    tip: TipCache,
    bind: (String, u16),
    server_version: String,
) {
    let app = api::build_router(db, cache, tip, server_version);
    let addr: SocketAddr = match format!("{}:{}", bind.0, bind.1).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "invalid server bind address");
            return;
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "failed to bind API listener");
            return;
        }
    };
    info!(%addr, "API listening");
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "API server failed");
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = telemetry::init_tracing(telemetry::TelemetryConfig::default()) {
        eprintln!("FATAL: telemetry init failed: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = metrics::init_metrics() {
        error!(error = %e, "metrics init failed");
        std::process::exit(1);
    }
    if let Err(e) = init_global_config(&cli.config) {
        error!(error = %e, "configuration load failed");
        std::process::exit(1);
    }
    let config = get_global_config();

    let db_path = match get_db_path(config) {
        Ok(path) => PathBuf::from(path),
        Err(e) => {
            error!(error = %e, "missing database path");
            std::process::exit(1);
        }
    };
    let event_log = match cli.events.map(Ok).unwrap_or_else(|| get_event_log_path(config)) {
        Ok(path) => path,
        Err(e) => {
            error!(error = %e, "missing event log path");
            std::process::exit(1);
        }
    };

    let db = match batch::open_db(&db_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!(error = %e, "store open failed");
            std::process::exit(2);
        }
    };
    let tip_cache = match TipCache::load_from(&db) {
        Ok(cache) => cache,
        Err(e) => {
            error!(error = %e, "tip read failed");
            std::process::exit(2);
        }
    };
    if let Some(tip) = tip_cache.current() {
        metrics::CHAIN_TIP_HEIGHT.set(tip.block_height as i64);
        info!(height = tip.block_height, "resuming from stored tip");
    }

    let brc20_config = Brc20Config {
        genesis_block: get_brc20_genesis_block(config),
        self_mint_activation_block: get_brc20_self_mint_activation_block(config),
    };
    let (retry_limit, retry_base_ms) = get_io_retry(config);
    let retry = RetryPolicy {
        limit: retry_limit,
        base_delay: Duration::from_millis(retry_base_ms),
    };

    let cache = Arc::new(CacheManager::new());
    let server_version = get_server_version(config);
    let bind = get_server_bind(config);

    tokio::spawn(start_web_server(
        Arc::clone(&db),
        Arc::clone(&cache),
        tip_cache.clone(),
        bind,
        server_version,
    ));

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        if let Err(e) = run_jsonl_source(event_log, tx).await {
            error!(error = %e, "event source failed");
        }
    });

    match run_ingest_service(db, brc20_config, retry, tip_cache, rx).await {
        Ok(()) => {
            info!("ingest finished, shutting down");
        }
        Err(e) => {
            error!(error = %e, "writer terminated");
            std::process::exit(e.exit_code());
        }
    }
}
