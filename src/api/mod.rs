// API Module
//
// Router assembly for the read layer. Each domain lives in its own
// submodule; everything here is read-only and runs concurrently with the
// single ingest writer.

pub mod types;
pub mod helpers;
pub mod status;
pub mod inscriptions;
pub mod sats;
pub mod stats;
pub mod brc20;

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Extension, Router};
use rocksdb::DB;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use crate::cache::CacheManager;
use crate::chain_state::TipCache;
use crate::metrics;

use status::ServerVersion;

/// Prometheus text exposition.
async fn metrics_handler() -> String {
    metrics::gather_text()
}

/// Assemble the full read API under the /ordinals prefix.
pub fn build_router(
    db: Arc<DB>,
    cache: Arc<CacheManager>,
    tip: TipCache,
    server_version: String,
) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let v1 = Router::new()
        .route("/", get(status::status))
        .route("/inscriptions", get(inscriptions::inscription_index))
        .route("/inscriptions/transfers", get(inscriptions::block_transfers))
        .route("/inscriptions/{param}", get(inscriptions::inscription_show))
        .route("/inscriptions/{param}/content", get(inscriptions::inscription_content))
        .route("/inscriptions/{param}/transfers", get(inscriptions::inscription_transfers))
        .route("/sats/{ordinal}", get(sats::sat_show))
        .route("/sats/{ordinal}/inscriptions", get(sats::sat_inscriptions))
        .route("/stats/inscriptions", get(stats::inscription_stats));

    let brc20_router = Router::new()
        .route("/tokens", get(brc20::tokens_index))
        .route("/tokens/{ticker}", get(brc20::token_show))
        .route("/tokens/{ticker}/holders", get(brc20::token_holders))
        .route("/activity", get(brc20::activity))
        .route("/balances/{address}", get(brc20::address_balances));

    Router::new()
        .nest("/ordinals/v1", v1)
        .nest("/ordinals/brc-20", brc20_router)
        .route("/metrics", get(metrics_handler))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors)
        .layer(Extension(db))
        .layer(Extension(cache))
        .layer(Extension(tip))
        .layer(Extension(ServerVersion(Arc::new(server_version))))
}
