/// Metrics Module - Prometheus Instrumentation
///
/// Ingest progress, reorg activity and API traffic, exported through the
/// /metrics endpoint.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Total blocks applied by the ingest writer
    pub static ref BLOCKS_APPLIED: IntCounter = IntCounter::new(
        "ordblox_blocks_applied_total",
        "Total blocks applied by the ingest writer"
    ).unwrap();

    /// Total blocks rolled back (reorgs and explicit rollback directives)
    pub static ref BLOCKS_ROLLED_BACK: IntCounter = IntCounter::new(
        "ordblox_blocks_rolled_back_total",
        "Total blocks rolled back"
    ).unwrap();

    /// Total inscription reveals indexed
    pub static ref INSCRIPTIONS_INDEXED: IntCounter = IntCounter::new(
        "ordblox_inscriptions_indexed_total",
        "Total inscription reveals indexed"
    ).unwrap();

    /// Total inscription transfers indexed
    pub static ref TRANSFERS_INDEXED: IntCounter = IntCounter::new(
        "ordblox_transfers_indexed_total",
        "Total inscription transfers indexed"
    ).unwrap();

    /// BRC-20 operations by outcome
    /// Labels: op (deploy, mint, transfer, transfer_send), outcome (applied, rejected)
    pub static ref BRC20_OPERATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("ordblox_brc20_operations_total", "BRC-20 operations by outcome"),
        &["op", "outcome"]
    ).unwrap();

    /// Chain tip height after the last committed block
    pub static ref CHAIN_TIP_HEIGHT: IntGauge = IntGauge::new(
        "ordblox_chain_tip_height",
        "Chain tip height after the last committed block"
    ).unwrap();

    /// Storage retries at the block boundary
    pub static ref BLOCK_RETRIES: IntCounter = IntCounter::new(
        "ordblox_block_retries_total",
        "Block commit retries after storage errors"
    ).unwrap();

    /// HTTP requests
    /// Labels: endpoint
    pub static ref HTTP_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("ordblox_http_requests_total", "Total HTTP requests"),
        &["endpoint"]
    ).unwrap();
}

/// Register all collectors with the global registry. Call once at startup.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    REGISTRY.register(Box::new(BLOCKS_APPLIED.clone()))?;
    REGISTRY.register(Box::new(BLOCKS_ROLLED_BACK.clone()))?;
    REGISTRY.register(Box::new(INSCRIPTIONS_INDEXED.clone()))?;
    REGISTRY.register(Box::new(TRANSFERS_INDEXED.clone()))?;
    REGISTRY.register(Box::new(BRC20_OPERATIONS.clone()))?;
    REGISTRY.register(Box::new(CHAIN_TIP_HEIGHT.clone()))?;
    REGISTRY.register(Box::new(BLOCK_RETRIES.clone()))?;
    REGISTRY.register(Box::new(HTTP_REQUESTS.clone()))?;
    Ok(())
}

/// Render the registry in the Prometheus text exposition format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if encoder.encode(&REGISTRY.gather(), &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_gather() {
        // init_metrics is idempotent per-process only; ignore the duplicate
        // registration error other tests may have triggered.
        let _ = init_metrics();
        BLOCKS_APPLIED.inc();
        let text = gather_text();
        assert!(text.contains("ordblox_blocks_applied_total"));
    }
}
