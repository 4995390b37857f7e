/// Ingest Service - single-writer block directive loop
///
/// One task consumes the block-event stream and advances the index; the
/// API serves reads concurrently. The writer suspends only between blocks,
/// so a shutdown signal never observes a half-applied block: the in-flight
/// directive either commits whole or the process exits before commit.
///
/// Storage failures are retried at the directive boundary with exponential
/// backoff; stream defects (unknown rollback, undecodable line) are logged
/// and skipped because the store was left untouched.

use std::sync::Arc;
use std::time::Duration;

use rocksdb::DB;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::brc20::Brc20Config;
use crate::chain_state::TipCache;
use crate::errors::ChainError;
use crate::metrics;
use crate::reorg;
use crate::types::BlockDirective;

/// Bounded retry policy for storage I/O at the block boundary.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub limit: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Feed a newline-delimited JSON directive log into the ingest channel.
/// Returns once the file is exhausted; tests and other sources can push
/// into the same channel directly.
pub async fn run_jsonl_source(
    path: String,
    tx: mpsc::Sender<BlockDirective>,
) -> Result<(), ChainError> {
    let file = tokio::fs::File::open(&path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut sent = 0u64;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<BlockDirective>(&line) {
            Ok(directive) => {
                if tx.send(directive).await.is_err() {
                    break;
                }
                sent += 1;
            }
            Err(e) => {
                warn!(error = %e, "undecodable directive line skipped");
            }
        }
    }
    info!(path = %path, directives = sent, "event log exhausted");
    Ok(())
}

/// Run the single-writer ingest loop until the stream closes or ctrl-c.
pub async fn run_ingest_service(
    db: Arc<DB>,
    config: Brc20Config,
    retry: RetryPolicy,
    tip_cache: TipCache,
    mut events: mpsc::Receiver<BlockDirective>,
) -> Result<(), ChainError> {
    info!("ingest service started");
    loop {
        let directive = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received at block boundary");
                return Ok(());
            }
            next = events.recv() => match next {
                Some(directive) => directive,
                None => {
                    info!("event stream closed");
                    return Ok(());
                }
            },
        };
        match process_with_retry(&db, &config, retry, &directive).await {
            Ok(tip) => tip_cache.publish(tip),
            Err(e) if e.is_skippable() => {
                warn!(error = %e, "directive skipped, store unchanged");
            }
            Err(e) => {
                error!(error = %e, "ingest failed");
                return Err(e);
            }
        }
    }
}

async fn process_with_retry(
    db: &Arc<DB>,
    config: &Brc20Config,
    retry: RetryPolicy,
    directive: &BlockDirective,
) -> Result<Option<crate::types::ChainTipRow>, ChainError> {
    let mut attempt = 0u32;
    loop {
        let db = db.clone();
        let config = *config;
        let directive = directive.clone();
        let result = tokio::task::spawn_blocking(move || {
            reorg::process_directive(&db, &config, &directive)
        })
        .await
        .map_err(|e| ChainError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        match result {
            Ok(tip) => return Ok(tip),
            Err(e) if e.is_retryable() && attempt < retry.limit => {
                attempt += 1;
                metrics::BLOCK_RETRIES.inc();
                let delay = retry.base_delay * 2u32.saturating_pow(attempt - 1);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "storage error, retrying block"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
