/// Chain Tip Tracking
///
/// The persisted tip row is written only by the reorg controller inside the
/// block batch; readers go through the in-memory cache, published atomically
/// after each commit. The height↔hash registry backs parent alignment and
/// the `?block={hash}` query.

use std::sync::{Arc, RwLock};

use rocksdb::DB;

use crate::batch::{BlockBatch, CF_CHAIN_STATE};
use crate::errors::ChainError;
use crate::keys;
use crate::types::{BlockContext, ChainTipRow};

const TIP_KEY: &[u8] = b"tip";

fn height_hash_key(height: u64) -> Vec<u8> {
    keys::concat(&[b"h:", &keys::height_key(height)])
}

fn hash_height_key(hash: &str) -> Vec<u8> {
    keys::concat(&[b"hh:", hash.as_bytes()])
}

pub fn read_tip(db: &Arc<DB>) -> Result<Option<ChainTipRow>, ChainError> {
    crate::batch::get_row(db, CF_CHAIN_STATE, TIP_KEY)
}

pub fn block_hash_at_height(db: &Arc<DB>, height: u64) -> Result<Option<String>, ChainError> {
    let cf = db
        .cf_handle(CF_CHAIN_STATE)
        .ok_or(ChainError::MissingColumnFamily(CF_CHAIN_STATE))?;
    Ok(db
        .get_cf(&cf, height_hash_key(height))?
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
}

pub fn height_for_block_hash(db: &Arc<DB>, hash: &str) -> Result<Option<u64>, ChainError> {
    let cf = db
        .cf_handle(CF_CHAIN_STATE)
        .ok_or(ChainError::MissingColumnFamily(CF_CHAIN_STATE))?;
    match db.get_cf(&cf, hash_height_key(hash))? {
        Some(bytes) => {
            let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                ChainError::InvariantViolation("malformed height registry value".into())
            })?;
            Ok(Some(u64::from_be_bytes(raw)))
        }
        None => Ok(None),
    }
}

/// Stage the tip advance for an applied block.
pub fn stage_apply(batch: &mut BlockBatch, ctx: &BlockContext) -> Result<(), ChainError> {
    batch.put_row(
        CF_CHAIN_STATE,
        TIP_KEY.to_vec(),
        &ChainTipRow {
            block_height: ctx.height,
            block_hash: ctx.hash.clone(),
        },
    )?;
    batch.put(CF_CHAIN_STATE, height_hash_key(ctx.height), ctx.hash.as_bytes().to_vec());
    batch.put(
        CF_CHAIN_STATE,
        hash_height_key(&ctx.hash),
        keys::height_key(ctx.height).to_vec(),
    );
    Ok(())
}

/// Stage the tip retreat for a rolled-back block. Returns the tip the store
/// will expose after commit.
pub fn stage_rollback(
    db: &Arc<DB>,
    batch: &mut BlockBatch,
    ctx: &BlockContext,
) -> Result<Option<ChainTipRow>, ChainError> {
    batch.delete(CF_CHAIN_STATE, height_hash_key(ctx.height));
    batch.delete(CF_CHAIN_STATE, hash_height_key(&ctx.hash));
    let previous = if ctx.height == 0 {
        None
    } else {
        block_hash_at_height(db, ctx.height - 1)?.map(|hash| ChainTipRow {
            block_height: ctx.height - 1,
            block_hash: hash,
        })
    };
    match &previous {
        Some(tip) => batch.put_row(CF_CHAIN_STATE, TIP_KEY.to_vec(), tip)?,
        None => batch.delete(CF_CHAIN_STATE, TIP_KEY.to_vec()),
    }
    Ok(previous)
}

/// Process-wide latest-applied-block cache. Single writer (the ingest
/// task), many readers (the query layer).
#[derive(Clone, Default)]
pub struct TipCache {
    inner: Arc<RwLock<Option<ChainTipRow>>>,
}

impl TipCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cache from the store at startup.
    pub fn load_from(db: &Arc<DB>) -> Result<Self, ChainError> {
        let cache = Self::new();
        cache.publish(read_tip(db)?);
        Ok(cache)
    }

    pub fn publish(&self, tip: Option<ChainTipRow>) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = tip;
        }
    }

    pub fn current(&self) -> Option<ChainTipRow> {
        self.inner.read().ok().and_then(|guard| guard.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::open_db;
    use tempfile::TempDir;

    #[test]
    fn test_tip_round_trip() {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(open_db(temp.path()).unwrap());
        assert!(read_tip(&db).unwrap().is_none());

        let ctx = BlockContext {
            height: 100,
            hash: "aa".repeat(32),
            timestamp: 0,
        };
        let mut batch = BlockBatch::new(db.clone());
        stage_apply(&mut batch, &ctx).unwrap();
        batch.commit().unwrap();

        let tip = read_tip(&db).unwrap().unwrap();
        assert_eq!(tip.block_height, 100);
        assert_eq!(block_hash_at_height(&db, 100).unwrap().unwrap(), "aa".repeat(32));
        assert_eq!(height_for_block_hash(&db, &"aa".repeat(32)).unwrap(), Some(100));

        let mut batch = BlockBatch::new(db.clone());
        let previous = stage_rollback(&db, &mut batch, &ctx).unwrap();
        batch.commit().unwrap();
        assert!(previous.is_none());
        assert!(read_tip(&db).unwrap().is_none());
        assert!(block_hash_at_height(&db, 100).unwrap().is_none());
    }

    #[test]
    fn test_tip_cache_publish() {
        let cache = TipCache::new();
        assert!(cache.current().is_none());
        cache.publish(Some(ChainTipRow {
            block_height: 7,
            block_hash: "x".into(),
        }));
        assert_eq!(cache.current().unwrap().block_height, 7);
    }
}
