/// Atomic Multi-CF Block Writer
///
/// All mutations of one block are staged here and committed in a single
/// RocksDB WriteBatch spanning every column family. Either the whole block
/// lands or none of it does; a crash mid-block leaves the store at the
/// previous tip.
///
/// Unlike a bare WriteBatch the staged state is readable: appliers running
/// later in the block observe writes made earlier in the same block (a
/// transfer of a sat revealed two transactions earlier must see the staged
/// inscription), which is what makes within-block operation chains valid.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::ChainError;

// Ordinals schema
pub const CF_INSCRIPTIONS: &str = "ord_inscriptions";
pub const CF_INSC_BY_NUMBER: &str = "ord_insc_by_number";
pub const CF_INSC_BY_BLOCK: &str = "ord_insc_by_block";
pub const CF_INSC_BY_SAT: &str = "ord_insc_by_sat";
pub const CF_SATOSHIS: &str = "ord_satoshis";
pub const CF_LOCATIONS: &str = "ord_locations";
pub const CF_CURRENT_LOCATIONS: &str = "ord_current_locations";
pub const CF_TRANSFERS: &str = "ord_transfers";
pub const CF_TRANSFERS_BY_BLOCK: &str = "ord_transfers_by_block";
pub const CF_COUNTS_BY_BLOCK: &str = "ord_counts_by_block";
pub const CF_COUNTS: &str = "ord_counts";
pub const CF_PARENTS: &str = "ord_parents";
pub const CF_RECURSIONS: &str = "ord_recursions";

// BRC-20 schema
pub const CF_TOKENS: &str = "brc20_tokens";
pub const CF_TOKENS_BY_ORDER: &str = "brc20_tokens_by_order";
pub const CF_BALANCES: &str = "brc20_balances";
pub const CF_HOLDERS: &str = "brc20_holders";
pub const CF_HISTORY: &str = "brc20_history";
pub const CF_OPS: &str = "brc20_ops";
pub const CF_OPS_BY_TICKER: &str = "brc20_ops_by_ticker";
pub const CF_OPS_BY_ADDRESS: &str = "brc20_ops_by_address";
pub const CF_TRANSFERABLES: &str = "brc20_transferables";
pub const CF_BRC20_COUNTS: &str = "brc20_counts";

// Shared
pub const CF_CHAIN_STATE: &str = "chain_state";

pub const COLUMN_FAMILIES: [&str; 24] = [
    CF_INSCRIPTIONS,
    CF_INSC_BY_NUMBER,
    CF_INSC_BY_BLOCK,
    CF_INSC_BY_SAT,
    CF_SATOSHIS,
    CF_LOCATIONS,
    CF_CURRENT_LOCATIONS,
    CF_TRANSFERS,
    CF_TRANSFERS_BY_BLOCK,
    CF_COUNTS_BY_BLOCK,
    CF_COUNTS,
    CF_PARENTS,
    CF_RECURSIONS,
    CF_TOKENS,
    CF_TOKENS_BY_ORDER,
    CF_BALANCES,
    CF_HOLDERS,
    CF_HISTORY,
    CF_OPS,
    CF_OPS_BY_TICKER,
    CF_OPS_BY_ADDRESS,
    CF_TRANSFERABLES,
    CF_BRC20_COUNTS,
    CF_CHAIN_STATE,
];

/// Open (or create) the store with every column family.
pub fn open_db(path: &Path) -> Result<DB, ChainError> {
    let mut cf_descriptors = vec![ColumnFamilyDescriptor::new("default", Options::default())];
    for cf in COLUMN_FAMILIES.iter() {
        cf_descriptors.push(ColumnFamilyDescriptor::new(cf.to_string(), Options::default()));
    }

    let mut db_options = Options::default();
    db_options.create_if_missing(true);
    db_options.create_missing_column_families(true);
    db_options.set_write_buffer_size(64 * 1024 * 1024);
    db_options.set_max_write_buffer_number(4);
    db_options.set_compression_type(rocksdb::DBCompressionType::Lz4);
    db_options.increase_parallelism(4);

    Ok(DB::open_cf_descriptors(&db_options, path, cf_descriptors)?)
}

/// Fetch + decode a committed row outside any block batch.
pub fn get_row<T: DeserializeOwned>(
    db: &Arc<DB>,
    cf_name: &'static str,
    key: &[u8],
) -> Result<Option<T>, ChainError> {
    let cf = db
        .cf_handle(cf_name)
        .ok_or(ChainError::MissingColumnFamily(cf_name))?;
    match db.get_cf(&cf, key)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

/// Ascending prefix scan over committed state.
pub fn scan_prefix(
    db: &Arc<DB>,
    cf_name: &'static str,
    prefix: &[u8],
) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ChainError> {
    let cf = db
        .cf_handle(cf_name)
        .ok_or(ChainError::MissingColumnFamily(cf_name))?;
    let mut out = Vec::new();
    let iter = db.iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));
    for item in iter {
        let (key, value) = item?;
        if !key.starts_with(prefix) {
            break;
        }
        out.push((key.to_vec(), value.to_vec()));
    }
    Ok(out)
}

/// One block's staged mutations across all column families.
pub struct BlockBatch {
    db: Arc<DB>,
    staged: HashMap<&'static str, BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl BlockBatch {
    pub fn new(db: Arc<DB>) -> Self {
        Self {
            db,
            staged: HashMap::new(),
        }
    }

    pub fn put(&mut self, cf_name: &'static str, key: Vec<u8>, value: Vec<u8>) {
        self.staged
            .entry(cf_name)
            .or_default()
            .insert(key, Some(value));
    }

    pub fn delete(&mut self, cf_name: &'static str, key: Vec<u8>) {
        self.staged.entry(cf_name).or_default().insert(key, None);
    }

    pub fn put_row<T: Serialize>(
        &mut self,
        cf_name: &'static str,
        key: Vec<u8>,
        row: &T,
    ) -> Result<(), ChainError> {
        let bytes = bincode::serialize(row)?;
        self.put(cf_name, key, bytes);
        Ok(())
    }

    /// Read through the overlay: staged writes shadow committed state.
    pub fn get(&self, cf_name: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, ChainError> {
        if let Some(cf_staged) = self.staged.get(cf_name) {
            if let Some(entry) = cf_staged.get(key) {
                return Ok(entry.clone());
            }
        }
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or(ChainError::MissingColumnFamily(cf_name))?;
        Ok(self.db.get_cf(&cf, key)?)
    }

    pub fn get_row<T: DeserializeOwned>(
        &self,
        cf_name: &'static str,
        key: &[u8],
    ) -> Result<Option<T>, ChainError> {
        match self.get(cf_name, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn exists(&self, cf_name: &'static str, key: &[u8]) -> Result<bool, ChainError> {
        Ok(self.get(cf_name, key)?.is_some())
    }

    /// Ascending prefix scan merged across committed state and the overlay.
    pub fn scan_prefix(
        &self,
        cf_name: &'static str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ChainError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            scan_prefix(&self.db, cf_name, prefix)?.into_iter().collect();
        if let Some(cf_staged) = self.staged.get(cf_name) {
            for (key, value) in cf_staged.range(prefix.to_vec()..) {
                if !key.starts_with(prefix) {
                    break;
                }
                match value {
                    Some(v) => {
                        merged.insert(key.clone(), v.clone());
                    }
                    None => {
                        merged.remove(key);
                    }
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Greatest key strictly below `upper`, merged across committed state
    /// and the overlay.
    pub fn last_before(
        &self,
        cf_name: &'static str,
        upper: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>, ChainError> {
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or(ChainError::MissingColumnFamily(cf_name))?;
        let mut committed: Option<(Vec<u8>, Vec<u8>)> = None;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(upper, Direction::Reverse));
        for item in iter {
            let (key, value) = item?;
            if key.as_ref() < upper {
                committed = Some((key.to_vec(), value.to_vec()));
                break;
            }
        }
        let staged = self.staged.get(cf_name).and_then(|cf_staged| {
            cf_staged
                .range(..upper.to_vec())
                .next_back()
                .map(|(k, v)| (k.clone(), v.clone()))
        });
        match (committed, staged) {
            (None, None) => Ok(None),
            (Some(c), None) => Ok(Some(c)),
            (None, Some((k, v))) => match v {
                Some(v) => Ok(Some((k, v))),
                // Deleted in overlay; retry below the tombstone.
                None => self.last_before(cf_name, &k),
            },
            (Some((ck, cv)), Some((sk, sv))) => {
                if sk >= ck {
                    match sv {
                        Some(v) => Ok(Some((sk, v))),
                        None => {
                            if sk == ck {
                                self.last_before(cf_name, &sk)
                            } else {
                                // Tombstone for an uncommitted key; the
                                // committed candidate still stands unless a
                                // lower staged entry shadows it, which the
                                // recursive probe resolves.
                                self.last_before(cf_name, &sk)
                            }
                        }
                    }
                } else {
                    Ok(Some((ck, cv)))
                }
            }
        }
    }

    /// Adjust a u64 counter, deleting the row when it reaches zero so a
    /// rollback restores byte-identical state. Going below zero means the
    /// apply/rollback pair is unbalanced and is fatal.
    pub fn add_count(
        &mut self,
        cf_name: &'static str,
        key: Vec<u8>,
        delta: i64,
    ) -> Result<(), ChainError> {
        let current = self.read_count(cf_name, &key)?;
        let next = if delta >= 0 {
            current
                .checked_add(delta as u64)
                .ok_or_else(|| ChainError::InvariantViolation("counter overflow".into()))?
        } else {
            let dec = delta.unsigned_abs();
            if current < dec {
                return Err(ChainError::InvariantViolation(format!(
                    "counter {}/{:?} would go negative ({} - {})",
                    cf_name,
                    String::from_utf8_lossy(&key),
                    current,
                    dec
                )));
            }
            current - dec
        };
        if next == 0 {
            self.delete(cf_name, key);
        } else {
            self.put(cf_name, key, next.to_be_bytes().to_vec());
        }
        Ok(())
    }

    pub fn read_count(&self, cf_name: &'static str, key: &[u8]) -> Result<u64, ChainError> {
        match self.get(cf_name, key)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    ChainError::InvariantViolation(format!(
                        "malformed counter value in {}",
                        cf_name
                    ))
                })?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.staged.values().map(|m| m.len()).sum()
    }

    /// Commit everything in one atomic WriteBatch across all CFs.
    pub fn commit(self) -> Result<(), ChainError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::default();
        for (cf_name, entries) in &self.staged {
            let cf = self
                .db
                .cf_handle(cf_name)
                .ok_or(ChainError::MissingColumnFamily(cf_name))?;
            for (key, value) in entries {
                match value {
                    Some(v) => batch.put_cf(&cf, key, v),
                    None => batch.delete_cf(&cf, key),
                }
            }
        }
        self.db.write(batch)?;
        Ok(())
    }
}

/// Read a committed u64 counter.
pub fn read_count(db: &Arc<DB>, cf_name: &'static str, key: &[u8]) -> Result<u64, ChainError> {
    let cf = db
        .cf_handle(cf_name)
        .ok_or(ChainError::MissingColumnFamily(cf_name))?;
    match db.get_cf(&cf, key)? {
        Some(bytes) => {
            let raw: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| ChainError::InvariantViolation("malformed counter value".into()))?;
            Ok(u64::from_be_bytes(raw))
        }
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_db() -> (Arc<DB>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = open_db(temp_dir.path()).unwrap();
        (Arc::new(db), temp_dir)
    }

    #[test]
    fn test_read_your_writes() {
        let (db, _temp) = create_test_db();
        let mut batch = BlockBatch::new(db.clone());
        batch.put(CF_SATOSHIS, b"k1".to_vec(), b"v1".to_vec());
        assert_eq!(batch.get(CF_SATOSHIS, b"k1").unwrap(), Some(b"v1".to_vec()));
        // Not committed yet
        let cf = db.cf_handle(CF_SATOSHIS).unwrap();
        assert!(db.get_cf(&cf, b"k1").unwrap().is_none());
        batch.commit().unwrap();
        assert_eq!(db.get_cf(&cf, b"k1").unwrap().unwrap(), b"v1");
    }

    #[test]
    fn test_overlay_delete_shadows_committed() {
        let (db, _temp) = create_test_db();
        let mut batch = BlockBatch::new(db.clone());
        batch.put(CF_SATOSHIS, b"k1".to_vec(), b"v1".to_vec());
        batch.commit().unwrap();

        let mut batch = BlockBatch::new(db.clone());
        batch.delete(CF_SATOSHIS, b"k1".to_vec());
        assert_eq!(batch.get(CF_SATOSHIS, b"k1").unwrap(), None);
        batch.commit().unwrap();
        let cf = db.cf_handle(CF_SATOSHIS).unwrap();
        assert!(db.get_cf(&cf, b"k1").unwrap().is_none());
    }

    #[test]
    fn test_scan_prefix_merges_overlay() {
        let (db, _temp) = create_test_db();
        let mut batch = BlockBatch::new(db.clone());
        batch.put(CF_LOCATIONS, b"aa1".to_vec(), b"committed".to_vec());
        batch.put(CF_LOCATIONS, b"bb1".to_vec(), b"other".to_vec());
        batch.commit().unwrap();

        let mut batch = BlockBatch::new(db.clone());
        batch.put(CF_LOCATIONS, b"aa2".to_vec(), b"staged".to_vec());
        let rows = batch.scan_prefix(CF_LOCATIONS, b"aa").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, b"aa1");
        assert_eq!(rows[1].0, b"aa2");

        batch.delete(CF_LOCATIONS, b"aa1".to_vec());
        let rows = batch.scan_prefix(CF_LOCATIONS, b"aa").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, b"aa2");
    }

    #[test]
    fn test_last_before() {
        let (db, _temp) = create_test_db();
        let mut batch = BlockBatch::new(db.clone());
        batch.put(CF_COUNTS_BY_BLOCK, 100u64.to_be_bytes().to_vec(), b"a".to_vec());
        batch.put(CF_COUNTS_BY_BLOCK, 102u64.to_be_bytes().to_vec(), b"b".to_vec());
        batch.commit().unwrap();

        let batch = BlockBatch::new(db.clone());
        let (key, value) = batch
            .last_before(CF_COUNTS_BY_BLOCK, &103u64.to_be_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(key, 102u64.to_be_bytes().to_vec());
        assert_eq!(value, b"b");
        let (key, _) = batch
            .last_before(CF_COUNTS_BY_BLOCK, &102u64.to_be_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(key, 100u64.to_be_bytes().to_vec());
        assert!(batch
            .last_before(CF_COUNTS_BY_BLOCK, &100u64.to_be_bytes())
            .unwrap()
            .is_none());

        // Staged rows participate
        let mut batch = BlockBatch::new(db.clone());
        batch.put(CF_COUNTS_BY_BLOCK, 105u64.to_be_bytes().to_vec(), b"c".to_vec());
        let (key, _) = batch
            .last_before(CF_COUNTS_BY_BLOCK, &106u64.to_be_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(key, 105u64.to_be_bytes().to_vec());

        // Staged tombstone hides a committed row
        let mut batch = BlockBatch::new(db.clone());
        batch.delete(CF_COUNTS_BY_BLOCK, 102u64.to_be_bytes().to_vec());
        let (key, _) = batch
            .last_before(CF_COUNTS_BY_BLOCK, &103u64.to_be_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(key, 100u64.to_be_bytes().to_vec());
    }

    #[test]
    fn test_counter_delete_on_zero_and_negative_is_fatal() {
        let (db, _temp) = create_test_db();
        let mut batch = BlockBatch::new(db.clone());
        batch.add_count(CF_COUNTS, b"mime:text/plain".to_vec(), 2).unwrap();
        batch.commit().unwrap();

        let mut batch = BlockBatch::new(db.clone());
        assert_eq!(batch.read_count(CF_COUNTS, b"mime:text/plain").unwrap(), 2);
        batch.add_count(CF_COUNTS, b"mime:text/plain".to_vec(), -2).unwrap();
        // Row is gone, not zero
        assert_eq!(batch.get(CF_COUNTS, b"mime:text/plain").unwrap(), None);
        let err = batch
            .add_count(CF_COUNTS, b"mime:text/plain".to_vec(), -1)
            .unwrap_err();
        assert!(matches!(err, ChainError::InvariantViolation(_)));
    }

    #[test]
    fn test_atomic_commit_spans_cfs() {
        let (db, _temp) = create_test_db();
        let mut batch = BlockBatch::new(db.clone());
        batch.put(CF_INSCRIPTIONS, b"i1".to_vec(), b"a".to_vec());
        batch.put(CF_TOKENS, b"pepe".to_vec(), b"b".to_vec());
        batch.put(CF_CHAIN_STATE, b"tip".to_vec(), b"c".to_vec());
        assert_eq!(batch.pending_count(), 3);
        batch.commit().unwrap();

        for (cf_name, key) in [
            (CF_INSCRIPTIONS, b"i1".as_ref()),
            (CF_TOKENS, b"pepe".as_ref()),
            (CF_CHAIN_STATE, b"tip".as_ref()),
        ] {
            let cf = db.cf_handle(cf_name).unwrap();
            assert!(db.get_cf(&cf, key).unwrap().is_some());
        }
    }
}
