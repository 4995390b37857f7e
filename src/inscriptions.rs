/// Ordinals Event Applier and Store
///
/// Translates inscription-reveal and inscription-transfer events into
/// column-family mutations, and provides the read accessors the query
/// layer uses. Every apply has an exact inverse here; the reorg controller
/// drives the rollback direction in reverse per-block order.

use std::sync::Arc;

use rocksdb::{Direction, IteratorMode, DB};

use crate::batch::{
    self, BlockBatch, CF_COUNTS, CF_COUNTS_BY_BLOCK, CF_CURRENT_LOCATIONS, CF_INSCRIPTIONS,
    CF_INSC_BY_BLOCK, CF_INSC_BY_NUMBER, CF_INSC_BY_SAT, CF_LOCATIONS, CF_PARENTS, CF_RECURSIONS,
    CF_SATOSHIS, CF_TRANSFERS, CF_TRANSFERS_BY_BLOCK,
};
use crate::errors::ChainError;
use crate::keys;
use crate::sat::Sat;
use crate::types::{
    BlockContext, BlockCountRow, InscriptionRevealed, InscriptionRow, InscriptionTransferred,
    LocationRow, SatoshiRow, TransferRow, TransferType,
};

// ========== Counter keys (ord_counts CF) ==========

pub fn mime_count_key(mime_type: &str) -> Vec<u8> {
    keys::concat(&[b"mime:", mime_type.as_bytes()])
}

pub fn rarity_count_key(rarity: &str) -> Vec<u8> {
    keys::concat(&[b"rarity:", rarity.as_bytes()])
}

pub fn type_count_key(blessed: bool) -> Vec<u8> {
    if blessed {
        b"type:blessed".to_vec()
    } else {
        b"type:cursed".to_vec()
    }
}

pub fn address_count_key(address: &str) -> Vec<u8> {
    keys::concat(&[b"address:", address.as_bytes()])
}

pub fn genesis_address_count_key(address: &str) -> Vec<u8> {
    keys::concat(&[b"genesis_address:", address.as_bytes()])
}

pub fn recursive_count_key(recursive: bool) -> Vec<u8> {
    if recursive {
        b"recursive:true".to_vec()
    } else {
        b"recursive:false".to_vec()
    }
}

// ========== Recursion discovery ==========

/// Syntactic scan of content bytes for `/content/<64-hex>i<n>` references.
/// The referenced inscription does not have to exist.
pub fn scan_recursion_refs(content: &[u8]) -> Vec<String> {
    const NEEDLE: &[u8] = b"/content/";
    let mut refs: Vec<String> = Vec::new();
    let mut at = 0usize;
    while at + NEEDLE.len() < content.len() {
        let window = &content[at..];
        let hit = match window.windows(NEEDLE.len()).position(|w| w == NEEDLE) {
            Some(p) => at + p,
            None => break,
        };
        let tail = &content[hit + NEEDLE.len()..];
        if let Some(id) = parse_inscription_id(tail) {
            if !refs.contains(&id) {
                refs.push(id);
            }
        }
        at = hit + NEEDLE.len();
    }
    refs
}

fn parse_inscription_id(bytes: &[u8]) -> Option<String> {
    if bytes.len() < 66 {
        return None;
    }
    let txid = &bytes[..64];
    if !txid.iter().all(|b| b.is_ascii_hexdigit()) || bytes[64] != b'i' {
        return None;
    }
    let digits: Vec<u8> = bytes[65..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .copied()
        .collect();
    if digits.is_empty() {
        return None;
    }
    let mut id = String::with_capacity(65 + digits.len());
    id.push_str(std::str::from_utf8(txid).ok()?);
    id.push('i');
    id.push_str(std::str::from_utf8(&digits).ok()?);
    Some(id)
}

// ========== Apply ==========

pub fn apply_reveal(
    batch: &mut BlockBatch,
    ctx: &BlockContext,
    reveal: &InscriptionRevealed,
) -> Result<(), ChainError> {
    let sat = Sat::new(reveal.ordinal_number)?;
    let id_key = reveal.inscription_id.as_bytes().to_vec();

    if batch.exists(CF_INSCRIPTIONS, &id_key)? {
        return Err(ChainError::DuplicateReveal(reveal.inscription_id.clone()));
    }

    // Satoshi row: do-nothing on conflict, the derivation never changes.
    let sat_key = keys::sat_key(reveal.ordinal_number).to_vec();
    if !batch.exists(CF_SATOSHIS, &sat_key)? {
        batch.put_row(
            CF_SATOSHIS,
            sat_key.clone(),
            &SatoshiRow {
                ordinal_number: reveal.ordinal_number,
                rarity: sat.rarity().as_str().to_string(),
                coinbase_height: sat.coinbase_height(),
            },
        )?;
    }

    let content = hex::decode(&reveal.content)?;
    let recursion_refs = scan_recursion_refs(&content);
    let recursive = !recursion_refs.is_empty();

    let row = InscriptionRow {
        inscription_id: reveal.inscription_id.clone(),
        ordinal_number: reveal.ordinal_number,
        number: reveal.number,
        classic_number: reveal.classic_number,
        block_height: ctx.height,
        block_hash: ctx.hash.clone(),
        tx_id: reveal.tx_id.clone(),
        tx_index: reveal.tx_index,
        input_index: reveal.input_index,
        address: reveal.address.clone(),
        mime_type: reveal.mime_type.clone(),
        content_type: reveal.content_type.clone(),
        content_length: reveal.content_length,
        content,
        fee: reveal.fee,
        curse_type: reveal.curse_type.clone(),
        recursive,
        pointer: reveal.pointer,
        metadata: reveal.metadata.clone(),
        metaprotocol: reveal.metaprotocol.clone(),
        delegate: reveal.delegate.clone(),
        timestamp: ctx.timestamp,
        charms: reveal.charms,
    };
    batch.put_row(CF_INSCRIPTIONS, id_key.clone(), &row)?;
    batch.put(CF_INSC_BY_NUMBER, keys::number_key(reveal.number).to_vec(), id_key.clone());
    batch.put(
        CF_INSC_BY_BLOCK,
        keys::concat(&[
            &keys::height_key(ctx.height),
            &keys::tx_index_key(reveal.tx_index),
            &keys::tx_index_key(reveal.input_index),
        ]),
        id_key.clone(),
    );
    batch.put(
        CF_INSC_BY_SAT,
        keys::concat(&[&keys::sat_key(reveal.ordinal_number), &keys::number_key(reveal.number)]),
        id_key.clone(),
    );

    // Genesis location: do-nothing on conflict, current overwritten.
    let genesis = LocationRow {
        ordinal_number: reveal.ordinal_number,
        block_height: ctx.height,
        tx_index: reveal.tx_index,
        tx_id: reveal.tx_id.clone(),
        block_hash: ctx.hash.clone(),
        address: reveal.address.clone(),
        output: reveal.output.clone(),
        offset: reveal.offset,
        prev_output: None,
        prev_offset: None,
        value: reveal.value,
        transfer_type: TransferType::Transferred,
        timestamp: ctx.timestamp,
    };
    // Insert is do-nothing on conflict; the projection always mirrors the
    // stored row so the two stay byte-identical.
    let loc_key = keys::location_key(reveal.ordinal_number, ctx.height, reveal.tx_index);
    let stored: LocationRow = match batch.get_row(CF_LOCATIONS, &loc_key)? {
        Some(existing) => existing,
        None => {
            batch.put_row(CF_LOCATIONS, loc_key, &genesis)?;
            genesis
        }
    };
    batch.put_row(CF_CURRENT_LOCATIONS, sat_key, &stored)?;

    bump_block_count(batch, ctx, 1)?;
    batch.add_count(CF_COUNTS, mime_count_key(&reveal.mime_type), 1)?;
    batch.add_count(CF_COUNTS, rarity_count_key(sat.rarity().as_str()), 1)?;
    batch.add_count(CF_COUNTS, type_count_key(reveal.classic_number >= 0), 1)?;
    if let Some(address) = &reveal.address {
        batch.add_count(CF_COUNTS, address_count_key(address), 1)?;
        batch.add_count(CF_COUNTS, genesis_address_count_key(address), 1)?;
    }
    batch.add_count(CF_COUNTS, recursive_count_key(recursive), 1)?;

    for parent in &reveal.parent_refs {
        batch.put(
            CF_PARENTS,
            keys::concat(&[&keys::string_prefix(&reveal.inscription_id), parent.as_bytes()]),
            Vec::new(),
        );
    }
    for reference in &recursion_refs {
        batch.put(
            CF_RECURSIONS,
            keys::concat(&[&keys::string_prefix(&reveal.inscription_id), reference.as_bytes()]),
            Vec::new(),
        );
    }

    Ok(())
}

pub fn apply_transfer(
    batch: &mut BlockBatch,
    ctx: &BlockContext,
    transfer: &InscriptionTransferred,
) -> Result<(), ChainError> {
    let sat_key = keys::sat_key(transfer.ordinal_number).to_vec();
    // The event names the satpoint it spends; that row is the authority
    // for the previous owner (the current-location projection may already
    // point at a reveal staged in this very transaction).
    let prev: LocationRow = batch
        .get_row(
            CF_LOCATIONS,
            &keys::location_key(
                transfer.ordinal_number,
                transfer.from_block_height,
                transfer.from_tx_index,
            ),
        )?
        .ok_or_else(|| {
            ChainError::BlockStream(format!(
                "transfer of sat {} spends unknown location {}:{}",
                transfer.ordinal_number, transfer.from_block_height, transfer.from_tx_index
            ))
        })?;

    let location = LocationRow {
        ordinal_number: transfer.ordinal_number,
        block_height: ctx.height,
        tx_index: transfer.tx_index,
        tx_id: transfer.tx_id.clone(),
        block_hash: ctx.hash.clone(),
        address: transfer.destination_address.clone(),
        output: transfer.output.clone(),
        offset: transfer.offset,
        prev_output: Some(prev.output.clone()),
        prev_offset: prev.offset,
        value: transfer.value,
        transfer_type: transfer.transfer_type,
        timestamp: ctx.timestamp,
    };
    let loc_key = keys::location_key(transfer.ordinal_number, ctx.height, transfer.tx_index);
    let stored: LocationRow = match batch.get_row(CF_LOCATIONS, &loc_key)? {
        Some(existing) => existing,
        None => {
            batch.put_row(CF_LOCATIONS, loc_key, &location)?;
            location
        }
    };
    batch.put_row(CF_CURRENT_LOCATIONS, sat_key.clone(), &stored)?;

    // Every inscription riding on the sat moves with it; the one whose
    // genesis is this very satpoint (reveal in the same transaction) does
    // not get a transfer record.
    let riders = batch.scan_prefix(CF_INSC_BY_SAT, &keys::sat_key(transfer.ordinal_number))?;
    for (_, id_bytes) in riders {
        let row: InscriptionRow = batch
            .get_row(CF_INSCRIPTIONS, &id_bytes)?
            .ok_or_else(|| {
                ChainError::InvariantViolation("sat index points at missing inscription".into())
            })?;
        if row.block_height == ctx.height && row.tx_index == transfer.tx_index {
            continue;
        }
        let record = TransferRow {
            inscription_id: row.inscription_id.clone(),
            number: row.number,
            ordinal_number: transfer.ordinal_number,
            block_height: ctx.height,
            tx_index: transfer.tx_index,
            from_block_height: transfer.from_block_height,
            from_tx_index: transfer.from_tx_index,
            block_transfer_index: transfer.block_transfer_index,
        };
        batch.put_row(
            CF_TRANSFERS,
            keys::inscription_transfer_key(&row.inscription_id, ctx.height, transfer.block_transfer_index),
            &record,
        )?;
        batch.put_row(
            CF_TRANSFERS_BY_BLOCK,
            keys::block_transfer_key(ctx.height, transfer.block_transfer_index, row.number),
            &record,
        )?;

        if let Some(address) = &prev.address {
            batch.add_count(CF_COUNTS, address_count_key(address), -1)?;
        }
        if let Some(address) = &transfer.destination_address {
            batch.add_count(CF_COUNTS, address_count_key(address), 1)?;
        }
    }

    Ok(())
}

fn bump_block_count(batch: &mut BlockBatch, ctx: &BlockContext, delta: i64) -> Result<(), ChainError> {
    let key = keys::height_key(ctx.height).to_vec();
    match batch.get_row::<BlockCountRow>(CF_COUNTS_BY_BLOCK, &key)? {
        Some(mut row) => {
            if delta < 0 {
                let dec = delta.unsigned_abs();
                if row.inscription_count < dec || row.inscription_count_accum < dec {
                    return Err(ChainError::InvariantViolation(format!(
                        "block count at height {} would go negative",
                        ctx.height
                    )));
                }
                row.inscription_count -= dec;
                row.inscription_count_accum -= dec;
                if row.inscription_count == 0 {
                    batch.delete(CF_COUNTS_BY_BLOCK, key);
                } else {
                    batch.put_row(CF_COUNTS_BY_BLOCK, key, &row)?;
                }
            } else {
                row.inscription_count += delta as u64;
                row.inscription_count_accum += delta as u64;
                batch.put_row(CF_COUNTS_BY_BLOCK, key, &row)?;
            }
            Ok(())
        }
        None => {
            if delta < 0 {
                return Err(ChainError::InvariantViolation(format!(
                    "rollback of uncounted block {}",
                    ctx.height
                )));
            }
            let prev_accum = batch
                .last_before(CF_COUNTS_BY_BLOCK, &key)?
                .map(|(_, bytes)| bincode::deserialize::<BlockCountRow>(&bytes))
                .transpose()?
                .map(|row| row.inscription_count_accum)
                .unwrap_or(0);
            batch.put_row(
                CF_COUNTS_BY_BLOCK,
                key,
                &BlockCountRow {
                    block_height: ctx.height,
                    block_hash: ctx.hash.clone(),
                    inscription_count: delta as u64,
                    inscription_count_accum: prev_accum + delta as u64,
                    timestamp: ctx.timestamp,
                },
            )?;
            Ok(())
        }
    }
}

// ========== Rollback ==========

pub fn rollback_reveal(
    batch: &mut BlockBatch,
    ctx: &BlockContext,
    row: &InscriptionRow,
) -> Result<(), ChainError> {
    let id_key = row.inscription_id.as_bytes().to_vec();
    let sat_key = keys::sat_key(row.ordinal_number).to_vec();

    batch.delete(CF_INSCRIPTIONS, id_key);
    batch.delete(CF_INSC_BY_NUMBER, keys::number_key(row.number).to_vec());
    batch.delete(
        CF_INSC_BY_BLOCK,
        keys::concat(&[
            &keys::height_key(row.block_height),
            &keys::tx_index_key(row.tx_index),
            &keys::tx_index_key(row.input_index),
        ]),
    );
    batch.delete(
        CF_INSC_BY_SAT,
        keys::concat(&[&keys::sat_key(row.ordinal_number), &keys::number_key(row.number)]),
    );

    // Cascade the relation tables.
    for (key, _) in batch.scan_prefix(CF_PARENTS, &keys::string_prefix(&row.inscription_id))? {
        batch.delete(CF_PARENTS, key);
    }
    for (key, _) in batch.scan_prefix(CF_RECURSIONS, &keys::string_prefix(&row.inscription_id))? {
        batch.delete(CF_RECURSIONS, key);
    }

    // Remove the genesis location and restore the projection to whatever
    // location now has the greatest (height, tx_index) for the sat.
    batch.delete(
        CF_LOCATIONS,
        keys::location_key(row.ordinal_number, row.block_height, row.tx_index),
    );
    restore_current_location(batch, row.ordinal_number)?;

    // The satoshi row was created by the first reveal on the sat; drop it
    // with the last one.
    if batch
        .scan_prefix(CF_INSC_BY_SAT, &keys::sat_key(row.ordinal_number))?
        .is_empty()
    {
        batch.delete(CF_SATOSHIS, sat_key);
    }

    let sat = Sat::new(row.ordinal_number)?;
    bump_block_count(batch, ctx, -1)?;
    batch.add_count(CF_COUNTS, mime_count_key(&row.mime_type), -1)?;
    batch.add_count(CF_COUNTS, rarity_count_key(sat.rarity().as_str()), -1)?;
    batch.add_count(CF_COUNTS, type_count_key(row.classic_number >= 0), -1)?;
    if let Some(address) = &row.address {
        batch.add_count(CF_COUNTS, address_count_key(address), -1)?;
        batch.add_count(CF_COUNTS, genesis_address_count_key(address), -1)?;
    }
    batch.add_count(CF_COUNTS, recursive_count_key(row.recursive), -1)?;

    Ok(())
}

/// Roll back one sat move. `records` holds every transfer row the move
/// produced (reinscribed sats move all their inscriptions at once).
pub fn rollback_sat_move(
    batch: &mut BlockBatch,
    records: &[TransferRow],
) -> Result<(), ChainError> {
    let first = match records.first() {
        Some(r) => r,
        None => return Ok(()),
    };
    let loc_key = keys::location_key(first.ordinal_number, first.block_height, first.tx_index);
    let removed: LocationRow = batch.get_row(CF_LOCATIONS, &loc_key)?.ok_or_else(|| {
        ChainError::InvariantViolation(format!(
            "rollback of transfer without location row (sat {} height {})",
            first.ordinal_number, first.block_height
        ))
    })?;
    batch.delete(CF_LOCATIONS, loc_key);

    for record in records {
        batch.delete(
            CF_TRANSFERS,
            keys::inscription_transfer_key(
                &record.inscription_id,
                record.block_height,
                record.block_transfer_index,
            ),
        );
        batch.delete(
            CF_TRANSFERS_BY_BLOCK,
            keys::block_transfer_key(
                record.block_height,
                record.block_transfer_index,
                record.number,
            ),
        );
    }

    restore_current_location(batch, first.ordinal_number)?.ok_or_else(|| {
        ChainError::InvariantViolation(format!(
            "sat {} has transfer history but no prior location",
            first.ordinal_number
        ))
    })?;

    // Ownership counters invert against the recorded source satpoint, the
    // same row the apply decremented.
    let source: LocationRow = batch
        .get_row(
            CF_LOCATIONS,
            &keys::location_key(first.ordinal_number, first.from_block_height, first.from_tx_index),
        )?
        .ok_or_else(|| {
            ChainError::InvariantViolation(format!(
                "rollback of sat {} move lost its source location",
                first.ordinal_number
            ))
        })?;
    let moved = records.len() as i64;
    if let Some(address) = &removed.address {
        batch.add_count(CF_COUNTS, address_count_key(address), -moved)?;
    }
    if let Some(address) = &source.address {
        batch.add_count(CF_COUNTS, address_count_key(address), moved)?;
    }

    Ok(())
}

fn restore_current_location(
    batch: &mut BlockBatch,
    ordinal_number: u64,
) -> Result<Option<LocationRow>, ChainError> {
    let sat_key = keys::sat_key(ordinal_number).to_vec();
    let remaining = batch.scan_prefix(CF_LOCATIONS, &keys::sat_key(ordinal_number))?;
    match remaining.last() {
        Some((_, bytes)) => {
            let row: LocationRow = bincode::deserialize(bytes)?;
            batch.put_row(CF_CURRENT_LOCATIONS, sat_key, &row)?;
            Ok(Some(row))
        }
        None => {
            batch.delete(CF_CURRENT_LOCATIONS, sat_key);
            Ok(None)
        }
    }
}

// ========== Read accessors (committed state) ==========

pub fn get_inscription(db: &Arc<DB>, inscription_id: &str) -> Result<Option<InscriptionRow>, ChainError> {
    batch::get_row(db, CF_INSCRIPTIONS, inscription_id.as_bytes())
}

pub fn get_inscription_by_number(db: &Arc<DB>, number: i64) -> Result<Option<InscriptionRow>, ChainError> {
    let cf = db
        .cf_handle(CF_INSC_BY_NUMBER)
        .ok_or(ChainError::MissingColumnFamily(CF_INSC_BY_NUMBER))?;
    match db.get_cf(&cf, keys::number_key(number))? {
        Some(id_bytes) => batch::get_row(db, CF_INSCRIPTIONS, &id_bytes),
        None => Ok(None),
    }
}

pub fn get_satoshi(db: &Arc<DB>, ordinal_number: u64) -> Result<Option<SatoshiRow>, ChainError> {
    batch::get_row(db, CF_SATOSHIS, &keys::sat_key(ordinal_number))
}

pub fn get_current_location(db: &Arc<DB>, ordinal_number: u64) -> Result<Option<LocationRow>, ChainError> {
    batch::get_row(db, CF_CURRENT_LOCATIONS, &keys::sat_key(ordinal_number))
}

/// All locations a sat has occupied, ascending (height, tx_index).
pub fn get_location_history(db: &Arc<DB>, ordinal_number: u64) -> Result<Vec<LocationRow>, ChainError> {
    batch::scan_prefix(db, CF_LOCATIONS, &keys::sat_key(ordinal_number))?
        .into_iter()
        .map(|(_, bytes)| bincode::deserialize(&bytes).map_err(ChainError::from))
        .collect()
}

/// Post-genesis moves of one inscription, ascending.
pub fn get_inscription_transfers(db: &Arc<DB>, inscription_id: &str) -> Result<Vec<TransferRow>, ChainError> {
    batch::scan_prefix(db, CF_TRANSFERS, inscription_id.as_bytes())?
        .into_iter()
        .map(|(_, bytes)| bincode::deserialize(&bytes).map_err(ChainError::from))
        .collect()
}

/// True post-genesis transfers inside one block, ascending transfer index.
pub fn get_block_transfers(db: &Arc<DB>, height: u64) -> Result<Vec<TransferRow>, ChainError> {
    batch::scan_prefix(db, CF_TRANSFERS_BY_BLOCK, &keys::height_key(height))?
        .into_iter()
        .map(|(_, bytes)| bincode::deserialize(&bytes).map_err(ChainError::from))
        .collect()
}

/// Inscription ids revealed inside one block, ascending (tx_index, input).
pub fn get_block_inscription_ids(db: &Arc<DB>, height: u64) -> Result<Vec<String>, ChainError> {
    Ok(batch::scan_prefix(db, CF_INSC_BY_BLOCK, &keys::height_key(height))?
        .into_iter()
        .map(|(_, id)| String::from_utf8_lossy(&id).into_owned())
        .collect())
}

/// Inscriptions on a sat, descending inscription number.
pub fn get_sat_inscription_ids(db: &Arc<DB>, ordinal_number: u64) -> Result<Vec<String>, ChainError> {
    let mut ids: Vec<String> = batch::scan_prefix(db, CF_INSC_BY_SAT, &keys::sat_key(ordinal_number))?
        .into_iter()
        .map(|(_, id)| String::from_utf8_lossy(&id).into_owned())
        .collect();
    ids.reverse();
    Ok(ids)
}

pub fn get_parent_refs(db: &Arc<DB>, inscription_id: &str) -> Result<Vec<String>, ChainError> {
    relation_suffixes(db, CF_PARENTS, inscription_id)
}

pub fn get_recursion_refs(db: &Arc<DB>, inscription_id: &str) -> Result<Vec<String>, ChainError> {
    relation_suffixes(db, CF_RECURSIONS, inscription_id)
}

fn relation_suffixes(
    db: &Arc<DB>,
    cf_name: &'static str,
    inscription_id: &str,
) -> Result<Vec<String>, ChainError> {
    let prefix = keys::string_prefix(inscription_id);
    Ok(batch::scan_prefix(db, cf_name, &prefix)?
        .into_iter()
        .map(|(key, _)| String::from_utf8_lossy(&key[prefix.len()..]).into_owned())
        .collect())
}

pub fn get_block_count(db: &Arc<DB>, height: u64) -> Result<Option<BlockCountRow>, ChainError> {
    batch::get_row(db, CF_COUNTS_BY_BLOCK, &keys::height_key(height))
}

/// (max blessed number, most-negative cursed number), if any inscriptions
/// exist.
pub fn get_number_extremes(db: &Arc<DB>) -> Result<(Option<i64>, Option<i64>), ChainError> {
    let cf = db
        .cf_handle(CF_INSC_BY_NUMBER)
        .ok_or(ChainError::MissingColumnFamily(CF_INSC_BY_NUMBER))?;

    let mut max_blessed = None;
    if let Some(item) = db.iterator_cf(&cf, IteratorMode::End).next() {
        let (key, _) = item?;
        if let Some(number) = keys::number_from_key(&key) {
            if number >= 0 {
                max_blessed = Some(number);
            }
        }
    }
    let mut max_cursed = None;
    if let Some(item) = db.iterator_cf(&cf, IteratorMode::Start).next() {
        let (key, _) = item?;
        if let Some(number) = keys::number_from_key(&key) {
            if number < 0 {
                max_cursed = Some(number);
            }
        }
    }
    Ok((max_blessed, max_cursed))
}

/// Block-count history rows, descending height, with optional bounds.
pub fn list_block_counts_desc(
    db: &Arc<DB>,
    from_height: Option<u64>,
    to_height: Option<u64>,
) -> Result<Vec<BlockCountRow>, ChainError> {
    let cf = db
        .cf_handle(CF_COUNTS_BY_BLOCK)
        .ok_or(ChainError::MissingColumnFamily(CF_COUNTS_BY_BLOCK))?;
    let to_key = to_height.map(keys::height_key);
    let mode = match &to_key {
        Some(key) => IteratorMode::From(key, Direction::Reverse),
        None => IteratorMode::End,
    };
    let mut rows = Vec::new();
    for item in db.iterator_cf(&cf, mode) {
        let (_, bytes) = item?;
        let row: BlockCountRow = bincode::deserialize(&bytes)?;
        if let Some(from) = from_height {
            if row.block_height < from {
                break;
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::open_db;
    use tempfile::TempDir;

    fn test_db() -> (Arc<DB>, TempDir) {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(open_db(temp.path()).unwrap());
        (db, temp)
    }

    fn ctx(height: u64) -> BlockContext {
        BlockContext {
            height,
            hash: format!("{:064x}", height),
            timestamp: 1_677_000_000 + height,
        }
    }

    pub(crate) fn reveal_fixture(id_seed: u8, sat: u64, number: i64) -> InscriptionRevealed {
        let tx_id = format!("{:02x}", id_seed).repeat(32);
        InscriptionRevealed {
            inscription_id: format!("{}i0", tx_id),
            ordinal_number: sat,
            number,
            classic_number: number,
            tx_id: tx_id.clone(),
            tx_index: 0,
            input_index: 0,
            address: Some("bc1qgenesis".to_string()),
            mime_type: "text/plain".to_string(),
            content_type: "text/plain;charset=utf-8".to_string(),
            content_length: 5,
            content: hex::encode(b"hello"),
            fee: 1200,
            curse_type: None,
            pointer: None,
            metadata: None,
            metaprotocol: None,
            delegate: None,
            parent_refs: vec![],
            charms: 0,
            output: format!("{}:0", tx_id),
            offset: Some(0),
            value: Some(10_000),
        }
    }

    fn transfer_fixture(
        sat: u64,
        tx_index: u32,
        bti: u32,
        from: (u64, u32),
        dest: &str,
    ) -> InscriptionTransferred {
        let tx_id = format!("{:02x}", tx_index as u8 + 0x40).repeat(32);
        InscriptionTransferred {
            ordinal_number: sat,
            tx_id: tx_id.clone(),
            tx_index,
            destination_address: Some(dest.to_string()),
            output: format!("{}:1", tx_id),
            offset: Some(0),
            value: Some(9_000),
            transfer_type: TransferType::Transferred,
            from_block_height: from.0,
            from_tx_index: from.1,
            block_transfer_index: bti,
        }
    }

    #[test]
    fn test_reveal_effects() {
        let (db, _temp) = test_db();
        let mut batch = BlockBatch::new(db.clone());
        let reveal = reveal_fixture(0xaa, 257418248345364, 0);
        apply_reveal(&mut batch, &ctx(775617), &reveal).unwrap();
        batch.commit().unwrap();

        let row = get_inscription(&db, &reveal.inscription_id).unwrap().unwrap();
        assert_eq!(row.ordinal_number, 257418248345364);
        assert!(!row.recursive);
        assert_eq!(
            get_inscription_by_number(&db, 0).unwrap().unwrap().inscription_id,
            reveal.inscription_id
        );
        let current = get_current_location(&db, 257418248345364).unwrap().unwrap();
        assert_eq!(current.block_height, 775617);
        assert_eq!(current.prev_output, None);
        assert_eq!(get_satoshi(&db, 257418248345364).unwrap().unwrap().rarity, "common");
        assert_eq!(batch::read_count(&db, CF_COUNTS, &mime_count_key("text/plain")).unwrap(), 1);
        assert_eq!(batch::read_count(&db, CF_COUNTS, &type_count_key(true)).unwrap(), 1);
        let counts = get_block_count(&db, 775617).unwrap().unwrap();
        assert_eq!(counts.inscription_count, 1);
        assert_eq!(counts.inscription_count_accum, 1);
    }

    #[test]
    fn test_duplicate_reveal_is_fatal() {
        let (db, _temp) = test_db();
        let mut batch = BlockBatch::new(db.clone());
        let reveal = reveal_fixture(0xaa, 100, 0);
        apply_reveal(&mut batch, &ctx(775617), &reveal).unwrap();
        let err = apply_reveal(&mut batch, &ctx(775617), &reveal).unwrap_err();
        assert!(matches!(err, ChainError::DuplicateReveal(_)));
    }

    #[test]
    fn test_transfer_chain_in_one_block() {
        let (db, _temp) = test_db();
        let sat = 257418248345364u64;
        let mut batch = BlockBatch::new(db.clone());
        apply_reveal(&mut batch, &ctx(775617), &reveal_fixture(0xaa, sat, 0)).unwrap();
        batch.commit().unwrap();

        let mut batch = BlockBatch::new(db.clone());
        let block = ctx(775618);
        apply_transfer(&mut batch, &block, &transfer_fixture(sat, 30, 0, (775617, 0), "bc1qb")).unwrap();
        apply_transfer(&mut batch, &block, &transfer_fixture(sat, 42, 1, (775618, 30), "bc1qc")).unwrap();
        batch.commit().unwrap();

        let current = get_current_location(&db, sat).unwrap().unwrap();
        assert_eq!(current.address.as_deref(), Some("bc1qc"));
        assert_eq!(current.tx_index, 42);
        // Current equals the greatest (height, tx_index) location
        let history = get_location_history(&db, sat).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history.last().unwrap(), &current);

        let id = format!("{}i0", "aa".repeat(32));
        assert_eq!(get_inscription_transfers(&db, &id).unwrap().len(), 2);
        assert_eq!(get_block_transfers(&db, 775618).unwrap().len(), 2);

        // Ownership counters follow the current address
        assert_eq!(batch::read_count(&db, CF_COUNTS, &address_count_key("bc1qc")).unwrap(), 1);
        assert_eq!(batch::read_count(&db, CF_COUNTS, &address_count_key("bc1qb")).unwrap(), 0);
        assert_eq!(batch::read_count(&db, CF_COUNTS, &address_count_key("bc1qgenesis")).unwrap(), 0);
        assert_eq!(
            batch::read_count(&db, CF_COUNTS, &genesis_address_count_key("bc1qgenesis")).unwrap(),
            1
        );
    }

    #[test]
    fn test_reinscription_shares_current_location() {
        let (db, _temp) = test_db();
        let sat = 1_000_000u64;

        let mut batch = BlockBatch::new(db.clone());
        let mut first = reveal_fixture(0xaa, sat, -7);
        first.classic_number = -7;
        apply_reveal(&mut batch, &ctx(775617), &first).unwrap();
        batch.commit().unwrap();

        // The second inscribe moves the sat within the same transaction.
        let mut batch = BlockBatch::new(db.clone());
        let block = ctx(775618);
        let mut second = reveal_fixture(0xbb, sat, -1);
        second.classic_number = -1;
        second.tx_index = 4;
        apply_reveal(&mut batch, &block, &second).unwrap();
        let mut mv = transfer_fixture(sat, 4, 0, (775617, 0), "bc1qgenesis");
        mv.output = second.output.clone();
        apply_transfer(&mut batch, &block, &mv).unwrap();
        batch.commit().unwrap();

        let ids = get_sat_inscription_ids(&db, sat).unwrap();
        assert_eq!(ids, vec![second.inscription_id.clone(), first.inscription_id.clone()]);

        let current = get_current_location(&db, sat).unwrap().unwrap();
        assert_eq!(current.output, second.output);

        // Genesis + 1 move for the first inscription, genesis only for the second
        assert_eq!(get_inscription_transfers(&db, &first.inscription_id).unwrap().len(), 1);
        assert_eq!(get_inscription_transfers(&db, &second.inscription_id).unwrap().len(), 0);
        assert_eq!(get_location_history(&db, sat).unwrap().len(), 2);
    }

    #[test]
    fn test_rollback_restores_prior_state() {
        let (db, _temp) = test_db();
        let sat = 42_000_000u64;

        let mut batch = BlockBatch::new(db.clone());
        apply_reveal(&mut batch, &ctx(100), &reveal_fixture(0xaa, sat, 0)).unwrap();
        batch.commit().unwrap();

        let mut batch = BlockBatch::new(db.clone());
        apply_transfer(&mut batch, &ctx(101), &transfer_fixture(sat, 7, 0, (100, 0), "bc1qb")).unwrap();
        batch.commit().unwrap();

        // Roll the transfer back
        let mut batch = BlockBatch::new(db.clone());
        let records = get_block_transfers(&db, 101).unwrap();
        rollback_sat_move(&mut batch, &records).unwrap();
        batch.commit().unwrap();

        let current = get_current_location(&db, sat).unwrap().unwrap();
        assert_eq!(current.block_height, 100);
        assert_eq!(current.address.as_deref(), Some("bc1qgenesis"));
        assert!(get_block_transfers(&db, 101).unwrap().is_empty());
        assert_eq!(batch::read_count(&db, CF_COUNTS, &address_count_key("bc1qb")).unwrap(), 0);
        assert_eq!(batch::read_count(&db, CF_COUNTS, &address_count_key("bc1qgenesis")).unwrap(), 1);

        // Roll the reveal back
        let mut batch = BlockBatch::new(db.clone());
        let row = get_inscription(&db, &format!("{}i0", "aa".repeat(32))).unwrap().unwrap();
        rollback_reveal(&mut batch, &ctx(100), &row).unwrap();
        batch.commit().unwrap();

        assert!(get_inscription(&db, &row.inscription_id).unwrap().is_none());
        assert!(get_current_location(&db, sat).unwrap().is_none());
        assert!(get_satoshi(&db, sat).unwrap().is_none());
        assert!(get_block_count(&db, 100).unwrap().is_none());
        assert_eq!(batch::read_count(&db, CF_COUNTS, &mime_count_key("text/plain")).unwrap(), 0);
    }

    #[test]
    fn test_recursion_scan() {
        let txid = "ab".repeat(32);
        let content = format!(
            "<html><img src=\"/content/{}i0\"/><img src=\"/content/{}i12\"/></html>",
            txid, txid
        );
        let refs = scan_recursion_refs(content.as_bytes());
        assert_eq!(refs, vec![format!("{}i0", txid), format!("{}i12", txid)]);

        assert!(scan_recursion_refs(b"no refs here").is_empty());
        assert!(scan_recursion_refs(b"/content/nothex").is_empty());
        // Truncated id is ignored
        assert!(scan_recursion_refs(format!("/content/{}", &txid[..40]).as_bytes()).is_empty());
    }

    #[test]
    fn test_number_extremes() {
        let (db, _temp) = test_db();
        let mut batch = BlockBatch::new(db.clone());
        let mut a = reveal_fixture(0xaa, 1000, -7);
        a.tx_index = 0;
        let mut b = reveal_fixture(0xbb, 2000, 0);
        b.tx_index = 1;
        let mut c = reveal_fixture(0xcc, 3000, 12);
        c.tx_index = 2;
        apply_reveal(&mut batch, &ctx(100), &a).unwrap();
        apply_reveal(&mut batch, &ctx(100), &b).unwrap();
        apply_reveal(&mut batch, &ctx(100), &c).unwrap();
        batch.commit().unwrap();

        let (blessed, cursed) = get_number_extremes(&db).unwrap();
        assert_eq!(blessed, Some(12));
        assert_eq!(cursed, Some(-7));
    }
}
