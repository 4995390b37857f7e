/// Block Directive Controller
///
/// Orchestrates the apply vs rollback direction of the ingest protocol.
/// An apply is accepted only when the incoming block's parent hash matches
/// the stored tip (or the store is empty); otherwise the controller rolls
/// its own tip back, in descending height order, until the parents align.
/// Rollbacks are driven entirely from the store, so a stale fork can be
/// unwound without its original payloads.
///
/// Within a block, ordinal operations apply first and BRC-20 operations
/// second, all staged in one BlockBatch and committed atomically across
/// both schemas.

use std::sync::Arc;

use rocksdb::DB;
use tracing::{info, warn};

use crate::batch::BlockBatch;
use crate::brc20::{self, Brc20Config};
use crate::chain_state;
use crate::errors::ChainError;
use crate::inscriptions;
use crate::metrics;
use crate::types::{
    BlockContext, BlockDirective, BlockPayload, ChainTipRow, InscriptionRow, OrdinalOperation,
    TransferRow,
};

/// Apply or roll back one directive. Returns the tip after the commit.
pub fn process_directive(
    db: &Arc<DB>,
    config: &Brc20Config,
    directive: &BlockDirective,
) -> Result<Option<ChainTipRow>, ChainError> {
    match directive {
        BlockDirective::Apply(payload) => apply_block(db, config, payload),
        BlockDirective::Rollback(payload) => {
            let tip = chain_state::read_tip(db)?.ok_or_else(|| {
                ChainError::BlockStream("rollback directive against an empty store".into())
            })?;
            if tip.block_hash != payload.block.hash {
                // Rollback of a block this indexer never applied (or that is
                // no longer the tip) is refused; the store stays put.
                return Err(ChainError::BlockStream(format!(
                    "rollback of {} but tip is {} at height {}",
                    payload.block.hash, tip.block_hash, tip.block_height
                )));
            }
            rollback_tip_block(db, &tip)
        }
    }
}

fn apply_block(
    db: &Arc<DB>,
    config: &Brc20Config,
    payload: &BlockPayload,
) -> Result<Option<ChainTipRow>, ChainError> {
    // Align the store with the incoming block's parent, unwinding any
    // stale fork tip first.
    loop {
        match chain_state::read_tip(db)? {
            None => break,
            Some(tip) if tip.block_hash == payload.parent.hash => break,
            Some(tip) if tip.block_height + 1 >= payload.block.index => {
                warn!(
                    tip_height = tip.block_height,
                    incoming = payload.block.index,
                    "tip does not match incoming parent, rolling back"
                );
                rollback_tip_block(db, &tip)?;
            }
            Some(tip) => {
                return Err(ChainError::BlockStream(format!(
                    "gap in block stream: tip at {} cannot reach block {}",
                    tip.block_height, payload.block.index
                )));
            }
        }
    }

    let ctx = BlockContext::from_payload(payload);
    let mut batch = BlockBatch::new(db.clone());

    let mut reveals = 0u64;
    let mut transfers = 0u64;
    for op in &payload.ordinal_ops {
        match op {
            OrdinalOperation::InscriptionRevealed(reveal) => {
                inscriptions::apply_reveal(&mut batch, &ctx, reveal)?;
                reveals += 1;
            }
            OrdinalOperation::InscriptionTransferred(transfer) => {
                inscriptions::apply_transfer(&mut batch, &ctx, transfer)?;
                transfers += 1;
            }
        }
    }

    let mut intra = 0u32;
    let mut applied = 0u64;
    let mut rejected = 0u64;
    for event in &payload.brc20_ops {
        let op_label = match event {
            crate::types::Brc20Event::Deploy(_) => "deploy",
            crate::types::Brc20Event::Mint(_) => "mint",
            crate::types::Brc20Event::Transfer(_) => "transfer",
            crate::types::Brc20Event::TransferSend(_) => "transfer_send",
        };
        if brc20::apply_operation(&mut batch, config, &ctx, &mut intra, event)? {
            metrics::BRC20_OPERATIONS.with_label_values(&[op_label, "applied"]).inc();
            applied += 1;
        } else {
            metrics::BRC20_OPERATIONS.with_label_values(&[op_label, "rejected"]).inc();
            rejected += 1;
        }
    }

    chain_state::stage_apply(&mut batch, &ctx)?;
    batch.commit()?;

    metrics::BLOCKS_APPLIED.inc();
    metrics::INSCRIPTIONS_INDEXED.inc_by(reveals);
    metrics::TRANSFERS_INDEXED.inc_by(transfers);
    metrics::CHAIN_TIP_HEIGHT.set(ctx.height as i64);
    info!(
        height = ctx.height,
        reveals,
        transfers,
        brc20_applied = applied,
        brc20_rejected = rejected,
        "block applied"
    );

    Ok(Some(ChainTipRow {
        block_height: ctx.height,
        block_hash: ctx.hash,
    }))
}

/// One step in apply order: a reveal or a whole sat move (several transfer
/// records when the sat carries reinscriptions).
enum BlockStep {
    Reveal(InscriptionRow),
    SatMove(Vec<TransferRow>),
}

impl BlockStep {
    /// (tx_index, kind) apply-order key; at equal tx_index the reveal comes
    /// first, so its inverse runs last.
    fn order(&self) -> (u32, u8) {
        match self {
            BlockStep::Reveal(row) => (row.tx_index, 0),
            BlockStep::SatMove(rows) => (rows[0].tx_index, 1),
        }
    }
}

/// Unwind the tip block using only stored state, in exact inverse order of
/// its application.
pub fn rollback_tip_block(
    db: &Arc<DB>,
    tip: &ChainTipRow,
) -> Result<Option<ChainTipRow>, ChainError> {
    let ctx = BlockContext {
        height: tip.block_height,
        hash: tip.block_hash.clone(),
        timestamp: 0,
    };
    let mut batch = BlockBatch::new(db.clone());

    // BRC-20 applied last, so it unwinds first.
    brc20::rollback_block(&mut batch, &ctx)?;

    let mut steps: Vec<BlockStep> = Vec::new();
    for id in inscriptions::get_block_inscription_ids(db, ctx.height)? {
        let row = inscriptions::get_inscription(db, &id)?.ok_or_else(|| {
            ChainError::InvariantViolation(format!("block index points at missing inscription {}", id))
        })?;
        steps.push(BlockStep::Reveal(row));
    }
    let mut move_group: Vec<TransferRow> = Vec::new();
    for record in inscriptions::get_block_transfers(db, ctx.height)? {
        if let Some(last) = move_group.last() {
            if last.block_transfer_index != record.block_transfer_index {
                steps.push(BlockStep::SatMove(std::mem::take(&mut move_group)));
            }
        }
        move_group.push(record);
    }
    if !move_group.is_empty() {
        steps.push(BlockStep::SatMove(move_group));
    }
    steps.sort_by_key(|step| step.order());

    for step in steps.iter().rev() {
        match step {
            BlockStep::Reveal(row) => inscriptions::rollback_reveal(&mut batch, &ctx, row)?,
            BlockStep::SatMove(rows) => inscriptions::rollback_sat_move(&mut batch, rows)?,
        }
    }

    let previous = chain_state::stage_rollback(db, &mut batch, &ctx)?;
    batch.commit()?;

    metrics::BLOCKS_ROLLED_BACK.inc();
    metrics::CHAIN_TIP_HEIGHT.set(previous.as_ref().map(|t| t.block_height as i64).unwrap_or(0));
    info!(height = ctx.height, "block rolled back");

    Ok(previous)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::open_db;
    use crate::types::{BlockIdentifier, InscriptionRevealed};
    use tempfile::TempDir;

    fn test_db() -> (Arc<DB>, TempDir) {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(open_db(temp.path()).unwrap());
        (db, temp)
    }

    fn hash_of(height: u64, fork: u8) -> String {
        format!("{:02x}{:062x}", fork, height)
    }

    fn reveal(seed: u8, sat: u64, number: i64) -> OrdinalOperation {
        let tx_id = format!("{:02x}", seed).repeat(32);
        OrdinalOperation::InscriptionRevealed(InscriptionRevealed {
            inscription_id: format!("{}i0", tx_id),
            ordinal_number: sat,
            number,
            classic_number: number,
            tx_id: tx_id.clone(),
            tx_index: seed as u32,
            input_index: 0,
            address: Some("bc1qowner".to_string()),
            mime_type: "image/png".to_string(),
            content_type: "image/png".to_string(),
            content_length: 4,
            content: hex::encode(b"data"),
            fee: 700,
            curse_type: None,
            pointer: None,
            metadata: None,
            metaprotocol: None,
            delegate: None,
            parent_refs: vec![],
            charms: 0,
            output: format!("{}:0", tx_id),
            offset: Some(0),
            value: Some(546),
        })
    }

    fn payload(height: u64, fork: u8, ops: Vec<OrdinalOperation>) -> BlockPayload {
        BlockPayload {
            block: BlockIdentifier {
                index: height,
                hash: hash_of(height, fork),
            },
            parent: BlockIdentifier {
                index: height - 1,
                hash: hash_of(height - 1, fork),
            },
            timestamp: 1_677_000_000 + height,
            ordinal_ops: ops,
            brc20_ops: vec![],
        }
    }

    #[test]
    fn test_apply_then_rollback_directives() {
        let (db, _temp) = test_db();
        let config = Brc20Config::default();

        // Blocks 100..=102, one reveal each. The first apply lands on an
        // empty store, so its parent is not checked.
        for (height, seed) in [(100u64, 1u8), (101, 2), (102, 3)] {
            let p = payload(height, 0, vec![reveal(seed, 1000 * height, height as i64)]);
            process_directive(&db, &config, &BlockDirective::Apply(p)).unwrap();
        }
        assert_eq!(chain_state::read_tip(&db).unwrap().unwrap().block_height, 102);

        // Reorg scenario: rollback 102 then 101.
        for height in [102u64, 101] {
            let p = payload(height, 0, vec![]);
            process_directive(&db, &config, &BlockDirective::Rollback(p)).unwrap();
        }
        let tip = chain_state::read_tip(&db).unwrap().unwrap();
        assert_eq!(tip.block_height, 100);
        assert!(inscriptions::get_inscription_by_number(&db, 101).unwrap().is_none());
        assert!(inscriptions::get_inscription_by_number(&db, 102).unwrap().is_none());
        assert!(inscriptions::get_block_count(&db, 101).unwrap().is_none());
        assert!(inscriptions::get_block_count(&db, 102).unwrap().is_none());
        assert!(inscriptions::get_current_location(&db, 101_000).unwrap().is_none());
        assert!(inscriptions::get_current_location(&db, 102_000).unwrap().is_none());
        assert_eq!(
            crate::batch::read_count(
                &db,
                crate::batch::CF_COUNTS,
                &inscriptions::mime_count_key("image/png")
            )
            .unwrap(),
            1
        );
    }

    #[test]
    fn test_out_of_order_apply_self_aligns() {
        let (db, _temp) = test_db();
        let config = Brc20Config::default();

        process_directive(
            &db,
            &config,
            &BlockDirective::Apply(payload(100, 0, vec![reveal(1, 100_000, 0)])),
        )
        .unwrap();
        process_directive(
            &db,
            &config,
            &BlockDirective::Apply(payload(101, 0, vec![reveal(2, 101_000, 1)])),
        )
        .unwrap();

        // A competing fork re-issues 101 with a different hash; the
        // controller rolls back its own 101 before applying.
        let forked = payload(101, 9, vec![reveal(3, 201_000, 1)]);
        // Fork parent at 100 matches the canonical chain
        let forked = BlockPayload {
            parent: BlockIdentifier {
                index: 100,
                hash: hash_of(100, 0),
            },
            ..forked
        };
        process_directive(&db, &config, &BlockDirective::Apply(forked)).unwrap();

        let tip = chain_state::read_tip(&db).unwrap().unwrap();
        assert_eq!(tip.block_height, 101);
        assert_eq!(tip.block_hash, hash_of(101, 9));
        assert!(inscriptions::get_current_location(&db, 101_000).unwrap().is_none());
        assert!(inscriptions::get_current_location(&db, 201_000).unwrap().is_some());
    }

    #[test]
    fn test_rollback_of_unknown_block_is_refused() {
        let (db, _temp) = test_db();
        let config = Brc20Config::default();
        let err = process_directive(
            &db,
            &config,
            &BlockDirective::Rollback(payload(100, 0, vec![])),
        )
        .unwrap_err();
        assert!(matches!(err, ChainError::BlockStream(_)));

        process_directive(&db, &config, &BlockDirective::Apply(payload(100, 0, vec![]))).unwrap();
        // Not the tip hash
        let err = process_directive(
            &db,
            &config,
            &BlockDirective::Rollback(payload(100, 9, vec![])),
        )
        .unwrap_err();
        assert!(matches!(err, ChainError::BlockStream(_)));
        assert_eq!(chain_state::read_tip(&db).unwrap().unwrap().block_height, 100);
    }

    #[test]
    fn test_gap_is_an_error() {
        let (db, _temp) = test_db();
        let config = Brc20Config::default();
        process_directive(&db, &config, &BlockDirective::Apply(payload(100, 0, vec![]))).unwrap();
        let err = process_directive(
            &db,
            &config,
            &BlockDirective::Apply(payload(105, 0, vec![])),
        )
        .unwrap_err();
        assert!(matches!(err, ChainError::BlockStream(_)));
    }
}
