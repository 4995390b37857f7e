/// Core domain types: the block-directive event model consumed by the
/// ingest writer, and the row structs persisted in RocksDB.
///
/// The event stream is a tagged union per event kind; upstream produces
/// structured operations, so nothing here parses raw transactions.

use serde::{Deserialize, Serialize};

// ========== Block identity ==========

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIdentifier {
    pub index: u64,
    pub hash: String,
}

/// One block worth of structured operations, plus its position in the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockPayload {
    pub block: BlockIdentifier,
    pub parent: BlockIdentifier,
    pub timestamp: u64,
    #[serde(default)]
    pub ordinal_ops: Vec<OrdinalOperation>,
    #[serde(default)]
    pub brc20_ops: Vec<Brc20Event>,
}

/// Apply or rollback, the two directions of the ingest protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum BlockDirective {
    Apply(BlockPayload),
    Rollback(BlockPayload),
}

impl BlockDirective {
    pub fn payload(&self) -> &BlockPayload {
        match self {
            BlockDirective::Apply(p) => p,
            BlockDirective::Rollback(p) => p,
        }
    }
}

/// Identity and timestamp of the block currently being applied or rolled
/// back; threaded through the appliers.
#[derive(Debug, Clone)]
pub struct BlockContext {
    pub height: u64,
    pub hash: String,
    pub timestamp: u64,
}

impl BlockContext {
    pub fn from_payload(payload: &BlockPayload) -> Self {
        Self {
            height: payload.block.index,
            hash: payload.block.hash.clone(),
            timestamp: payload.timestamp,
        }
    }
}

// ========== Ordinal operations ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrdinalOperation {
    InscriptionRevealed(InscriptionRevealed),
    InscriptionTransferred(InscriptionTransferred),
}

/// How a sat left its previous output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    Transferred,
    SpentInFees,
    Burnt,
}

impl TransferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferType::Transferred => "transferred",
            TransferType::SpentInFees => "spent_in_fees",
            TransferType::Burnt => "burnt",
        }
    }
}

/// Inscription reveal event: the full inscription plus its genesis satpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InscriptionRevealed {
    pub inscription_id: String,
    pub ordinal_number: u64,
    /// Blessed (>= 0) or cursed (< 0) jubilee number.
    pub number: i64,
    /// Legacy numbering; may differ from `number` post-jubilee.
    pub classic_number: i64,
    pub tx_id: String,
    pub tx_index: u32,
    pub input_index: u32,
    pub address: Option<String>,
    pub mime_type: String,
    pub content_type: String,
    pub content_length: u64,
    /// Hex-encoded content bytes.
    pub content: String,
    pub fee: u64,
    pub curse_type: Option<String>,
    pub pointer: Option<u64>,
    /// JSON text of the CBOR metadata envelope, if any.
    pub metadata: Option<String>,
    pub metaprotocol: Option<String>,
    pub delegate: Option<String>,
    #[serde(default)]
    pub parent_refs: Vec<String>,
    pub charms: u16,
    /// Genesis satpoint.
    pub output: String,
    pub offset: Option<u64>,
    pub value: Option<u64>,
}

/// Post-genesis move of a sat (and every inscription riding on it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InscriptionTransferred {
    pub ordinal_number: u64,
    pub tx_id: String,
    pub tx_index: u32,
    pub destination_address: Option<String>,
    pub output: String,
    pub offset: Option<u64>,
    pub value: Option<u64>,
    pub transfer_type: TransferType,
    pub from_block_height: u64,
    pub from_tx_index: u32,
    /// Disambiguates multiple moves of the same sat within one block.
    pub block_transfer_index: u32,
}

// ========== BRC-20 operations ==========

/// Transaction-level context shared by every BRC-20 event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brc20EventContext {
    pub inscription_id: String,
    pub inscription_number: i64,
    pub ordinal_number: u64,
    pub tx_id: String,
    pub tx_index: u32,
    pub output: String,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Brc20Event {
    Deploy(Brc20DeployEvent),
    Mint(Brc20BalanceEvent),
    Transfer(Brc20BalanceEvent),
    TransferSend(Brc20TransferSendEvent),
}

impl Brc20Event {
    pub fn context(&self) -> &Brc20EventContext {
        match self {
            Brc20Event::Deploy(e) => &e.ctx,
            Brc20Event::Mint(e) => &e.ctx,
            Brc20Event::Transfer(e) => &e.ctx,
            Brc20Event::TransferSend(e) => &e.ctx,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brc20DeployEvent {
    #[serde(flatten)]
    pub ctx: Brc20EventContext,
    /// Ticker exactly as inscribed; folding happens in the interpreter.
    pub tick: String,
    pub max: String,
    pub lim: String,
    pub dec: String,
    pub address: String,
    #[serde(default)]
    pub self_mint: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brc20BalanceEvent {
    #[serde(flatten)]
    pub ctx: Brc20EventContext,
    pub tick: String,
    pub amount: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brc20TransferSendEvent {
    #[serde(flatten)]
    pub ctx: Brc20EventContext,
    pub tick: String,
    pub amount: String,
    pub sender_address: String,
    pub receiver_address: String,
}

// ========== Stored rows (bincode-encoded) ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InscriptionRow {
    pub inscription_id: String,
    pub ordinal_number: u64,
    pub number: i64,
    pub classic_number: i64,
    pub block_height: u64,
    pub block_hash: String,
    pub tx_id: String,
    pub tx_index: u32,
    pub input_index: u32,
    pub address: Option<String>,
    pub mime_type: String,
    pub content_type: String,
    pub content_length: u64,
    pub content: Vec<u8>,
    pub fee: u64,
    pub curse_type: Option<String>,
    pub recursive: bool,
    pub pointer: Option<u64>,
    pub metadata: Option<String>,
    pub metaprotocol: Option<String>,
    pub delegate: Option<String>,
    pub timestamp: u64,
    pub charms: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatoshiRow {
    pub ordinal_number: u64,
    pub rarity: String,
    pub coinbase_height: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRow {
    pub ordinal_number: u64,
    pub block_height: u64,
    pub tx_index: u32,
    pub tx_id: String,
    pub block_hash: String,
    pub address: Option<String>,
    pub output: String,
    pub offset: Option<u64>,
    pub prev_output: Option<String>,
    pub prev_offset: Option<u64>,
    pub value: Option<u64>,
    pub transfer_type: TransferType,
    pub timestamp: u64,
}

/// One post-genesis move of one inscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRow {
    pub inscription_id: String,
    pub number: i64,
    pub ordinal_number: u64,
    pub block_height: u64,
    pub tx_index: u32,
    pub from_block_height: u64,
    pub from_tx_index: u32,
    pub block_transfer_index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockCountRow {
    pub block_height: u64,
    pub block_hash: String,
    pub inscription_count: u64,
    pub inscription_count_accum: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainTipRow {
    pub block_height: u64,
    pub block_hash: String,
}

// ========== BRC-20 rows ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRow {
    /// Case-folded identity.
    pub ticker: String,
    /// Casing from the first valid deploy.
    pub display_ticker: String,
    pub inscription_id: String,
    pub inscription_number: i64,
    pub block_height: u64,
    pub block_hash: String,
    pub tx_id: String,
    pub tx_index: u32,
    pub address: String,
    /// Fixed-point integers scaled by `decimals`.
    pub max: u128,
    pub limit: u128,
    pub decimals: u8,
    pub self_mint: bool,
    pub minted_supply: u128,
    pub tx_count: u64,
    pub timestamp: u64,
}

/// Available/transferable split; total is always computed as the sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BalanceRow {
    pub avail: u128,
    pub trans: u128,
}

impl BalanceRow {
    pub fn total(&self) -> u128 {
        self.avail + self.trans
    }

    pub fn is_zero(&self) -> bool {
        self.avail == 0 && self.trans == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Brc20OpKind {
    Deploy,
    Mint,
    Transfer,
    TransferSend,
    TransferReceive,
}

impl Brc20OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Brc20OpKind::Deploy => "deploy",
            Brc20OpKind::Mint => "mint",
            Brc20OpKind::Transfer => "transfer",
            Brc20OpKind::TransferSend => "transfer_send",
            Brc20OpKind::TransferReceive => "transfer_receive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deploy" => Some(Brc20OpKind::Deploy),
            "mint" => Some(Brc20OpKind::Mint),
            "transfer" => Some(Brc20OpKind::Transfer),
            "transfer_send" => Some(Brc20OpKind::TransferSend),
            "transfer_receive" => Some(Brc20OpKind::TransferReceive),
            _ => None,
        }
    }
}

/// Append-only BRC-20 operation log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRow {
    pub ticker: String,
    pub operation: Brc20OpKind,
    pub inscription_id: String,
    pub inscription_number: i64,
    pub ordinal_number: u64,
    pub block_height: u64,
    pub block_hash: String,
    pub tx_id: String,
    pub tx_index: u32,
    /// Position of the operation inside its block, assigned by the applier.
    pub intra_block_index: u32,
    pub output: String,
    pub offset: Option<u64>,
    pub timestamp: u64,
    pub address: String,
    pub to_address: Option<String>,
    pub amount: u128,
}

/// Outstanding (ticker, amount) binding of a transfer inscription that has
/// not been sent yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferBindingRow {
    pub ticker: String,
    pub amount: u128,
    pub address: String,
    pub inscription_number: i64,
    pub ordinal_number: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_round_trips_through_json() {
        let payload = BlockPayload {
            block: BlockIdentifier { index: 800000, hash: "00aa".into() },
            parent: BlockIdentifier { index: 799999, hash: "0099".into() },
            timestamp: 1_700_000_000,
            ordinal_ops: vec![OrdinalOperation::InscriptionTransferred(InscriptionTransferred {
                ordinal_number: 257418248345364,
                tx_id: "ff".repeat(32),
                tx_index: 30,
                destination_address: Some("bc1qdest".into()),
                output: format!("{}:0", "ff".repeat(32)),
                offset: Some(0),
                value: Some(9000),
                transfer_type: TransferType::Transferred,
                from_block_height: 775617,
                from_tx_index: 0,
                block_transfer_index: 0,
            })],
            brc20_ops: vec![],
        };
        let json = serde_json::to_string(&BlockDirective::Apply(payload)).unwrap();
        assert!(json.contains("\"directive\":\"apply\""));
        assert!(json.contains("\"kind\":\"inscription_transferred\""));
        let back: BlockDirective = serde_json::from_str(&json).unwrap();
        assert_eq!(back.payload().block.index, 800000);
    }

    #[test]
    fn test_brc20_event_tagging() {
        let json = r#"{
            "op": "mint",
            "inscription_id": "abci0",
            "inscription_number": 5,
            "ordinal_number": 1000,
            "tx_id": "ab",
            "tx_index": 2,
            "output": "ab:0",
            "offset": 0,
            "tick": "PEPE",
            "amount": "10000",
            "address": "bc1qminter"
        }"#;
        let ev: Brc20Event = serde_json::from_str(json).unwrap();
        match ev {
            Brc20Event::Mint(m) => {
                assert_eq!(m.tick, "PEPE");
                assert_eq!(m.ctx.tx_index, 2);
            }
            other => panic!("expected mint, got {:?}", other),
        }
    }

    #[test]
    fn test_balance_total_is_sum() {
        let b = BalanceRow { avail: 7, trans: 5 };
        assert_eq!(b.total(), 12);
        assert!(!b.is_zero());
        assert!(BalanceRow::default().is_zero());
    }
}
