// API Type Definitions
//
// Serializable views returned by the read endpoints. Everything that
// leaves the process is rendered here: charms become names, amounts become
// decimal strings, locations become satpoints.

use serde::{Deserialize, Serialize};

use crate::amount::render_amount;
use crate::charms::Charm;
use crate::types::{BalanceRow, BlockCountRow, LocationRow, OperationRow, TokenRow};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Shared list envelope: `{ limit, offset, total, results }`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Paginated<T> {
    pub limit: usize,
    pub offset: usize,
    pub total: usize,
    pub results: Vec<T>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StatusView {
    pub server_version: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_inscription_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cursed_inscription_number: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InscriptionView {
    pub id: String,
    pub number: i64,
    pub classic_number: i64,
    pub address: Option<String>,
    pub genesis_address: Option<String>,
    pub genesis_block_height: u64,
    pub genesis_block_hash: String,
    pub genesis_tx_id: String,
    pub genesis_fee: String,
    pub genesis_timestamp: u64,
    pub tx_id: String,
    pub location: String,
    pub output: String,
    pub offset: Option<String>,
    pub value: Option<String>,
    pub sat_ordinal: String,
    pub sat_rarity: String,
    pub sat_coinbase_height: u64,
    pub mime_type: String,
    pub content_type: String,
    pub content_length: u64,
    pub timestamp: u64,
    pub curse_type: Option<String>,
    pub recursive: bool,
    pub recursion_refs: Vec<String>,
    pub parent_refs: Vec<String>,
    pub delegate: Option<String>,
    pub metaprotocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub charms: Vec<String>,
}

/// One stop in an inscription's (or sat's) location history.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LocationView {
    pub block_height: u64,
    pub block_hash: String,
    pub tx_id: String,
    pub tx_index: u32,
    pub address: Option<String>,
    pub location: String,
    pub output: String,
    pub offset: Option<String>,
    pub value: Option<String>,
    pub transfer_type: String,
    pub timestamp: u64,
}

impl LocationView {
    pub fn from_row(row: &LocationRow) -> Self {
        Self {
            block_height: row.block_height,
            block_hash: row.block_hash.clone(),
            tx_id: row.tx_id.clone(),
            tx_index: row.tx_index,
            address: row.address.clone(),
            location: satpoint(&row.output, row.offset),
            output: row.output.clone(),
            offset: row.offset.map(|v| v.to_string()),
            value: row.value.map(|v| v.to_string()),
            transfer_type: row.transfer_type.as_str().to_string(),
            timestamp: row.timestamp,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BlockTransferView {
    pub id: String,
    pub number: i64,
    pub from: LocationView,
    pub to: LocationView,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SatView {
    pub ordinal: u64,
    pub coinbase_height: u64,
    pub cycle: u64,
    pub epoch: u64,
    pub period: u64,
    pub offset: u64,
    pub decimal: String,
    pub degree: String,
    pub name: String,
    pub percentile: String,
    pub rarity: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BlockCountView {
    pub block_height: u64,
    pub block_hash: String,
    pub inscription_count: u64,
    pub inscription_count_accum: u64,
    pub timestamp: u64,
}

impl BlockCountView {
    pub fn from_row(row: &BlockCountRow) -> Self {
        Self {
            block_height: row.block_height,
            block_hash: row.block_hash.clone(),
            inscription_count: row.inscription_count,
            inscription_count_accum: row.inscription_count_accum,
            timestamp: row.timestamp,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TokenView {
    pub ticker: String,
    pub inscription_id: String,
    pub inscription_number: i64,
    pub block_height: u64,
    pub block_hash: String,
    pub tx_id: String,
    pub address: String,
    pub max_supply: String,
    pub mint_limit: String,
    pub decimals: u8,
    pub self_mint: bool,
    pub minted_supply: String,
    pub tx_count: u64,
    pub deploy_timestamp: u64,
}

impl TokenView {
    pub fn from_row(row: &TokenRow) -> Self {
        Self {
            ticker: row.display_ticker.clone(),
            inscription_id: row.inscription_id.clone(),
            inscription_number: row.inscription_number,
            block_height: row.block_height,
            block_hash: row.block_hash.clone(),
            tx_id: row.tx_id.clone(),
            address: row.address.clone(),
            max_supply: render_amount(row.max, row.decimals),
            mint_limit: render_amount(row.limit, row.decimals),
            decimals: row.decimals,
            self_mint: row.self_mint,
            minted_supply: render_amount(row.minted_supply, row.decimals),
            tx_count: row.tx_count,
            deploy_timestamp: row.timestamp,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TokenSupplyView {
    pub max_supply: String,
    pub minted_supply: String,
    pub holders: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TokenDetailView {
    pub token: TokenView,
    pub supply: TokenSupplyView,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HolderView {
    pub address: String,
    pub overall_balance: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ActivityView {
    pub operation: String,
    pub ticker: String,
    pub inscription_id: String,
    pub inscription_number: i64,
    pub ordinal_number: u64,
    pub block_height: u64,
    pub block_hash: String,
    pub tx_id: String,
    pub output: String,
    pub offset: Option<String>,
    pub timestamp: u64,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_address: Option<String>,
    pub amount: String,
}

impl ActivityView {
    /// `decimals` and `display` come from the token row; the log stores the
    /// folded ticker and scaled amount.
    pub fn from_row(row: &OperationRow, display: &str, decimals: u8) -> Self {
        Self {
            operation: row.operation.as_str().to_string(),
            ticker: display.to_string(),
            inscription_id: row.inscription_id.clone(),
            inscription_number: row.inscription_number,
            ordinal_number: row.ordinal_number,
            block_height: row.block_height,
            block_hash: row.block_hash.clone(),
            tx_id: row.tx_id.clone(),
            output: row.output.clone(),
            offset: row.offset.map(|v| v.to_string()),
            timestamp: row.timestamp,
            address: row.address.clone(),
            to_address: row.to_address.clone(),
            amount: render_amount(row.amount, decimals),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AddressBalanceView {
    pub ticker: String,
    pub available_balance: String,
    pub transferrable_balance: String,
    pub overall_balance: String,
}

impl AddressBalanceView {
    pub fn from_row(display: &str, balance: &BalanceRow, decimals: u8) -> Self {
        Self {
            ticker: display.to_string(),
            available_balance: render_amount(balance.avail, decimals),
            transferrable_balance: render_amount(balance.trans, decimals),
            overall_balance: render_amount(balance.total(), decimals),
        }
    }
}

/// `output:offset` rendering of a satpoint.
pub fn satpoint(output: &str, offset: Option<u64>) -> String {
    match offset {
        Some(offset) => format!("{}:{}", output, offset),
        None => output.to_string(),
    }
}

/// Decoded charm names for a stored bitfield.
pub fn charm_names(bitfield: u16) -> Vec<String> {
    Charm::decode(bitfield).into_iter().map(str::to_string).collect()
}
