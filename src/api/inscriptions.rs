// Inscription API Endpoints
//
// Show, content, per-inscription transfer history, per-block transfers and
// the filtered index.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use rocksdb::DB;
use serde::Deserialize;

use crate::batch::{self, CF_INSC_BY_BLOCK, CF_INSC_BY_NUMBER, CF_INSC_BY_SAT, CF_LOCATIONS};
use crate::chain_state;
use crate::errors::ChainError;
use crate::inscriptions::{
    get_block_transfers, get_current_location, get_inscription, get_inscription_by_number,
    get_inscription_transfers, get_parent_refs, get_recursion_refs,
};
use crate::keys;
use crate::sat::{Sat, SatRarity};
use crate::types::{InscriptionRow, LocationRow};

use super::helpers::{
    bad_request, csv_terms, internal_error, is_inscription_id, not_found, page_bounds, paginate,
    ApiResult, PageQuery,
};
use super::types::{
    charm_names, satpoint, ApiError, BlockTransferView, InscriptionView, LocationView, Paginated,
};

/// Resolve `{id|number}` path parameters.
fn resolve_inscription(
    db: &Arc<DB>,
    param: &str,
) -> Result<Option<InscriptionRow>, (StatusCode, Json<ApiError>)> {
    if let Ok(number) = param.parse::<i64>() {
        return get_inscription_by_number(db, number).map_err(|e| internal_error(e.to_string()));
    }
    if !is_inscription_id(param) {
        return Err(bad_request("parameter must be an inscription id or number"));
    }
    get_inscription(db, param).map_err(|e| internal_error(e.to_string()))
}

pub fn build_inscription_view(
    db: &Arc<DB>,
    row: &InscriptionRow,
) -> Result<InscriptionView, ChainError> {
    let current = get_current_location(db, row.ordinal_number)?.ok_or_else(|| {
        ChainError::InvariantViolation(format!(
            "inscription {} has no current location",
            row.inscription_id
        ))
    })?;
    let sat = Sat::new(row.ordinal_number)?;
    Ok(InscriptionView {
        id: row.inscription_id.clone(),
        number: row.number,
        classic_number: row.classic_number,
        address: current.address.clone(),
        genesis_address: row.address.clone(),
        genesis_block_height: row.block_height,
        genesis_block_hash: row.block_hash.clone(),
        genesis_tx_id: row.tx_id.clone(),
        genesis_fee: row.fee.to_string(),
        genesis_timestamp: row.timestamp,
        tx_id: current.tx_id.clone(),
        location: satpoint(&current.output, current.offset),
        output: current.output.clone(),
        offset: current.offset.map(|v| v.to_string()),
        value: current.value.map(|v| v.to_string()),
        sat_ordinal: row.ordinal_number.to_string(),
        sat_rarity: sat.rarity().as_str().to_string(),
        sat_coinbase_height: sat.coinbase_height(),
        mime_type: row.mime_type.clone(),
        content_type: row.content_type.clone(),
        content_length: row.content_length,
        timestamp: current.timestamp,
        curse_type: row.curse_type.clone(),
        recursive: row.recursive,
        recursion_refs: get_recursion_refs(db, &row.inscription_id)?,
        parent_refs: get_parent_refs(db, &row.inscription_id)?,
        delegate: row.delegate.clone(),
        metaprotocol: row.metaprotocol.clone(),
        metadata: row
            .metadata
            .as_ref()
            .and_then(|text| serde_json::from_str(text).ok()),
        charms: charm_names(row.charms),
    })
}

/// GET /ordinals/v1/inscriptions/{id|number}
pub async fn inscription_show(
    Path(param): Path<String>,
    Extension(db): Extension<Arc<DB>>,
) -> ApiResult<InscriptionView> {
    let row = resolve_inscription(&db, &param)?
        .ok_or_else(|| not_found(format!("inscription {} not found", param)))?;
    build_inscription_view(&db, &row)
        .map(Json)
        .map_err(|e| internal_error(e.to_string()))
}

/// GET /ordinals/v1/inscriptions/{id|number}/content
///
/// Serves the raw content bytes with the inscribed content type. When the
/// inscription delegates and carries no content of its own, the delegate's
/// content is served instead.
pub async fn inscription_content(
    Path(param): Path<String>,
    Extension(db): Extension<Arc<DB>>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiError>)> {
    let row = resolve_inscription(&db, &param)?
        .ok_or_else(|| not_found(format!("inscription {} not found", param)))?;
    let (content_type, content) = if row.content.is_empty() && row.delegate.is_some() {
        let delegate_id = row.delegate.as_deref().unwrap_or_default();
        match get_inscription(&db, delegate_id).map_err(|e| internal_error(e.to_string()))? {
            Some(delegate) => (delegate.content_type, delegate.content),
            None => (row.content_type, row.content),
        }
    } else {
        (row.content_type, row.content)
    };
    Ok(([(header::CONTENT_TYPE, content_type)], content))
}

/// GET /ordinals/v1/inscriptions/{id|number}/transfers
///
/// Full location history, newest first; total includes the genesis
/// location.
pub async fn inscription_transfers(
    Path(param): Path<String>,
    Query(page): Query<PageQuery>,
    Extension(db): Extension<Arc<DB>>,
) -> ApiResult<Paginated<LocationView>> {
    let row = resolve_inscription(&db, &param)?
        .ok_or_else(|| not_found(format!("inscription {} not found", param)))?;
    let (limit, offset) = page.bounds();

    let mut locations: Vec<LocationView> = Vec::new();
    let genesis = location_at(&db, row.ordinal_number, row.block_height, row.tx_index)
        .map_err(|e| internal_error(e.to_string()))?
        .ok_or_else(|| internal_error("genesis location missing"))?;
    locations.push(LocationView::from_row(&genesis));
    let transfers = get_inscription_transfers(&db, &row.inscription_id)
        .map_err(|e| internal_error(e.to_string()))?;
    for record in transfers {
        let stop = location_at(&db, record.ordinal_number, record.block_height, record.tx_index)
            .map_err(|e| internal_error(e.to_string()))?
            .ok_or_else(|| internal_error("transfer location missing"))?;
        locations.push(LocationView::from_row(&stop));
    }
    locations.sort_by(|a, b| (b.block_height, b.tx_index).cmp(&(a.block_height, a.tx_index)));
    Ok(Json(paginate(locations, limit, offset)))
}

#[derive(Debug, Deserialize)]
pub struct BlockTransfersQuery {
    pub block: String,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// GET /ordinals/v1/inscriptions/transfers?block={height|hash}
pub async fn block_transfers(
    Query(query): Query<BlockTransfersQuery>,
    Extension(db): Extension<Arc<DB>>,
) -> ApiResult<Paginated<BlockTransferView>> {
    let height = if let Ok(height) = query.block.parse::<u64>() {
        height
    } else if query.block.len() == 64 && query.block.bytes().all(|b| b.is_ascii_hexdigit()) {
        chain_state::height_for_block_hash(&db, &query.block)
            .map_err(|e| internal_error(e.to_string()))?
            .ok_or_else(|| not_found(format!("block {} not found", query.block)))?
    } else {
        return Err(bad_request("block must be a height or a block hash"));
    };
    let (limit, offset) = page_bounds(query.limit, query.offset);

    let mut views = Vec::new();
    let records = get_block_transfers(&db, height).map_err(|e| internal_error(e.to_string()))?;
    for record in records {
        let from = location_at(&db, record.ordinal_number, record.from_block_height, record.from_tx_index)
            .map_err(|e| internal_error(e.to_string()))?
            .ok_or_else(|| internal_error("transfer source location missing"))?;
        let to = location_at(&db, record.ordinal_number, record.block_height, record.tx_index)
            .map_err(|e| internal_error(e.to_string()))?
            .ok_or_else(|| internal_error("transfer destination location missing"))?;
        views.push(BlockTransferView {
            id: record.inscription_id.clone(),
            number: record.number,
            from: LocationView::from_row(&from),
            to: LocationView::from_row(&to),
        });
    }
    Ok(Json(paginate(views, limit, offset)))
}

fn location_at(
    db: &Arc<DB>,
    ordinal_number: u64,
    height: u64,
    tx_index: u32,
) -> Result<Option<LocationRow>, ChainError> {
    batch::get_row(db, CF_LOCATIONS, &keys::location_key(ordinal_number, height, tx_index))
}

// ========== Filtered index ==========

#[derive(Debug, Default, Deserialize)]
pub struct InscriptionIndexQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub mime_type: Option<String>,
    pub rarity: Option<String>,
    pub id: Option<String>,
    pub number: Option<String>,
    pub from_genesis_block_height: Option<u64>,
    pub to_genesis_block_height: Option<u64>,
    pub genesis_block: Option<String>,
    pub from_genesis_timestamp: Option<u64>,
    pub to_genesis_timestamp: Option<u64>,
    pub from_sat_ordinal: Option<u64>,
    pub to_sat_ordinal: Option<u64>,
    pub from_sat_coinbase_height: Option<u64>,
    pub to_sat_coinbase_height: Option<u64>,
    pub from_number: Option<i64>,
    pub to_number: Option<i64>,
    pub output: Option<String>,
    pub address: Option<String>,
    pub genesis_address: Option<String>,
    pub cursed: Option<bool>,
    pub recursive: Option<bool>,
    pub order_by: Option<String>,
    pub order: Option<String>,
}

struct IndexFilters {
    mime_types: Option<Vec<String>>,
    rarities: Option<Vec<SatRarity>>,
    ids: Option<Vec<String>>,
    numbers: Option<Vec<i64>>,
    addresses: Option<Vec<String>>,
    genesis_addresses: Option<Vec<String>>,
    genesis_height: (Option<u64>, Option<u64>),
    genesis_block_hash: Option<String>,
    genesis_timestamp: (Option<u64>, Option<u64>),
    sat_ordinal: (Option<u64>, Option<u64>),
    sat_coinbase_height: (Option<u64>, Option<u64>),
    number_range: (Option<i64>, Option<i64>),
    output: Option<String>,
    cursed: Option<bool>,
    recursive: Option<bool>,
}

impl IndexFilters {
    fn from_query(
        query: &InscriptionIndexQuery,
    ) -> Result<Self, (StatusCode, Json<ApiError>)> {
        let rarities = match csv_terms(&query.rarity) {
            Some(terms) => {
                let mut parsed = Vec::with_capacity(terms.len());
                for term in &terms {
                    parsed.push(
                        SatRarity::parse(term)
                            .ok_or_else(|| bad_request(format!("unknown rarity {}", term)))?,
                    );
                }
                Some(parsed)
            }
            None => None,
        };
        let numbers = match csv_terms(&query.number) {
            Some(terms) => {
                let mut parsed = Vec::with_capacity(terms.len());
                for term in &terms {
                    parsed.push(
                        term.parse::<i64>()
                            .map_err(|_| bad_request(format!("invalid number {}", term)))?,
                    );
                }
                Some(parsed)
            }
            None => None,
        };
        // `genesis_block` accepts either form and folds into the height or
        // hash filter.
        let mut genesis_height = (query.from_genesis_block_height, query.to_genesis_block_height);
        let mut genesis_block_hash = None;
        if let Some(block) = &query.genesis_block {
            if let Ok(height) = block.parse::<u64>() {
                genesis_height = (Some(height), Some(height));
            } else if block.len() == 64 && block.bytes().all(|b| b.is_ascii_hexdigit()) {
                genesis_block_hash = Some(block.clone());
            } else {
                return Err(bad_request("genesis_block must be a height or a block hash"));
            }
        }
        Ok(Self {
            mime_types: csv_terms(&query.mime_type),
            rarities,
            ids: csv_terms(&query.id),
            numbers,
            addresses: csv_terms(&query.address),
            genesis_addresses: csv_terms(&query.genesis_address),
            genesis_height,
            genesis_block_hash,
            genesis_timestamp: (query.from_genesis_timestamp, query.to_genesis_timestamp),
            sat_ordinal: (query.from_sat_ordinal, query.to_sat_ordinal),
            sat_coinbase_height: (query.from_sat_coinbase_height, query.to_sat_coinbase_height),
            number_range: (query.from_number, query.to_number),
            output: query.output.clone(),
            cursed: query.cursed,
            recursive: query.recursive,
        })
    }

    fn matches(&self, row: &InscriptionRow, current: &LocationRow) -> Result<bool, ChainError> {
        if let Some(mime_types) = &self.mime_types {
            if !mime_types.iter().any(|m| *m == row.mime_type) {
                return Ok(false);
            }
        }
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|id| *id == row.inscription_id) {
                return Ok(false);
            }
        }
        if let Some(numbers) = &self.numbers {
            if !numbers.contains(&row.number) {
                return Ok(false);
            }
        }
        if let Some(addresses) = &self.addresses {
            if !addresses.iter().any(|a| Some(a.as_str()) == current.address.as_deref()) {
                return Ok(false);
            }
        }
        if let Some(addresses) = &self.genesis_addresses {
            if !addresses.iter().any(|a| Some(a.as_str()) == row.address.as_deref()) {
                return Ok(false);
            }
        }
        if !in_range(row.block_height, self.genesis_height) {
            return Ok(false);
        }
        if let Some(hash) = &self.genesis_block_hash {
            if *hash != row.block_hash {
                return Ok(false);
            }
        }
        if !in_range(row.timestamp, self.genesis_timestamp) {
            return Ok(false);
        }
        if !in_range(row.ordinal_number, self.sat_ordinal) {
            return Ok(false);
        }
        let sat = Sat::new(row.ordinal_number)?;
        if !in_range(sat.coinbase_height(), self.sat_coinbase_height) {
            return Ok(false);
        }
        if let Some(rarities) = &self.rarities {
            if !rarities.contains(&sat.rarity()) {
                return Ok(false);
            }
        }
        if let Some((from, to)) = range_pair(self.number_range) {
            if row.number < from || row.number > to {
                return Ok(false);
            }
        }
        if let Some(output) = &self.output {
            if *output != current.output {
                return Ok(false);
            }
        }
        if let Some(cursed) = self.cursed {
            if cursed != (row.number < 0) {
                return Ok(false);
            }
        }
        if let Some(recursive) = self.recursive {
            if recursive != row.recursive {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn in_range<T: PartialOrd>(value: T, range: (Option<T>, Option<T>)) -> bool {
    if let Some(from) = range.0 {
        if value < from {
            return false;
        }
    }
    if let Some(to) = range.1 {
        if value > to {
            return false;
        }
    }
    true
}

fn range_pair(range: (Option<i64>, Option<i64>)) -> Option<(i64, i64)> {
    match range {
        (None, None) => None,
        (from, to) => Some((from.unwrap_or(i64::MIN), to.unwrap_or(i64::MAX))),
    }
}

/// GET /ordinals/v1/inscriptions
///
/// Walks the order-preserving index matching the requested ordering and
/// filters in place; `total` counts every match.
pub async fn inscription_index(
    Query(query): Query<InscriptionIndexQuery>,
    Extension(db): Extension<Arc<DB>>,
) -> ApiResult<Paginated<InscriptionView>> {
    let (limit, offset) = page_bounds(query.limit, query.offset);
    let order_by = query.order_by.as_deref().unwrap_or("genesis_block_height");
    let descending = match query.order.as_deref() {
        Some("asc") => false,
        Some("desc") | None => true,
        Some(other) => return Err(bad_request(format!("unknown order {}", other))),
    };
    let filters = IndexFilters::from_query(&query)?;

    let index_cf = match order_by {
        "number" => CF_INSC_BY_NUMBER,
        "ordinal" => CF_INSC_BY_SAT,
        "rarity" => CF_INSC_BY_NUMBER,
        "genesis_block_height" => CF_INSC_BY_BLOCK,
        other => return Err(bad_request(format!("unknown order_by {}", other))),
    };

    let mut matched: Vec<(InscriptionRow, LocationRow)> = Vec::new();
    let entries = batch::scan_prefix(&db, index_cf, b"").map_err(|e| internal_error(e.to_string()))?;
    let mut current_cache: HashMap<u64, LocationRow> = HashMap::new();
    for (_, id_bytes) in entries {
        let id = String::from_utf8_lossy(&id_bytes).into_owned();
        let row = get_inscription(&db, &id)
            .map_err(|e| internal_error(e.to_string()))?
            .ok_or_else(|| internal_error("index points at missing inscription"))?;
        let current = match current_cache.get(&row.ordinal_number) {
            Some(current) => current.clone(),
            None => {
                let current = get_current_location(&db, row.ordinal_number)
                    .map_err(|e| internal_error(e.to_string()))?
                    .ok_or_else(|| internal_error("inscription without current location"))?;
                current_cache.insert(row.ordinal_number, current.clone());
                current
            }
        };
        if filters
            .matches(&row, &current)
            .map_err(|e| internal_error(e.to_string()))?
        {
            matched.push((row, current));
        }
    }

    if order_by == "rarity" {
        matched.sort_by_key(|(row, _)| {
            Sat::new(row.ordinal_number)
                .map(|s| s.rarity().rank())
                .unwrap_or(0)
        });
    }
    if descending {
        matched.reverse();
    }

    let total = matched.len();
    let mut results = Vec::new();
    for (row, _) in matched.into_iter().skip(offset).take(limit) {
        results.push(
            build_inscription_view(&db, &row).map_err(|e| internal_error(e.to_string()))?,
        );
    }
    Ok(Json(Paginated {
        limit,
        offset,
        total,
        results,
    }))
}
