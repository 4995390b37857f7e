// BRC-20 API Endpoints
//
// Token index and detail, holders, the activity feed and address balances
// (current and as-of-block).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query};
use axum::{Extension, Json};
use rocksdb::DB;
use serde::Deserialize;

use crate::brc20::{
    fold_ticker, get_token, list_address_balances, list_address_balances_at, list_holders,
    list_operations_desc, list_tokens,
};
use crate::types::{Brc20OpKind, TokenRow};

use super::helpers::{
    bad_request, csv_terms, internal_error, not_found, page_bounds, paginate, ApiResult, PageQuery,
};
use super::types::{
    ActivityView, AddressBalanceView, HolderView, Paginated, TokenDetailView, TokenSupplyView,
    TokenView,
};

#[derive(Debug, Default, Deserialize)]
pub struct TokensQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Comma-separated, case-insensitive ticker prefixes.
    pub ticker: Option<String>,
    pub order_by: Option<String>,
}

/// GET /ordinals/brc-20/tokens
pub async fn tokens_index(
    Query(query): Query<TokensQuery>,
    Extension(db): Extension<Arc<DB>>,
) -> ApiResult<Paginated<TokenView>> {
    let (limit, offset) = page_bounds(query.limit, query.offset);
    let prefixes: Option<Vec<String>> =
        csv_terms(&query.ticker).map(|terms| terms.iter().map(|t| fold_ticker(t)).collect());

    let mut tokens: Vec<TokenRow> = list_tokens(&db)
        .map_err(|e| internal_error(e.to_string()))?
        .into_iter()
        .filter(|token| match &prefixes {
            Some(prefixes) => prefixes.iter().any(|p| token.ticker.starts_with(p.as_str())),
            None => true,
        })
        .collect();

    match query.order_by.as_deref() {
        Some("tx_count") => tokens.sort_by(|a, b| b.tx_count.cmp(&a.tx_count)),
        // Deploy order is how list_tokens returns them.
        None | Some("index") => {}
        Some(other) => return Err(bad_request(format!("unknown order_by {}", other))),
    }

    let views: Vec<TokenView> = tokens.iter().map(TokenView::from_row).collect();
    Ok(Json(paginate(views, limit, offset)))
}

/// GET /ordinals/brc-20/tokens/{ticker}
pub async fn token_show(
    Path(ticker): Path<String>,
    Extension(db): Extension<Arc<DB>>,
) -> ApiResult<TokenDetailView> {
    let token = get_token(&db, &ticker)
        .map_err(|e| internal_error(e.to_string()))?
        .ok_or_else(|| not_found(format!("token {} not found", ticker)))?;
    let holders = list_holders(&db, &token.ticker).map_err(|e| internal_error(e.to_string()))?;
    let view = TokenView::from_row(&token);
    Ok(Json(TokenDetailView {
        supply: TokenSupplyView {
            max_supply: view.max_supply.clone(),
            minted_supply: view.minted_supply.clone(),
            holders: holders.len(),
        },
        token: view,
    }))
}

/// GET /ordinals/brc-20/tokens/{ticker}/holders
///
/// (address, overall balance) descending by balance.
pub async fn token_holders(
    Path(ticker): Path<String>,
    Query(page): Query<PageQuery>,
    Extension(db): Extension<Arc<DB>>,
) -> ApiResult<Paginated<HolderView>> {
    let token = get_token(&db, &ticker)
        .map_err(|e| internal_error(e.to_string()))?
        .ok_or_else(|| not_found(format!("token {} not found", ticker)))?;
    let (limit, offset) = page.bounds();

    let mut holders = list_holders(&db, &token.ticker).map_err(|e| internal_error(e.to_string()))?;
    holders.sort_by(|a, b| b.1.total().cmp(&a.1.total()).then_with(|| a.0.cmp(&b.0)));
    let views: Vec<HolderView> = holders
        .iter()
        .map(|(address, balance)| HolderView {
            address: address.clone(),
            overall_balance: crate::amount::render_amount(balance.total(), token.decimals),
        })
        .collect();
    Ok(Json(paginate(views, limit, offset)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub ticker: Option<String>,
    pub operation: Option<String>,
    pub address: Option<String>,
    pub block_height: Option<u64>,
}

/// GET /ordinals/brc-20/activity
///
/// The address filter matches the sender of send-style operations and the
/// receiver of receive-style ones, so one query shows a participant's own
/// movements.
pub async fn activity(
    Query(query): Query<ActivityQuery>,
    Extension(db): Extension<Arc<DB>>,
) -> ApiResult<Paginated<ActivityView>> {
    let (limit, offset) = page_bounds(query.limit, query.offset);
    let operation = match &query.operation {
        Some(op) => Some(
            Brc20OpKind::parse(op).ok_or_else(|| bad_request(format!("unknown operation {}", op)))?,
        ),
        None => None,
    };
    let folded = query.ticker.as_deref().map(fold_ticker);

    let rows = list_operations_desc(
        &db,
        folded.as_deref(),
        query.address.as_deref(),
        query.block_height,
    )
    .map_err(|e| internal_error(e.to_string()))?;

    let mut token_cache: HashMap<String, TokenRow> = HashMap::new();
    let mut views = Vec::new();
    for row in rows {
        if let Some(folded) = &folded {
            if row.ticker != *folded {
                continue;
            }
        }
        if let Some(operation) = operation {
            if row.operation != operation {
                continue;
            }
        }
        if let Some(height) = query.block_height {
            if row.block_height != height {
                continue;
            }
        }
        let token = match token_cache.get(&row.ticker) {
            Some(token) => token.clone(),
            None => {
                let token = get_token(&db, &row.ticker)
                    .map_err(|e| internal_error(e.to_string()))?
                    .ok_or_else(|| internal_error("operation log references unknown token"))?;
                token_cache.insert(row.ticker.clone(), token.clone());
                token
            }
        };
        views.push(ActivityView::from_row(&row, &token.display_ticker, token.decimals));
    }
    Ok(Json(paginate(views, limit, offset)))
}

#[derive(Debug, Default, Deserialize)]
pub struct BalancesQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Comma-separated, case-insensitive ticker prefixes.
    pub ticker: Option<String>,
    /// Serve balances as of the end of this block instead of the tip.
    pub block_height: Option<u64>,
}

/// GET /ordinals/brc-20/balances/{address}
pub async fn address_balances(
    Path(address): Path<String>,
    Query(query): Query<BalancesQuery>,
    Extension(db): Extension<Arc<DB>>,
) -> ApiResult<Paginated<AddressBalanceView>> {
    let (limit, offset) = page_bounds(query.limit, query.offset);
    let prefixes: Option<Vec<String>> =
        csv_terms(&query.ticker).map(|terms| terms.iter().map(|t| fold_ticker(t)).collect());

    let balances = match query.block_height {
        Some(height) => list_address_balances_at(&db, &address, height),
        None => list_address_balances(&db, &address),
    }
    .map_err(|e| internal_error(e.to_string()))?;

    let mut views = Vec::new();
    for (ticker, balance) in balances {
        if let Some(prefixes) = &prefixes {
            if !prefixes.iter().any(|p| ticker.starts_with(p.as_str())) {
                continue;
            }
        }
        if balance.is_zero() {
            continue;
        }
        let token = get_token(&db, &ticker)
            .map_err(|e| internal_error(e.to_string()))?
            .ok_or_else(|| internal_error("balance references unknown token"))?;
        views.push(AddressBalanceView::from_row(
            &token.display_ticker,
            &balance,
            token.decimals,
        ));
    }
    Ok(Json(paginate(views, limit, offset)))
}
