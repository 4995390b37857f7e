// Sat API Endpoints
//
// Pure number derivations plus the inscriptions currently riding on a sat.

use std::sync::Arc;

use axum::extract::{Path, Query};
use axum::{Extension, Json};
use rocksdb::DB;

use crate::inscriptions::{get_inscription, get_sat_inscription_ids};
use crate::sat::Sat;

use super::helpers::{bad_request, internal_error, paginate, ApiResult, PageQuery};
use super::inscriptions::build_inscription_view;
use super::types::{InscriptionView, Paginated, SatView};

/// GET /ordinals/v1/sats/{ordinal}
pub async fn sat_show(Path(param): Path<String>) -> ApiResult<SatView> {
    let ordinal: u64 = param
        .parse()
        .map_err(|_| bad_request("sat ordinal must be a non-negative integer"))?;
    let sat = Sat::new(ordinal).map_err(|e| bad_request(e.to_string()))?;
    Ok(Json(SatView {
        ordinal,
        coinbase_height: sat.coinbase_height(),
        cycle: sat.cycle(),
        epoch: sat.epoch(),
        period: sat.period(),
        offset: sat.offset(),
        decimal: sat.decimal(),
        degree: sat.degree(),
        name: sat.name(),
        percentile: sat.percentile(),
        rarity: sat.rarity().as_str().to_string(),
    }))
}

/// GET /ordinals/v1/sats/{ordinal}/inscriptions
///
/// Reverse inscription-number order; every entry shares the sat's current
/// location (reinscriptions ride together).
pub async fn sat_inscriptions(
    Path(param): Path<String>,
    Query(page): Query<PageQuery>,
    Extension(db): Extension<Arc<DB>>,
) -> ApiResult<Paginated<InscriptionView>> {
    let ordinal: u64 = param
        .parse()
        .map_err(|_| bad_request("sat ordinal must be a non-negative integer"))?;
    Sat::new(ordinal).map_err(|e| bad_request(e.to_string()))?;
    let (limit, offset) = page.bounds();

    let ids = get_sat_inscription_ids(&db, ordinal).map_err(|e| internal_error(e.to_string()))?;
    let mut views = Vec::with_capacity(ids.len());
    for id in ids {
        let row = get_inscription(&db, &id)
            .map_err(|e| internal_error(e.to_string()))?
            .ok_or_else(|| internal_error("sat index points at missing inscription"))?;
        views.push(build_inscription_view(&db, &row).map_err(|e| internal_error(e.to_string()))?);
    }
    Ok(Json(paginate(views, limit, offset)))
}
