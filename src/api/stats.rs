// Stats API Endpoints

use std::sync::Arc;

use axum::extract::Query;
use axum::{Extension, Json};
use rocksdb::DB;
use serde::Deserialize;

use crate::inscriptions::list_block_counts_desc;

use super::helpers::{internal_error, page_bounds, paginate, ApiResult};
use super::types::{BlockCountView, Paginated};

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub from_block_height: Option<u64>,
    pub to_block_height: Option<u64>,
}

/// GET /ordinals/v1/stats/inscriptions
///
/// Per-block inscription counts, newest block first.
pub async fn inscription_stats(
    Query(query): Query<StatsQuery>,
    Extension(db): Extension<Arc<DB>>,
) -> ApiResult<Paginated<BlockCountView>> {
    let (limit, offset) = page_bounds(query.limit, query.offset);
    let rows = list_block_counts_desc(&db, query.from_block_height, query.to_block_height)
        .map_err(|e| internal_error(e.to_string()))?;
    let views: Vec<BlockCountView> = rows.iter().map(BlockCountView::from_row).collect();
    Ok(Json(paginate(views, limit, offset)))
}
