// Status Endpoint

use std::sync::Arc;
use std::time::Duration;

use axum::{Extension, Json};
use rocksdb::DB;

use crate::cache::CacheManager;
use crate::chain_state::TipCache;
use crate::inscriptions::get_number_extremes;

use super::helpers::{internal_error, ApiResult};
use super::types::StatusView;

/// Version string shared with the router at startup.
#[derive(Clone)]
pub struct ServerVersion(pub Arc<String>);

/// GET /ordinals/v1/
///
/// Cached briefly; the key embeds the tip height so a committed block
/// refreshes the numbers immediately.
pub async fn status(
    Extension(db): Extension<Arc<DB>>,
    Extension(cache): Extension<Arc<CacheManager>>,
    Extension(tip): Extension<TipCache>,
    Extension(version): Extension<ServerVersion>,
) -> ApiResult<StatusView> {
    let current_tip = tip.current();
    let cache_key = format!(
        "status:{}",
        current_tip.as_ref().map(|t| t.block_height).unwrap_or(0)
    );
    let result = cache
        .get_or_compute(&cache_key, Duration::from_secs(5), || async move {
            let (max_blessed, max_cursed) = get_number_extremes(&db)?;
            Ok(StatusView {
                server_version: version.0.as_ref().clone(),
                status: "ready".to_string(),
                block_height: current_tip.map(|t| t.block_height),
                max_inscription_number: max_blessed,
                max_cursed_inscription_number: max_cursed,
            })
        })
        .await;
    match result {
        Ok(view) => Ok(Json(view)),
        Err(e) => Err(internal_error(e.to_string())),
    }
}
