// API Helper Functions
//
// Pagination parsing and the shared error-response constructors.

use axum::{http::StatusCode, Json};
use serde::Deserialize;

use super::types::{ApiError, Paginated};

/// Pagination bounds fixed by the API contract.
pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 60;

/// Standard error result type for API handlers
pub type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl PageQuery {
    /// Clamp to the API bounds: default 20, max 60, offset default 0.
    pub fn bounds(&self) -> (usize, usize) {
        page_bounds(self.limit, self.offset)
    }
}

/// Clamp raw pagination parameters to the API bounds. Query structs carry
/// `limit`/`offset` inline because the urlencoded deserializer cannot
/// flatten numeric fields.
pub fn page_bounds(limit: Option<usize>, offset: Option<usize>) -> (usize, usize) {
    (limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT), offset.unwrap_or(0))
}

/// Slice an already-filtered, already-ordered result set into the shared
/// envelope.
pub fn paginate<T>(items: Vec<T>, limit: usize, offset: usize) -> Paginated<T> {
    let total = items.len();
    let results: Vec<T> = items.into_iter().skip(offset).take(limit).collect();
    Paginated {
        limit,
        offset,
        total,
        results,
    }
}

/// Helper to create a 404 Not Found error response
pub fn not_found(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (StatusCode::NOT_FOUND, Json(ApiError::new(message)))
}

/// Helper to create a 400 Bad Request error response
pub fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (StatusCode::BAD_REQUEST, Json(ApiError::new(message)))
}

/// Helper to create a 500 Internal Server Error response
pub fn internal_error(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError::new(message)))
}

/// Split a comma-separated filter value into its terms.
pub fn csv_terms(value: &Option<String>) -> Option<Vec<String>> {
    value.as_ref().map(|v| {
        v.split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    })
}

/// `<64 hex chars>i<n>` inscription id check.
pub fn is_inscription_id(value: &str) -> bool {
    match value.split_once('i') {
        Some((txid, seq)) => {
            txid.len() == 64
                && txid.bytes().all(|b| b.is_ascii_hexdigit())
                && !seq.is_empty()
                && seq.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}
