use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::db::AppState;
use crate::error::AppError;

pub const ADMIN_KEY_HEADER: &str = "X-API-Key";

fn provided_key(headers: &HeaderMap) -> Option<&str> {
    headers.get(ADMIN_KEY_HEADER)?.to_str().ok()
}

/// Constant-time comparison. With no configured key nothing matches.
pub fn admin_key_matches(configured: Option<&str>, provided: Option<&str>) -> bool {
    match (configured, provided) {
        (Some(expected), Some(provided)) => {
            let expected = expected.as_bytes();
            let provided = provided.as_bytes();
            expected.len() == provided.len() && bool::from(expected.ct_eq(provided))
        }
        _ => false,
    }
}

/// Require the `X-API-Key` header to match `ADMIN_API_KEY`.
pub async fn admin_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !admin_key_matches(state.admin_api_key.as_deref(), provided_key(request.headers())) {
        if state.admin_api_key.is_none() {
            tracing::warn!("Admin request rejected: ADMIN_API_KEY is not configured");
        } else {
            tracing::warn!(path = %request.uri().path(), "Admin request rejected: bad API key");
        }
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}
