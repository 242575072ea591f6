use axum::{Json, extract::State};
use serde::Serialize;

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Path;
use crate::models::LicenseIssuance;

#[derive(Debug, Serialize)]
pub struct VerifyLicenseResponse {
    pub valid: bool,
    pub details: LicenseIssuance,
}

/// `GET /verify-license/{key}`: whether an issued key is still active.
pub async fn verify_license(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<VerifyLicenseResponse>> {
    let verification = state.records.verify(&key).await.map_err(|e| {
        AppError::Internal(format!("record store {} lookup failed: {}", state.records.name(), e))
    })?;

    let verification =
        verification.ok_or_else(|| AppError::NotFound("License key not found".into()))?;

    Ok(Json(VerifyLicenseResponse {
        valid: verification.is_valid,
        details: verification.record,
    }))
}
