use axum::{Json, body::Bytes, extract::State};
use serde::Serialize;

use crate::category::is_valid_category;
use crate::db::{AppState, blocking};
use crate::error::{AppError, Result};
use crate::extractors::Path;

#[derive(Debug, Serialize)]
pub struct AddLicensesResponse {
    pub status: &'static str,
    pub added: usize,
    pub available: usize,
}

#[derive(Debug, Serialize)]
pub struct CountLicensesResponse {
    pub category: String,
    pub available: usize,
}

/// Keys from a request body: a JSON array of strings, or one key per line.
pub fn parse_key_list(body: &[u8]) -> Result<Vec<String>> {
    let raw: Vec<String> = match serde_json::from_slice(body) {
        Ok(keys) => keys,
        Err(_) => std::str::from_utf8(body)
            .map_err(|_| AppError::BadRequest("Body must be a JSON array or UTF-8 text".into()))?
            .lines()
            .map(str::to_string)
            .collect(),
    };

    Ok(raw
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect())
}

fn check_category(category: &str) -> Result<()> {
    if is_valid_category(category) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "Invalid category '{}': use lowercase letters, digits, '-' or '_'",
            category
        )))
    }
}

/// `POST /licenses/add/{category}`
pub async fn add_licenses(
    State(state): State<AppState>,
    Path(category): Path<String>,
    body: Bytes,
) -> Result<Json<AddLicensesResponse>> {
    check_category(&category)?;

    let keys = parse_key_list(&body)?;
    if keys.is_empty() {
        return Err(AppError::BadRequest("No license keys provided".into()));
    }

    let submitted = keys.len();
    let (added, available) = {
        let inventory = state.inventory.clone();
        let category = category.clone();
        blocking(move || {
            let added = inventory.add(&category, &keys)?;
            let available = inventory.count(&category)?;
            Ok((added, available))
        })
        .await?
    };

    tracing::info!(
        category = %category,
        submitted,
        added,
        available,
        "Admin added license keys"
    );

    Ok(Json(AddLicensesResponse {
        status: "success",
        added,
        available,
    }))
}

/// `GET /licenses/{category}/count`
pub async fn count_licenses(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<CountLicensesResponse>> {
    check_category(&category)?;

    let available = {
        let inventory = state.inventory.clone();
        let category = category.clone();
        blocking(move || Ok(inventory.count(&category)?)).await?
    };
    Ok(Json(CountLicensesResponse {
        category,
        available,
    }))
}
