use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::db::AppState;
use crate::error::AppError;
use crate::fulfillment::fulfill_order;
use crate::shopify::{OrderPaid, SIGNATURE_HEADER, verify_webhook};

/// Body shape the store expects back from a webhook.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WebhookResponse {
    Success { message: String },
    Error { detail: String },
}

fn respond(status: StatusCode, body: WebhookResponse) -> Response {
    (status, Json(body)).into_response()
}

/// `POST /webhook/order/paid`
///
/// Verifies the signature over the raw body, then fulfills the order within
/// the request. Anything other than 200 makes the store redeliver later.
pub async fn handle_order_paid(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    if !verify_webhook(&body, signature, &state.webhook_secret) {
        tracing::warn!(
            has_signature = signature.is_some(),
            "Rejected order webhook with invalid signature"
        );
        return respond(
            StatusCode::UNAUTHORIZED,
            WebhookResponse::Error {
                detail: "Invalid webhook signature".to_string(),
            },
        );
    }

    let order = match OrderPaid::parse(&body) {
        Ok(order) => order,
        Err(e) => {
            let err = AppError::MalformedPayload(e.to_string());
            tracing::error!(error = %err, "Order webhook payload could not be parsed");
            return respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                WebhookResponse::Error {
                    detail: err.to_string(),
                },
            );
        }
    };

    match fulfill_order(&state, &order).await {
        Ok(outcome) => respond(
            StatusCode::OK,
            WebhookResponse::Success {
                message: outcome.message(&order.order_number),
            },
        ),
        Err(e) => {
            tracing::error!(order = %order.order_number, error = %e, "Order fulfillment failed");
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                WebhookResponse::Error {
                    detail: e.to_string(),
                },
            )
        }
    }
}
