mod shopify;

pub use shopify::handle_order_paid;

use axum::{Router, routing::post};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook/order/paid", post(handle_order_paid))
}
