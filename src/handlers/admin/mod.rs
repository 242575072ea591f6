mod licenses;

pub use licenses::*;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::db::AppState;
use crate::middleware::admin_auth;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/licenses/add/{category}", post(add_licenses))
        .route("/licenses/{category}/count", get(count_licenses))
        .layer(middleware::from_fn_with_state(state, admin_auth))
}
