pub mod admin;
pub mod public;
pub mod webhooks;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::db::AppState;

/// The full HTTP surface with request tracing, ready to serve.
pub fn app(state: AppState) -> Router {
    Router::new()
        // Liveness and license lookup (no auth)
        .merge(public::router())
        // Store webhooks (signature auth)
        .merge(webhooks::router())
        // Inventory management (admin API key)
        .merge(admin::router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
