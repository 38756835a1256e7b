//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Maximum request body size (64 KiB is plenty for 100 keys of 256 chars).
const MAX_BODY_SIZE: usize = 64 * 1024;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/operations", post(handlers::submit_operation))
        .route(
            "/v1/operations/{operation_id}",
            get(handlers::get_operation),
        )
        .route("/v1/artifacts/{key}", get(handlers::get_artifact));

    let mut router = Router::new().merge(api_routes);

    // Conditionally add metrics endpoint based on config.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    router
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
