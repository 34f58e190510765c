//! Route configuration.

use crate::handlers;
use crate::identity::identity_middleware;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let upload_routes = Router::new()
        // Only POST is routed, so other methods get 405 before any restore exists
        .route("/db/v2/restore", post(handlers::upload_restore))
        .route("/db/v2/restore/{id}/resume", post(handlers::resume_restore));

    let api_routes = Router::new()
        // Health check (unauthenticated for load balancers and probes)
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/db/restore/formats", get(handlers::list_formats))
        .route("/v1/db/restore/active", get(handlers::get_active_restore))
        .route(
            "/v1/db/restore/{id}",
            get(handlers::get_restore).delete(handlers::cancel_restore),
        )
        .route(
            "/v1/db/restore/{id}/interrupt",
            post(handlers::interrupt_restore),
        );

    let mut router = Router::new().merge(upload_routes).merge(api_routes);

    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Order of execution: TraceLayer -> identity -> Handler
    router
        .layer(middleware::from_fn(identity_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
