//! Router assembly

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::handlers;
use crate::state::AppState;

/// Requests served concurrently before backpressure kicks in.
const CONCURRENCY_LIMIT: usize = 64;

/// Build the axum router with the contractual API surface.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Retrieval façade
        .route("/api/enhanced-variable-picker/search", post(handlers::search))
        .route("/api/variable-picker/refine", post(handlers::refine))
        .route(
            "/api/enhanced-variable-picker/variable/{code}",
            get(handlers::get_variable),
        )
        .route(
            "/api/enhanced-variable-picker/category/{category}",
            get(handlers::by_category),
        )
        .route("/api/enhanced-variable-picker/stats", get(handlers::stats))
        // Conversational workflow
        .route("/api/start_session", post(handlers::start_session))
        .route("/api/nl/process", post(handlers::nl_process))
        // Rollout gate
        .route("/api/search/migration/status", get(handlers::migration_status))
        .route("/api/search/migration/test", post(handlers::migration_test))
        // Liveness
        .route("/health", get(handlers::health))
        .layer(
            ServiceBuilder::new()
                .concurrency_limit(CONCURRENCY_LIMIT)
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
