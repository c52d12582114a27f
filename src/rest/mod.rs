//! REST API surface (§6): `/health` for operational visibility and
//! `/events` for webhook intake. Runs alongside the polling orchestrator in
//! dual mode, or stands alone in webhook-only mode.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod dto;
pub mod error;
pub mod routes;
pub mod server;
pub mod state;

pub use server::{RestApiServer, RestApiStatus};
pub use state::AppState;

/// Build the API router with all routes.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/events", post(routes::events::events))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::config::Config;
    use crate::dedup::Deduplicator;
    use crate::metrics::MetricsRecorder;
    use crate::ratelimit::RateLimitGovernor;
    use std::sync::Arc;

    #[test]
    fn router_builds_without_panicking() {
        let config = Config::default();
        let state = AppState::new(
            config.clone(),
            Arc::new(MetricsRecorder::new()),
            Arc::new(RateLimitGovernor::new(&config.rate)),
            Arc::new(Cache::new(&config.cache)),
            Arc::new(Deduplicator::default()),
        );
        let _router = build_router(state);
    }
}
