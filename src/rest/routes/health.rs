//! `GET /health` (§6).

use axum::extract::State;
use axum::Json;

use crate::rest::dto::{status_for_score, CacheSummary, HealthResponse, RateLimitSummary};
use crate::rest::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let rate_snapshot = state.rate.snapshot();
    let cache_stats = state.cache.stats();
    let cache_hit_rate = if cache_stats.hits + cache_stats.misses == 0 {
        0.0
    } else {
        cache_stats.hits as f64 / (cache_stats.hits + cache_stats.misses) as f64
    };
    let snapshot = state.metrics.snapshot(rate_snapshot.usage_fraction);

    let last_cycle_at = state.last_cycle_at.lock().await.clone();

    Json(HealthResponse {
        status: status_for_score(snapshot.health_score),
        health_score: snapshot.health_score,
        polling_enabled: state.config.operation.mode.polling_enabled(),
        last_cycle_at,
        cache: CacheSummary {
            hit_rate: cache_hit_rate,
            size: cache_stats.size,
        },
        rate_limit: RateLimitSummary {
            remaining: rate_snapshot.remaining,
            reset_at: chrono::DateTime::<chrono::Utc>::from(rate_snapshot.reset_at).to_rfc3339(),
        },
        uptime_seconds: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
