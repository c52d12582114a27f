//! Shared state threaded through every REST handler.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::cache::Cache;
use crate::config::Config;
use crate::dedup::{Deduplicator, Source};
use crate::metrics::MetricsRecorder;
use crate::ratelimit::RateLimitGovernor;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub metrics: Arc<MetricsRecorder>,
    pub rate: Arc<RateLimitGovernor>,
    pub cache: Arc<Cache>,
    pub dedup: Arc<Deduplicator>,
    pub started_at: Instant,
    pub last_cycle_at: Arc<Mutex<Option<String>>>,
}

impl AppState {
    pub fn new(
        config: Config,
        metrics: Arc<MetricsRecorder>,
        rate: Arc<RateLimitGovernor>,
        cache: Arc<Cache>,
        dedup: Arc<Deduplicator>,
    ) -> Self {
        Self::with_last_cycle_at(config, metrics, rate, cache, dedup, Arc::new(Mutex::new(None)))
    }

    /// Like `new`, but shares the `last_cycle_at` cell with the polling
    /// orchestrator so `/health` reflects cycles driven outside this process'
    /// own request handlers (§6 health reporting).
    pub fn with_last_cycle_at(
        config: Config,
        metrics: Arc<MetricsRecorder>,
        rate: Arc<RateLimitGovernor>,
        cache: Arc<Cache>,
        dedup: Arc<Deduplicator>,
        last_cycle_at: Arc<Mutex<Option<String>>>,
    ) -> Self {
        Self {
            config,
            metrics,
            rate,
            cache,
            dedup,
            started_at: Instant::now(),
            last_cycle_at,
        }
    }

    pub async fn submit_event(&self, repo: crate::platform::RepoRef, number: u64) {
        self.dedup.submit((repo, number), Source::Event).await;
    }
}
