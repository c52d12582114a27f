//! Polling Orchestrator (C5): the scheduling heart. Drives a worker pool
//! over the configured repository set, one independent next-run time per
//! repo, bounded concurrency (§4.5, §5).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::activity::{ActivityScorer, CycleResult, IntervalConfig};
use crate::cache::{Cache, NS_REPO_META, NS_REPO_PRS};
use crate::config::Config;
use crate::dedup::{Deduplicator, Source};
use crate::metrics::MetricsRecorder;
use crate::platform::{PlatformClient, PlatformError, PullRequest, RepoMeta, RepoRef};
use crate::ratelimit::RateLimitGovernor;
use crate::state::{Change, StateTracker};

pub struct Orchestrator {
    platform: Arc<dyn PlatformClient>,
    cache: Arc<Cache>,
    rate: Arc<RateLimitGovernor>,
    state: Arc<StateTracker>,
    activity: Arc<ActivityScorer>,
    metrics: Arc<MetricsRecorder>,
    dedup: Arc<Deduplicator>,
    config: Config,
    semaphore: Arc<Semaphore>,
    last_cycle_at: Arc<AsyncMutex<Option<String>>>,
}

impl Orchestrator {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        cache: Arc<Cache>,
        rate: Arc<RateLimitGovernor>,
        state: Arc<StateTracker>,
        metrics: Arc<MetricsRecorder>,
        dedup: Arc<Deduplicator>,
        config: Config,
    ) -> Self {
        Self::with_last_cycle_at(
            platform,
            cache,
            rate,
            state,
            metrics,
            dedup,
            config,
            Arc::new(AsyncMutex::new(None)),
        )
    }

    /// Like `new`, but shares the `last_cycle_at` cell with the REST API's
    /// `AppState` so `/health` observes cycles driven by this scheduler.
    pub fn with_last_cycle_at(
        platform: Arc<dyn PlatformClient>,
        cache: Arc<Cache>,
        rate: Arc<RateLimitGovernor>,
        state: Arc<StateTracker>,
        metrics: Arc<MetricsRecorder>,
        dedup: Arc<Deduplicator>,
        config: Config,
        last_cycle_at: Arc<AsyncMutex<Option<String>>>,
    ) -> Self {
        let activity = Arc::new(ActivityScorer::new(IntervalConfig {
            base_seconds: config.poll.base_interval_seconds,
            max_seconds: config.poll.max_interval_seconds,
            cooldown_after_empty_cycles: config.poll.cooldown_after_empty_cycles,
            cooldown_multiplier: config.poll.cooldown_multiplier,
        }));
        let semaphore = Arc::new(Semaphore::new(config.poll.max_concurrent_repos));
        Self {
            platform,
            cache,
            rate,
            state,
            activity,
            metrics,
            dedup,
            config,
            semaphore,
            last_cycle_at,
        }
    }

    /// Drive the scheduler loop until `token` is cancelled. Each repo is
    /// rescheduled independently off the back of its own cycle outcome.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let repos = self.target_repos();
        let mut handles = Vec::new();
        for repo in repos {
            let this = Arc::clone(&self);
            let token = token.clone();
            handles.push(tokio::spawn(async move { this.repo_loop(repo, token).await }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn target_repos(&self) -> Vec<RepoRef> {
        let configured = &self.config.poll.repositories;
        let source = if configured.is_empty() {
            &self.config.allowlist
        } else {
            configured
        };
        source
            .iter()
            .filter_map(|s| s.parse::<RepoRef>().ok())
            .collect()
    }

    async fn repo_loop(&self, repo: RepoRef, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = self.run_cycle_with_contention_retry(&repo, &token) => {}
            }
            let interval = self.activity.next_interval(&repo);
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn run_cycle_with_contention_retry(&self, repo: &RepoRef, token: &CancellationToken) {
        let Some(_permit) = self.semaphore.acquire().await.ok() else {
            return;
        };

        // Step 1: per-repo mutual exclusion (I3). Skip and reschedule +5s on
        // contention rather than queueing behind an in-progress cycle.
        let Some(_guard) = self.state.try_acquire(repo).await else {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
            }
            return;
        };

        self.run_cycle(repo).await;
    }

    async fn run_cycle(&self, repo: &RepoRef) {
        // Step 2: admission.
        let admission = self.rate.acquire(4);
        if !admission.admitted {
            info!(?repo, delay = ?admission.delay_hint, "rate limit governor denied cycle, rescheduling");
            tokio::time::sleep(admission.delay_hint.min(Duration::from_secs(60))).await;
            return;
        }

        self.metrics.record_cycle();

        if self.config.ignore_archived && self.is_archived(repo).await {
            info!(?repo, "repository archived, skipping cycle");
            return;
        }

        let prs = match self.fetch_open_prs(repo).await {
            Ok(prs) => prs,
            Err(err) => {
                warn!(?repo, %err, "failed to list open PRs, skipping cycle");
                self.metrics.record_error("transient");
                self.metrics.record_stale_cycle();
                return;
            }
        };

        let mut sorted = prs;
        sorted.sort_by_key(|pr| pr.number);

        let mut record = self
            .state
            .load(
                self.platform.as_ref(),
                repo,
                &self.config.dashboard.issue_title,
                &self.metrics,
            )
            .await
            .unwrap_or_default();

        let mut changed = false;
        for pr in &sorted {
            if !crate::bot::is_bot_cached(&self.cache, &self.config.bot, &pr.author_login) {
                continue;
            }
            self.metrics.record_pr_examined();
            let fp = crate::fingerprint::Fingerprint::compute(
                pr.state,
                &pr.head_sha,
                pr.mergeable,
                pr.check_aggregate(),
                pr.review_decision,
                pr.has_conflicts,
            );
            match StateTracker::diff(&record, pr.number, fp) {
                Change::New | Change::Changed => {
                    changed = true;
                    self.dedup.submit((repo.clone(), pr.number), Source::Poll).await;
                }
                Change::Unchanged | Change::Vanished => {}
            }
        }

        // Step 3.b: anything tracked in D that didn't show up in this cycle's
        // open-PR list vanished between cycles (merged, closed, or force-
        // removed) without the processor ever seeing a Not Found on it.
        let live_numbers: std::collections::HashSet<u64> = sorted.iter().map(|pr| pr.number).collect();
        let vanished: Vec<u64> = record
            .per_pr
            .keys()
            .copied()
            .filter(|number| !live_numbers.contains(number))
            .collect();
        for number in vanished {
            record.per_pr.remove(&number);
            changed = true;
        }

        // Step 5: write D once per cycle, only if something changed.
        if changed {
            let _ = self
                .state
                .store(
                    self.platform.as_ref(),
                    repo,
                    &self.config.dashboard.issue_title,
                    &record,
                    self.config.dashboard.creation_mode,
                    self.config.dashboard.is_test_repo(repo),
                )
                .await;
        }

        self.activity.observe(repo, CycleResult { changed });
        *self.last_cycle_at.lock().await = Some(chrono::Utc::now().to_rfc3339());
    }

    /// Repository-level archived flag (§3 Repository), cached under
    /// `NS_REPO_META` like `fetch_open_prs` caches the PR list. Errors are
    /// treated as not-archived so a metadata hiccup never silently starves a
    /// repo of cycles.
    async fn is_archived(&self, repo: &RepoRef) -> bool {
        if let Some(meta) = self.cache.get::<RepoMeta>(NS_REPO_META, &repo.full_name()) {
            return meta.archived;
        }
        match self.platform.get_repo_meta(repo).await {
            Ok(meta) => {
                self.cache.put(NS_REPO_META, &repo.full_name(), meta, None);
                meta.archived
            }
            Err(err) => {
                warn!(?repo, %err, "failed to fetch repo metadata, assuming not archived");
                false
            }
        }
    }

    async fn fetch_open_prs(&self, repo: &RepoRef) -> Result<Vec<PullRequest>, PlatformError> {
        if let Some(cached) = self.cache.get::<Vec<PullRequest>>(NS_REPO_PRS, &repo.full_name()) {
            self.metrics.record_cache_hit();
            return Ok(cached);
        }
        self.metrics.record_cache_miss();
        self.metrics.record_api_call();
        let prs = self.platform.list_open_prs(repo).await?;
        self.cache.put(NS_REPO_PRS, &repo.full_name(), prs.clone(), None);
        Ok(prs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, Config, RateConfig};
    use crate::platform::mock::MockPlatformClient;
    use crate::platform::{Check, CheckConclusion, PrState, ReviewDecision};

    fn green_pr(number: u64) -> PullRequest {
        PullRequest {
            number,
            author_login: "renovate[bot]".into(),
            head_ref: "renovate/bump-serde".into(),
            head_sha: format!("sha-{number}"),
            state: PrState::Open,
            mergeable: Some(true),
            has_conflicts: false,
            checks: vec![Check {
                name: "ci".into(),
                conclusion: CheckConclusion::Success,
                required: true,
            }],
            review_decision: ReviewDecision::None,
            labels: vec![],
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    fn orchestrator(platform: MockPlatformClient, config: Config) -> Orchestrator {
        orchestrator_with_mock(Arc::new(platform), config)
    }

    fn orchestrator_with_mock(platform: Arc<MockPlatformClient>, config: Config) -> Orchestrator {
        Orchestrator::new(
            platform,
            Arc::new(Cache::new(&CacheConfig::default())),
            Arc::new(RateLimitGovernor::new(&RateConfig {
                buffer: 0,
                throttle_threshold: 0.8,
                throttle_factor: 2,
            })),
            Arc::new(StateTracker::new()),
            Arc::new(MetricsRecorder::new()),
            Arc::new(Deduplicator::new(16)),
            config,
        )
    }

    #[tokio::test]
    async fn cycle_enqueues_new_bot_prs() {
        let mock = MockPlatformClient::new();
        let repo = RepoRef::new("acme", "web");
        mock.insert_pr(repo.clone(), green_pr(7));
        let orch = orchestrator(mock, Config::default());

        orch.run_cycle(&repo).await;
        let (key, sources) = orch.dedup.next().await;
        assert_eq!(key, (repo, 7));
        assert!(sources.contains(&Source::Poll));
    }

    #[tokio::test]
    async fn cycle_with_no_bot_prs_raises_no_dedup_entry() {
        let mock = MockPlatformClient::new();
        let repo = RepoRef::new("acme", "web");
        let mut pr = green_pr(7);
        pr.author_login = "octocat".into();
        mock.insert_pr(repo.clone(), pr);
        let orch = orchestrator(mock, Config::default());

        orch.run_cycle(&repo).await;
        assert_eq!(orch.dedup.coalesced_count().await, 0);
    }

    #[tokio::test]
    async fn activity_score_rises_after_changed_cycle() {
        let mock = MockPlatformClient::new();
        let repo = RepoRef::new("acme", "web");
        mock.insert_pr(repo.clone(), green_pr(7));
        let orch = orchestrator(mock, Config::default());

        orch.run_cycle(&repo).await;
        assert!(orch.activity.score(&repo) > 0.0);
    }

    #[test]
    fn target_repos_falls_back_to_allowlist_when_poll_list_empty() {
        let mock = MockPlatformClient::new();
        let mut config = Config::default();
        config.allowlist = vec!["acme/web".into()];
        let orch = orchestrator(mock, config);
        assert_eq!(orch.target_repos(), vec![RepoRef::new("acme", "web")]);
    }

    #[tokio::test]
    async fn archived_repo_is_skipped_when_configured() {
        let mock = MockPlatformClient::new();
        let repo = RepoRef::new("acme", "web");
        mock.insert_pr(repo.clone(), green_pr(7));
        mock.set_archived(repo.clone(), true);
        let mut config = Config::default();
        config.ignore_archived = true;
        let orch = orchestrator(mock, config);

        orch.run_cycle(&repo).await;
        assert_eq!(orch.dedup.coalesced_count().await, 0);
    }

    #[tokio::test]
    async fn vanished_pr_is_pruned_from_dashboard_record() {
        let mock = Arc::new(MockPlatformClient::new());
        let repo = RepoRef::new("acme", "web");
        mock.insert_pr(repo.clone(), green_pr(7));
        let orch = orchestrator_with_mock(Arc::clone(&mock), Config::default());

        // First cycle tracks PR 7 in the dashboard record.
        orch.run_cycle(&repo).await;
        let record = orch
            .state
            .load(
                orch.platform.as_ref(),
                &repo,
                &orch.config.dashboard.issue_title,
                &orch.metrics,
            )
            .await
            .unwrap();
        assert!(record.per_pr.contains_key(&7));

        // PR 7 merges/closes between cycles without ever reappearing.
        mock.prs.lock().unwrap().clear();
        orch.cache.invalidate(NS_REPO_PRS, Some(&repo.full_name()));

        orch.run_cycle(&repo).await;
        let record = orch
            .state
            .load(
                orch.platform.as_ref(),
                &repo,
                &orch.config.dashboard.issue_title,
                &orch.metrics,
            )
            .await
            .unwrap();
        assert!(!record.per_pr.contains_key(&7));
    }
}
