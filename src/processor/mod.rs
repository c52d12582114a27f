//! PR Processor (C8): the idempotent per-PR pipeline (§4.8).
//!
//! `Observed → Classified → Verified → {Approved | Fix-Requested →
//! Fix-Applied → Verified | Blocked | Ignored}`. Every step that can fail is
//! caught here and recorded in the dashboard record rather than propagated,
//! per the §7 propagation policy.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::bot::{is_bot_branch, is_bot_cached};
use crate::cache::Cache;
use crate::config::Config;
use crate::dedup::Source;
use crate::fingerprint::Fingerprint;
use crate::fixer::{FixOutcome, Fixer};
use crate::metrics::MetricsRecorder;
use crate::platform::{CheckAggregate, PlatformClient, PlatformError, PullRequest, RepoRef, ReviewDecision};
use crate::ratelimit::RateLimitGovernor;
use crate::state::{Change, DashboardRecord, PrRecord, StateTracker};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Approved,
    Blocked(String),
    Ignored,
    FixApplied,
    Vanished,
    Unchanged,
}

pub struct PrProcessor {
    pub platform: Arc<dyn PlatformClient>,
    pub fixer: Arc<dyn Fixer>,
    pub state: Arc<StateTracker>,
    pub cache: Arc<Cache>,
    pub rate: Arc<RateLimitGovernor>,
    pub metrics: Arc<MetricsRecorder>,
    pub config: Config,
}

const LOCKFILE_CHECK_NAMES: &[&str] = &["lockfile", "renovate/lockfile", "dependency-review"];

impl PrProcessor {
    #[instrument(skip(self, _sources), fields(repo = %repo, number = number))]
    pub async fn process(&self, repo: &RepoRef, number: u64, _sources: HashSet<Source>) -> Action {
        self.metrics.record_pr_examined();

        // Step 1: fetch fresh PR detail, bypassing cache.
        let admission = self.rate.acquire(1);
        if !admission.admitted {
            warn!(?admission.delay_hint, "rate limit governor denied admission, blocking PR check");
            return Action::Blocked("rate_limited".into());
        }
        self.metrics.record_api_call();
        let pr = match self.platform.get_pr(repo, number).await {
            Ok(pr) => pr,
            Err(PlatformError::NotFound) => {
                self.mark_vanished(repo, number).await;
                return Action::Vanished;
            }
            Err(err) => {
                self.metrics.record_error(platform_error_label(&err));
                return Action::Blocked(format!("fetch_failed:{err}"));
            }
        };

        let guard = self.state.acquire(repo).await;
        let mut record = self.load_record(repo).await;

        // Step 2: classify.
        let author_is_bot = is_bot_cached(&self.cache, &self.config.bot, &pr.author_login);
        let branch_matches = is_bot_branch(&self.config.branch, &pr.head_ref);
        if !author_is_bot || !branch_matches {
            self.record_action(&mut record, &pr, "Ignored", None);
            self.store_record(repo, &record).await;
            drop(guard);
            return Action::Ignored;
        }

        // Step 3: fingerprint gate.
        let checks_agg = pr.check_aggregate();
        let fp = Fingerprint::compute(
            pr.state,
            &pr.head_sha,
            pr.mergeable,
            checks_agg,
            pr.review_decision,
            pr.has_conflicts,
        );
        let change = StateTracker::diff(&record, number, fp);
        if change == Change::Unchanged {
            if let Some(prev) = record.per_pr.get(&number) {
                if matches!(prev.last_action.as_str(), "Approved" | "Blocked") {
                    drop(guard);
                    return Action::Unchanged;
                }
            }
        }

        // Step 4: verify preconditions, in order.
        let action = self.verify_and_act(repo, &pr, checks_agg).await;

        let (label, error) = match &action {
            Action::Approved => ("Approved", None),
            Action::Blocked(reason) => ("Blocked", Some(reason.clone())),
            Action::FixApplied => ("Fix-Applied", None),
            Action::Ignored | Action::Vanished | Action::Unchanged => ("Ignored", None),
        };
        self.record_action_with_fingerprint(&mut record, number, fp, label, error);
        self.store_record(repo, &record).await;
        drop(guard);

        if matches!(action, Action::Approved) {
            self.metrics.record_pr_acted();
            self.metrics.record_approval();
        }

        action
    }

    async fn verify_and_act(&self, repo: &RepoRef, pr: &PullRequest, checks_agg: CheckAggregate) -> Action {
        // (a) open, mergeable, no conflicts.
        if pr.state != crate::platform::PrState::Open {
            return Action::Blocked("not_open".into());
        }
        if pr.mergeable == Some(false) || pr.has_conflicts {
            return Action::Blocked("conflicts".into());
        }

        // (b) aggregated checks green.
        if checks_agg != CheckAggregate::Success && checks_agg != CheckAggregate::Neutral {
            if checks_agg == CheckAggregate::Pending {
                return Action::Blocked("checks_pending".into());
            }
            // Failure: attempt a fix if a lockfile-shaped check failed and
            // fixing is enabled for a detected language.
            if self.config.fix.enabled {
                if let Some(language) = self.detect_fixable_language(pr) {
                    return self.invoke_fixer(repo, pr, &language).await;
                }
            }
            return Action::Blocked("checks_failed".into());
        }

        // (c) not already approved by this actor.
        if pr.review_decision == ReviewDecision::ApprovedByUs {
            return Action::Blocked("already_approved".into());
        }
        if pr.review_decision == ReviewDecision::ChangesRequested {
            return Action::Blocked("changes_requested".into());
        }

        self.submit_approval(repo, pr).await
    }

    fn detect_fixable_language(&self, pr: &PullRequest) -> Option<String> {
        let failing_lockfile_check = pr
            .checks
            .iter()
            .any(|c| LOCKFILE_CHECK_NAMES.iter().any(|name| c.name.contains(name)));
        if !failing_lockfile_check {
            return None;
        }
        self.config.fix.languages.first().cloned()
    }

    async fn invoke_fixer(&self, repo: &RepoRef, pr: &PullRequest, language: &str) -> Action {
        if !self.fixer.supports(language) {
            return Action::Blocked("fix_failed:unsupported_language".into());
        }
        match self.fixer.fix(repo, &pr.head_ref, language).await {
            FixOutcome::Ok { commits_pushed } => {
                self.metrics.record_fix_ok();
                info!(commits_pushed, "fixer pushed commits, PR will re-enter on new fingerprint");
                Action::FixApplied
            }
            FixOutcome::Err { reason } => {
                self.metrics.record_fix_err();
                Action::Blocked(format!("fix_failed:{reason}"))
            }
        }
    }

    async fn submit_approval(&self, repo: &RepoRef, pr: &PullRequest) -> Action {
        if !self.config.approval.enabled {
            return Action::Blocked("approval_disabled".into());
        }

        let retry = ExponentialBuilder::default()
            .with_min_delay(Duration::from_secs(2))
            .with_max_delay(Duration::from_secs(30))
            .with_max_times(3);

        let body = self.config.approval.body.clone();
        let platform = Arc::clone(&self.platform);
        let number = pr.number;
        let repo_clone = repo.clone();

        let op = || {
            let platform = Arc::clone(&platform);
            let body = body.clone();
            let repo_clone = repo_clone.clone();
            async move { platform.approve_pr(&repo_clone, number, &body).await }
        };

        let result = op
            .retry(retry)
            .when(|err: &PlatformError| matches!(err, PlatformError::Transient(_)))
            .notify(|err, dur| warn!("retrying approval after {:?}: {}", dur, err))
            .await;

        self.metrics.record_api_call();
        match result {
            Ok(()) => Action::Approved,
            Err(PlatformError::Forbidden) | Err(PlatformError::NotFound) => {
                Action::Blocked("approval_rejected".into())
            }
            Err(err) => {
                self.metrics.record_error(platform_error_label(&err));
                Action::Blocked("transient".into())
            }
        }
    }

    async fn load_record(&self, repo: &RepoRef) -> DashboardRecord {
        self.state
            .load(
                self.platform.as_ref(),
                repo,
                &self.config.dashboard.issue_title,
                &self.metrics,
            )
            .await
            .unwrap_or_else(|_| DashboardRecord::empty())
    }

    async fn store_record(&self, repo: &RepoRef, record: &DashboardRecord) {
        let _ = self
            .state
            .store(
                self.platform.as_ref(),
                repo,
                &self.config.dashboard.issue_title,
                record,
                self.config.dashboard.creation_mode,
                self.config.dashboard.is_test_repo(repo),
            )
            .await;
    }

    async fn mark_vanished(&self, repo: &RepoRef, number: u64) {
        let guard = self.state.acquire(repo).await;
        let mut record = self.load_record(repo).await;
        record.per_pr.remove(&number);
        self.store_record(repo, &record).await;
        drop(guard);
    }

    fn record_action(&self, record: &mut DashboardRecord, pr: &PullRequest, label: &str, error: Option<String>) {
        let fp = Fingerprint::compute(
            pr.state,
            &pr.head_sha,
            pr.mergeable,
            pr.check_aggregate(),
            pr.review_decision,
            pr.has_conflicts,
        );
        self.record_action_with_fingerprint(record, pr.number, fp, label, error);
    }

    fn record_action_with_fingerprint(
        &self,
        record: &mut DashboardRecord,
        number: u64,
        fingerprint: Fingerprint,
        label: &str,
        error: Option<String>,
    ) {
        record.per_pr.insert(
            number,
            PrRecord {
                fingerprint,
                last_action: label.to_string(),
                last_action_at: Utc::now().to_rfc3339(),
                last_error: error,
            },
        );
    }
}

fn platform_error_label(err: &PlatformError) -> &'static str {
    match err {
        PlatformError::NotFound => "not_found",
        PlatformError::Forbidden => "forbidden",
        PlatformError::RateLimited { .. } => "rate_limited",
        PlatformError::Transient(_) => "transient",
        PlatformError::Malformed(_) => "malformed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, RateConfig};
    use crate::fixer::mock::MockFixer;
    use crate::fixer::NoopFixer;
    use crate::platform::mock::MockPlatformClient;
    use crate::platform::{Check, CheckConclusion, PrState};

    fn processor(platform: Arc<MockPlatformClient>, config: Config) -> PrProcessor {
        PrProcessor {
            platform,
            fixer: Arc::new(NoopFixer),
            state: Arc::new(StateTracker::new()),
            cache: Arc::new(Cache::new(&CacheConfig::default())),
            rate: Arc::new(RateLimitGovernor::new(&RateConfig {
                buffer: 0,
                throttle_threshold: 0.8,
                throttle_factor: 2,
            })),
            metrics: Arc::new(MetricsRecorder::new()),
            config,
        }
    }

    fn green_pr(number: u64) -> PullRequest {
        PullRequest {
            number,
            author_login: "renovate[bot]".into(),
            head_ref: "renovate/bump-serde".into(),
            head_sha: "sha1".into(),
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

    #[tokio::test]
    async fn happy_path_approves_and_records_dashboard() {
        let mock = Arc::new(MockPlatformClient::new());
        let repo = RepoRef::new("acme", "web");
        mock.insert_pr(repo.clone(), green_pr(7));
        let processor = processor(Arc::clone(&mock), Config::default());

        let action = processor.process(&repo, 7, HashSet::new()).await;
        assert_eq!(action, Action::Approved);
        assert_eq!(mock.approval_count(&repo, 7), 1);

        let record = processor.load_record(&repo).await;
        assert_eq!(record.per_pr.get(&7).unwrap().last_action, "Approved");
    }

    #[tokio::test]
    async fn idempotent_repoll_makes_no_second_approval() {
        let mock = Arc::new(MockPlatformClient::new());
        let repo = RepoRef::new("acme", "web");
        mock.insert_pr(repo.clone(), green_pr(7));
        let processor = processor(Arc::clone(&mock), Config::default());

        processor.process(&repo, 7, HashSet::new()).await;
        let action = processor.process(&repo, 7, HashSet::new()).await;
        assert_eq!(action, Action::Unchanged);
        assert_eq!(mock.approval_count(&repo, 7), 1);
    }

    #[tokio::test]
    async fn pending_checks_block_without_approval() {
        let mock = Arc::new(MockPlatformClient::new());
        let repo = RepoRef::new("acme", "web");
        let mut pr = green_pr(8);
        pr.checks = vec![Check {
            name: "ci".into(),
            conclusion: CheckConclusion::Pending,
            required: true,
        }];
        mock.insert_pr(repo.clone(), pr);
        let processor = processor(Arc::clone(&mock), Config::default());

        let action = processor.process(&repo, 8, HashSet::new()).await;
        assert_eq!(action, Action::Blocked("checks_pending".into()));
        assert_eq!(mock.approval_count(&repo, 8), 0);
    }

    #[tokio::test]
    async fn non_bot_author_is_ignored() {
        let mock = Arc::new(MockPlatformClient::new());
        let repo = RepoRef::new("acme", "web");
        let mut pr = green_pr(9);
        pr.author_login = "octocat".into();
        mock.insert_pr(repo.clone(), pr);
        let processor = processor(mock, Config::default());

        let action = processor.process(&repo, 9, HashSet::new()).await;
        assert_eq!(action, Action::Ignored);
    }

    #[tokio::test]
    async fn vanished_pr_is_reported() {
        let mock = Arc::new(MockPlatformClient::new());
        let repo = RepoRef::new("acme", "web");
        let processor = processor(mock, Config::default());

        let action = processor.process(&repo, 123, HashSet::new()).await;
        assert_eq!(action, Action::Vanished);
    }

    #[tokio::test]
    async fn already_approved_by_us_is_blocked_not_resubmitted() {
        let mock = Arc::new(MockPlatformClient::new());
        let repo = RepoRef::new("acme", "web");
        let mut pr = green_pr(10);
        pr.review_decision = ReviewDecision::ApprovedByUs;
        mock.insert_pr(repo.clone(), pr);
        let processor = processor(mock, Config::default());

        let action = processor.process(&repo, 10, HashSet::new()).await;
        assert_eq!(action, Action::Blocked("already_approved".into()));
    }

    #[tokio::test]
    async fn fix_enabled_invokes_fixer_on_lockfile_failure() {
        let mock = Arc::new(MockPlatformClient::new());
        let repo = RepoRef::new("acme", "web");
        let mut pr = green_pr(11);
        pr.checks = vec![Check {
            name: "lockfile".into(),
            conclusion: CheckConclusion::Failure,
            required: true,
        }];
        mock.insert_pr(repo.clone(), pr);

        let mut config = Config::default();
        config.fix.enabled = true;
        config.fix.languages = vec!["rust".into()];

        let mut processor = processor(mock, config);
        processor.fixer = Arc::new(MockFixer::always_succeeds(&["rust"]));

        let action = processor.process(&repo, 11, HashSet::new()).await;
        assert_eq!(action, Action::FixApplied);
    }
}
