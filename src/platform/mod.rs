//! The `PlatformClient` capability: the typed boundary to the source-hosting
//! platform. Concrete HTTP/auth details live in `platform::github`; the rest
//! of the engine only ever depends on this trait, mirroring the teacher's
//! provider-agnostic `PrService` trait in `api/pr_service.rs`.

pub mod github;

use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A repository reference, `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl std::str::FromStr for RepoRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, '/');
        match (parts.next(), parts.next()) {
            (Some(owner), Some(name)) if !owner.is_empty() && !name.is_empty() => {
                Ok(RepoRef::new(owner, name))
            }
            _ => Err(format!("invalid repository reference: {s:?} (want owner/name)")),
        }
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

/// PR lifecycle state (§3 Data Model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open = 0,
    Closed = 1,
    Merged = 2,
}

/// Aggregated check status, per the §9 open-question resolution: `success`
/// iff every required check is `success` or `neutral`; any
/// `failure`/`cancelled`/`timed_out` is `failure`; anything else is
/// `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckAggregate {
    Pending = 0,
    Success = 1,
    Failure = 2,
    Neutral = 3,
}

/// Per-check outcome as reported by the platform's checks API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    pub conclusion: CheckConclusion,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    TimedOut,
    Skipped,
    ActionRequired,
    Pending,
}

/// Aggregate a set of checks into a single `CheckAggregate`, honoring only
/// checks marked `required` when at least one is present (unflagged checks
/// are treated as required, matching how most CI setups report).
pub fn aggregate_checks(checks: &[Check]) -> CheckAggregate {
    let relevant: Vec<&Check> = if checks.iter().any(|c| c.required) {
        checks.iter().filter(|c| c.required).collect()
    } else {
        checks.iter().collect()
    };

    if relevant.is_empty() {
        return CheckAggregate::Pending;
    }

    let mut saw_neutral = false;
    for check in &relevant {
        match check.conclusion {
            CheckConclusion::Failure
            | CheckConclusion::Cancelled
            | CheckConclusion::TimedOut
            | CheckConclusion::ActionRequired => return CheckAggregate::Failure,
            CheckConclusion::Success | CheckConclusion::Skipped => {}
            CheckConclusion::Neutral => saw_neutral = true,
            CheckConclusion::Pending => return CheckAggregate::Pending,
        }
    }

    if saw_neutral {
        CheckAggregate::Neutral
    } else {
        CheckAggregate::Success
    }
}

/// Review decision relevant to idempotence (has this actor already
/// approved?).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    None,
    ApprovedByUs,
    ApprovedByOther,
    ChangesRequested,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub author_login: String,
    pub head_ref: String,
    pub head_sha: String,
    pub state: PrState,
    pub mergeable: Option<bool>,
    pub has_conflicts: bool,
    pub checks: Vec<Check>,
    pub review_decision: ReviewDecision,
    pub labels: Vec<String>,
    pub updated_at: String,
}

impl PullRequest {
    pub fn check_aggregate(&self) -> CheckAggregate {
        aggregate_checks(&self.checks)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: String,
}

/// Repository-level metadata cached under `cache::NS_REPO_META` (§3
/// Repository's "archived flag").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMeta {
    pub archived: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSnapshot {
    pub remaining: u64,
    pub limit: u64,
    pub reset_at: SystemTime,
}

/// Errors a `PlatformClient` call can return (§6 External Interfaces).
#[derive(Debug, Error, Clone)]
pub enum PlatformError {
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("rate limited, reset at {reset_at:?}")]
    RateLimited { reset_at: SystemTime },
    #[error("transient: {0}")]
    Transient(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<PlatformError> for crate::error::ErrorKind {
    fn from(err: PlatformError) -> Self {
        use crate::error::ErrorKind;
        match err {
            PlatformError::NotFound => ErrorKind::NotFound("platform resource".into()),
            PlatformError::Forbidden => ErrorKind::Forbidden("platform resource".into()),
            PlatformError::RateLimited { reset_at } => {
                ErrorKind::RateLimited { reset_at: Some(reset_at) }
            }
            PlatformError::Transient(msg) => ErrorKind::Transient(msg),
            PlatformError::Malformed(msg) => ErrorKind::Malformed(msg),
        }
    }
}

/// The typed capability consumed by the core engine (§6). Concrete
/// implementations (`platform::github::GitHubPlatformClient`, or a mock for
/// tests) supply the actual transport.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Identity of the authenticated actor (used for the "already approved
    /// by this actor" check and for startup credential validation).
    async fn get_authenticated_identity(&self) -> Result<String, PlatformError>;

    async fn list_open_prs(&self, repo: &RepoRef) -> Result<Vec<PullRequest>, PlatformError>;

    async fn get_repo_meta(&self, repo: &RepoRef) -> Result<RepoMeta, PlatformError>;

    async fn get_pr(&self, repo: &RepoRef, number: u64) -> Result<PullRequest, PlatformError>;

    async fn approve_pr(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<(), PlatformError>;

    async fn get_issue_by_title(
        &self,
        repo: &RepoRef,
        title: &str,
    ) -> Result<Option<Issue>, PlatformError>;

    async fn create_issue(
        &self,
        repo: &RepoRef,
        title: &str,
        body: &str,
    ) -> Result<Issue, PlatformError>;

    async fn update_issue(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<(), PlatformError>;

    async fn get_rate_limit(&self) -> Result<RateSnapshot, PlatformError>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    //! An in-memory `PlatformClient` for unit and integration tests, grounded
    //! in the teacher's `MockTmuxClient` / `MockActivityDetector` pattern:
    //! deterministic, injectable, no network access.
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockPlatformClient {
        pub prs: Mutex<HashMap<(RepoRef, u64), PullRequest>>,
        pub issues: Mutex<HashMap<(RepoRef, String), Issue>>,
        pub approvals: Mutex<Vec<(RepoRef, u64)>>,
        pub identity: String,
        pub rate: Mutex<RateSnapshot>,
        pub archived: Mutex<HashMap<RepoRef, bool>>,
    }

    impl MockPlatformClient {
        pub fn new() -> Self {
            Self {
                identity: "renovate-agent[bot]".to_string(),
                rate: Mutex::new(RateSnapshot {
                    remaining: 5000,
                    limit: 5000,
                    reset_at: SystemTime::now() + std::time::Duration::from_secs(3600),
                }),
                ..Default::default()
            }
        }

        pub fn insert_pr(&self, repo: RepoRef, pr: PullRequest) {
            self.prs.lock().unwrap().insert((repo, pr.number), pr);
        }

        pub fn approval_count(&self, repo: &RepoRef, number: u64) -> usize {
            self.approvals
                .lock()
                .unwrap()
                .iter()
                .filter(|(r, n)| r == repo && *n == number)
                .count()
        }

        pub fn set_archived(&self, repo: RepoRef, archived: bool) {
            self.archived.lock().unwrap().insert(repo, archived);
        }
    }

    #[async_trait]
    impl PlatformClient for MockPlatformClient {
        async fn get_authenticated_identity(&self) -> Result<String, PlatformError> {
            Ok(self.identity.clone())
        }

        async fn get_repo_meta(&self, repo: &RepoRef) -> Result<RepoMeta, PlatformError> {
            Ok(RepoMeta {
                archived: self.archived.lock().unwrap().get(repo).copied().unwrap_or(false),
            })
        }

        async fn list_open_prs(&self, repo: &RepoRef) -> Result<Vec<PullRequest>, PlatformError> {
            Ok(self
                .prs
                .lock()
                .unwrap()
                .values()
                .filter(|pr| pr.state == PrState::Open)
                .cloned()
                .collect())
        }

        async fn get_pr(&self, repo: &RepoRef, number: u64) -> Result<PullRequest, PlatformError> {
            self.prs
                .lock()
                .unwrap()
                .get(&(repo.clone(), number))
                .cloned()
                .ok_or(PlatformError::NotFound)
        }

        async fn approve_pr(
            &self,
            repo: &RepoRef,
            number: u64,
            _body: &str,
        ) -> Result<(), PlatformError> {
            self.approvals.lock().unwrap().push((repo.clone(), number));
            Ok(())
        }

        async fn get_issue_by_title(
            &self,
            repo: &RepoRef,
            title: &str,
        ) -> Result<Option<Issue>, PlatformError> {
            Ok(self
                .issues
                .lock()
                .unwrap()
                .get(&(repo.clone(), title.to_string()))
                .cloned())
        }

        async fn create_issue(
            &self,
            repo: &RepoRef,
            title: &str,
            body: &str,
        ) -> Result<Issue, PlatformError> {
            let mut issues = self.issues.lock().unwrap();
            let number = issues.len() as u64 + 1;
            let issue = Issue {
                number,
                title: title.to_string(),
                body: body.to_string(),
            };
            issues.insert((repo.clone(), title.to_string()), issue.clone());
            Ok(issue)
        }

        async fn update_issue(
            &self,
            repo: &RepoRef,
            number: u64,
            body: &str,
        ) -> Result<(), PlatformError> {
            let mut issues = self.issues.lock().unwrap();
            if let Some(issue) = issues.values_mut().find(|i| i.number == number) {
                issue.body = body.to_string();
                Ok(())
            } else {
                let _ = repo;
                Err(PlatformError::NotFound)
            }
        }

        async fn get_rate_limit(&self) -> Result<RateSnapshot, PlatformError> {
            Ok(*self.rate.lock().unwrap())
        }
    }
}
