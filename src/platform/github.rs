//! Concrete `PlatformClient` for GitHub's REST API, grounded in the
//! teacher's `api/github.rs` (endpoint shapes, response structs) and
//! `api/github_service.rs` (exponential-backoff retry wrapper around a
//! thinner client).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde::Deserialize;
use tracing::warn;

use super::{
    Check, CheckConclusion, Issue, PlatformClient, PlatformError, PullRequest, RateSnapshot,
    RepoMeta, RepoRef, ReviewDecision,
};
use crate::platform::PrState;
use crate::ratelimit::RateLimitGovernor;

const GITHUB_API_BASE: &str = "https://api.github.com";
const GITHUB_API_VERSION: &str = "2022-11-28";

pub struct GitHubPlatformClient {
    token: String,
    client: reqwest::Client,
    retry: ExponentialBuilder,
    rate: Arc<RateLimitGovernor>,
}

impl GitHubPlatformClient {
    /// `rate` is the same governor instance the rest of the engine acquires
    /// against, seeded here from every response's `x-ratelimit-*` headers
    /// (§4.1) rather than left on its optimistic default forever.
    pub fn new(token: impl Into<String>, rate: Arc<RateLimitGovernor>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("renovate-agent/0.1.0")
            .build()?;
        Ok(Self {
            token: token.into(),
            client,
            retry: ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(250))
                .with_max_delay(Duration::from_secs(10))
                .with_max_times(3),
            rate,
        })
    }

    fn auth_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {}", self.token))
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, PlatformError> {
        let op = || async {
            let response = self
                .auth_headers(self.client.get(url))
                .send()
                .await
                .map_err(map_reqwest_error)?;
            observe_rate_headers(response.headers(), &self.rate);
            classify_status(response.status().as_u16())?;
            response.json::<T>().await.map_err(|err| {
                PlatformError::Malformed(format!("failed to parse response body: {err}"))
            })
        };

        op.retry(self.retry)
            .when(|err: &PlatformError| matches!(err, PlatformError::Transient(_)))
            .notify(|err, dur| warn!("retrying GitHub request after {:?}: {}", dur, err))
            .await
    }
}

fn map_reqwest_error(err: reqwest::Error) -> PlatformError {
    if err.is_timeout() || err.is_connect() {
        PlatformError::Transient(err.to_string())
    } else {
        PlatformError::Transient(err.to_string())
    }
}

/// Seed the shared governor from `x-ratelimit-*` response headers, present
/// on every GitHub REST response regardless of status code. Silently a
/// no-op when a header is missing or unparseable — the governor just keeps
/// its last-observed view.
fn observe_rate_headers(headers: &reqwest::header::HeaderMap, rate: &RateLimitGovernor) {
    let remaining = header_u64(headers, "x-ratelimit-remaining");
    let limit = header_u64(headers, "x-ratelimit-limit");
    let reset = header_u64(headers, "x-ratelimit-reset");
    if let (Some(remaining), Some(limit), Some(reset)) = (remaining, limit, reset) {
        rate.observe(remaining, limit, SystemTime::UNIX_EPOCH + Duration::from_secs(reset));
    }
}

fn header_u64(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

fn classify_status(status: u16) -> Result<(), PlatformError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(PlatformError::NotFound),
        403 => Err(PlatformError::Forbidden),
        429 => Err(PlatformError::RateLimited {
            reset_at: SystemTime::now() + Duration::from_secs(60),
        }),
        500..=599 => Err(PlatformError::Transient(format!("server error {status}"))),
        other => Err(PlatformError::Malformed(format!("unexpected status {other}"))),
    }
}

#[derive(Debug, Deserialize)]
struct PrResponse {
    number: u64,
    state: String,
    merged: Option<bool>,
    mergeable: Option<bool>,
    mergeable_state: Option<String>,
    head: HeadRef,
    user: UserResponse,
    labels: Vec<LabelResponse>,
    updated_at: String,
}

#[derive(Debug, Deserialize)]
struct HeadRef {
    #[serde(rename = "ref")]
    ref_name: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct LabelResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CheckRunsResponse {
    check_runs: Vec<CheckRunResponse>,
}

#[derive(Debug, Deserialize)]
struct CheckRunResponse {
    name: String,
    conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    state: String,
    user: UserResponse,
}

#[derive(Debug, Deserialize)]
struct IssueSearchResponse {
    items: Vec<IssueResponse>,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    number: u64,
    title: String,
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    archived: bool,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    core: RateLimitCore,
}

#[derive(Debug, Deserialize)]
struct RateLimitCore {
    limit: u64,
    remaining: u64,
    reset: u64,
}

fn conclusion_from_str(s: Option<&str>) -> CheckConclusion {
    match s {
        Some("success") => CheckConclusion::Success,
        Some("failure") => CheckConclusion::Failure,
        Some("neutral") => CheckConclusion::Neutral,
        Some("cancelled") => CheckConclusion::Cancelled,
        Some("timed_out") => CheckConclusion::TimedOut,
        Some("skipped") => CheckConclusion::Skipped,
        Some("action_required") => CheckConclusion::ActionRequired,
        _ => CheckConclusion::Pending,
    }
}

#[async_trait]
impl PlatformClient for GitHubPlatformClient {
    async fn get_authenticated_identity(&self) -> Result<String, PlatformError> {
        #[derive(Deserialize)]
        struct UserMe {
            login: String,
        }
        let url = format!("{GITHUB_API_BASE}/user");
        let me: UserMe = self.get_json(&url).await?;
        Ok(me.login)
    }

    async fn list_open_prs(&self, repo: &RepoRef) -> Result<Vec<PullRequest>, PlatformError> {
        let url = format!(
            "{}/repos/{}/{}/pulls?state=open&per_page=100",
            GITHUB_API_BASE, repo.owner, repo.name
        );
        let prs: Vec<PrResponse> = self.get_json(&url).await?;
        let mut out = Vec::with_capacity(prs.len());
        for pr in prs {
            out.push(self.hydrate(repo, pr).await?);
        }
        Ok(out)
    }

    async fn get_repo_meta(&self, repo: &RepoRef) -> Result<RepoMeta, PlatformError> {
        let url = format!("{}/repos/{}/{}", GITHUB_API_BASE, repo.owner, repo.name);
        let resp: RepoResponse = self.get_json(&url).await?;
        Ok(RepoMeta { archived: resp.archived })
    }

    async fn get_pr(&self, repo: &RepoRef, number: u64) -> Result<PullRequest, PlatformError> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}",
            GITHUB_API_BASE, repo.owner, repo.name, number
        );
        let pr: PrResponse = self.get_json(&url).await?;
        self.hydrate(repo, pr).await
    }

    async fn approve_pr(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<(), PlatformError> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}/reviews",
            GITHUB_API_BASE, repo.owner, repo.name, number
        );
        let response = self
            .auth_headers(self.client.post(&url))
            .json(&serde_json::json!({ "event": "APPROVE", "body": body }))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        observe_rate_headers(response.headers(), &self.rate);
        classify_status(response.status().as_u16())
    }

    async fn get_issue_by_title(
        &self,
        repo: &RepoRef,
        title: &str,
    ) -> Result<Option<Issue>, PlatformError> {
        let query = format!(
            "repo:{}/{} is:issue in:title \"{}\"",
            repo.owner, repo.name, title
        );
        let url = format!(
            "{}/search/issues?q={}",
            GITHUB_API_BASE,
            urlencoding_lite(&query)
        );
        let result: IssueSearchResponse = self.get_json(&url).await?;
        Ok(result
            .items
            .into_iter()
            .find(|issue| issue.title == title)
            .map(|issue| Issue {
                number: issue.number,
                title: issue.title,
                body: issue.body.unwrap_or_default(),
            }))
    }

    async fn create_issue(
        &self,
        repo: &RepoRef,
        title: &str,
        body: &str,
    ) -> Result<Issue, PlatformError> {
        let url = format!("{}/repos/{}/{}/issues", GITHUB_API_BASE, repo.owner, repo.name);
        let response = self
            .auth_headers(self.client.post(&url))
            .json(&serde_json::json!({ "title": title, "body": body }))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        observe_rate_headers(response.headers(), &self.rate);
        classify_status(response.status().as_u16())?;
        let created: IssueResponse = response
            .json()
            .await
            .map_err(|err| PlatformError::Malformed(err.to_string()))?;
        Ok(Issue {
            number: created.number,
            title: created.title,
            body: created.body.unwrap_or_default(),
        })
    }

    async fn update_issue(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<(), PlatformError> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}",
            GITHUB_API_BASE, repo.owner, repo.name, number
        );
        let response = self
            .auth_headers(self.client.patch(&url))
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        observe_rate_headers(response.headers(), &self.rate);
        classify_status(response.status().as_u16())
    }

    async fn get_rate_limit(&self) -> Result<RateSnapshot, PlatformError> {
        let url = format!("{GITHUB_API_BASE}/rate_limit");
        let resp: RateLimitResponse = self.get_json(&url).await?;
        let core = resp.resources.core;
        Ok(RateSnapshot {
            remaining: core.remaining,
            limit: core.limit,
            reset_at: SystemTime::UNIX_EPOCH + Duration::from_secs(core.reset),
        })
    }
}

impl GitHubPlatformClient {
    async fn hydrate(&self, repo: &RepoRef, pr: PrResponse) -> Result<PullRequest, PlatformError> {
        let checks_url = format!(
            "{}/repos/{}/{}/commits/{}/check-runs",
            GITHUB_API_BASE, repo.owner, repo.name, pr.head.sha
        );
        let checks_resp: CheckRunsResponse = self.get_json(&checks_url).await?;
        let checks: Vec<Check> = checks_resp
            .check_runs
            .into_iter()
            .map(|c| Check {
                name: c.name,
                conclusion: conclusion_from_str(c.conclusion.as_deref()),
                required: true,
            })
            .collect();

        let reviews_url = format!(
            "{}/repos/{}/{}/pulls/{}/reviews",
            GITHUB_API_BASE, repo.owner, repo.name, pr.number
        );
        let reviews: Vec<ReviewResponse> = self.get_json(&reviews_url).await?;
        let my_identity = self.get_authenticated_identity().await.ok();
        let review_decision = resolve_review_decision(&reviews, my_identity.as_deref());

        let state = if pr.merged.unwrap_or(false) {
            PrState::Merged
        } else if pr.state == "closed" {
            PrState::Closed
        } else {
            PrState::Open
        };

        Ok(PullRequest {
            number: pr.number,
            author_login: pr.user.login,
            head_ref: pr.head.ref_name,
            head_sha: pr.head.sha,
            state,
            mergeable: pr.mergeable,
            has_conflicts: pr.mergeable_state.as_deref() == Some("dirty"),
            checks,
            review_decision,
            labels: pr.labels.into_iter().map(|l| l.name).collect(),
            updated_at: pr.updated_at,
        })
    }
}

fn resolve_review_decision(reviews: &[ReviewResponse], my_login: Option<&str>) -> ReviewDecision {
    if reviews.iter().any(|r| r.state == "CHANGES_REQUESTED") {
        return ReviewDecision::ChangesRequested;
    }
    let approvals: Vec<&ReviewResponse> = reviews.iter().filter(|r| r.state == "APPROVED").collect();
    if approvals.is_empty() {
        return ReviewDecision::None;
    }
    match my_login {
        Some(login) if approvals.iter().any(|r| r.user.login == login) => {
            ReviewDecision::ApprovedByUs
        }
        _ => ReviewDecision::ApprovedByOther,
    }
}

fn urlencoding_lite(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            ' ' => "%20".to_string(),
            '"' => "%22".to_string(),
            ':' => "%3A".to_string(),
            '/' => "%2F".to_string(),
            c => c.to_string(),
        })
        .collect()
}
