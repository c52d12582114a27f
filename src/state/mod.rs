//! State Tracker (C3): per-PR fingerprints plus dashboard-issue I/O.
//!
//! The dashboard issue is the sole externalized store (§3 `DashboardRecord`);
//! this module owns its hidden-block encoding and the per-repo lock that
//! makes read-modify-write atomic from a reader's perspective (I2/I3/I4).

pub mod dashboard;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::config::DashboardCreationMode;
use crate::fingerprint::Fingerprint;
use crate::metrics::MetricsRecorder;
use crate::platform::{PlatformClient, PlatformError, RepoRef};

pub use dashboard::{DashboardRecord, PrRecord, Stats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    New,
    Changed,
    Unchanged,
    Vanished,
}

/// Per-repo lock set, satisfying I3 (one cycle per R) and I4 (one PR
/// processor per (R, number), since writes are always per-R).
#[derive(Default)]
pub struct StateTracker {
    locks: AsyncMutex<HashMap<RepoRef, Arc<AsyncMutex<()>>>>,
}

pub struct RepoGuard<'a> {
    _guard: tokio::sync::OwnedMutexGuard<()>,
    _marker: std::marker::PhantomData<&'a ()>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, repo: &RepoRef) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(repo.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquire the per-repo lock. Held across a full read-modify-write cycle
    /// by the caller.
    pub async fn acquire(&self, repo: &RepoRef) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self.lock_for(repo).await;
        lock.lock_owned().await
    }

    /// Try to acquire without blocking; used by the orchestrator's
    /// skip-and-reschedule-on-contention policy (§4.5 step 1).
    pub async fn try_acquire(&self, repo: &RepoRef) -> Option<tokio::sync::OwnedMutexGuard<()>> {
        let lock = self.lock_for(repo).await;
        lock.try_lock_owned().ok()
    }

    pub async fn load(
        &self,
        platform: &dyn PlatformClient,
        repo: &RepoRef,
        issue_title: &str,
        metrics: &MetricsRecorder,
    ) -> Result<DashboardRecord, PlatformError> {
        match platform.get_issue_by_title(repo, issue_title).await? {
            Some(issue) => {
                let (record, rebuilt) = dashboard::parse_checked(&issue.body);
                if rebuilt {
                    metrics.record_dashboard_rebuilt();
                }
                Ok(record)
            }
            None => Ok(DashboardRecord::empty()),
        }
    }

    pub async fn store(
        &self,
        platform: &dyn PlatformClient,
        repo: &RepoRef,
        issue_title: &str,
        record: &DashboardRecord,
        creation_mode: DashboardCreationMode,
        is_test_repo: bool,
    ) -> Result<(), PlatformError> {
        let body = dashboard::render(record);
        match platform.get_issue_by_title(repo, issue_title).await? {
            Some(issue) => {
                platform.update_issue(repo, issue.number, &body).await?;
            }
            None => {
                if should_create(creation_mode, record, is_test_repo) {
                    platform.create_issue(repo, issue_title, &body).await?;
                }
            }
        }
        Ok(())
    }

    pub fn diff(record: &DashboardRecord, number: u64, current: Fingerprint) -> Change {
        match record.per_pr.get(&number) {
            None => Change::New,
            Some(prev) if prev.fingerprint == current => Change::Unchanged,
            Some(_) => Change::Changed,
        }
    }
}

fn should_create(mode: DashboardCreationMode, record: &DashboardRecord, is_test_repo: bool) -> bool {
    match mode {
        DashboardCreationMode::Always => true,
        DashboardCreationMode::Never => false,
        DashboardCreationMode::RenovatePrsPresent => !record.per_pr.is_empty(),
        DashboardCreationMode::TestReposOnly => is_test_repo,
    }
}
