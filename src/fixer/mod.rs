//! The `Fixer` capability (§6): an optional, language-specific hook invoked
//! when a dependency-update PR's checks fail in a way the agent believes it
//! can repair (e.g. lockfile regeneration). Mirrors the teacher's pluggable
//! detector trait shape in `agents/activity.rs`.

use async_trait::async_trait;

use crate::platform::RepoRef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixOutcome {
    Ok { commits_pushed: u32 },
    Err { reason: String },
}

#[async_trait]
pub trait Fixer: Send + Sync {
    /// Attempt to repair `repo`'s `head_ref` for the given `language`.
    /// Returns `FixOutcome::Err` rather than an error type: a failed fix is
    /// an expected outcome recorded against the PR, not a system fault.
    async fn fix(&self, repo: &RepoRef, head_ref: &str, language: &str) -> FixOutcome;

    /// Whether this fixer has anything to offer for `language`.
    fn supports(&self, language: &str) -> bool;
}

/// The default fixer when `fix.enabled = false`: declines every language.
pub struct NoopFixer;

#[async_trait]
impl Fixer for NoopFixer {
    async fn fix(&self, _repo: &RepoRef, _head_ref: &str, _language: &str) -> FixOutcome {
        FixOutcome::Err {
            reason: "fixer disabled".into(),
        }
    }

    fn supports(&self, _language: &str) -> bool {
        false
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    pub struct MockFixer {
        pub languages: Vec<String>,
        pub outcome: FixOutcome,
        pub calls: Mutex<Vec<(RepoRef, String, String)>>,
    }

    impl MockFixer {
        pub fn always_succeeds(languages: &[&str]) -> Self {
            Self {
                languages: languages.iter().map(|s| s.to_string()).collect(),
                outcome: FixOutcome::Ok { commits_pushed: 1 },
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn always_fails(languages: &[&str], reason: &str) -> Self {
            Self {
                languages: languages.iter().map(|s| s.to_string()).collect(),
                outcome: FixOutcome::Err { reason: reason.into() },
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Fixer for MockFixer {
        async fn fix(&self, repo: &RepoRef, head_ref: &str, language: &str) -> FixOutcome {
            self.calls
                .lock()
                .unwrap()
                .push((repo.clone(), head_ref.to_string(), language.to_string()));
            self.outcome.clone()
        }

        fn supports(&self, language: &str) -> bool {
            self.languages.iter().any(|l| l == language)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_fixer_declines_everything() {
        let fixer = NoopFixer;
        assert!(!fixer.supports("rust"));
        let repo = RepoRef::new("acme", "web");
        let outcome = fixer.fix(&repo, "renovate/bump-serde", "rust").await;
        assert!(matches!(outcome, FixOutcome::Err { .. }));
    }
}
