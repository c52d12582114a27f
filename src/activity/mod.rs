//! Activity Scorer (C4): a rolling per-repo [0,1] score driving the next
//! poll interval (§4.4). Stateless across restarts by design — warm-up
//! happens within a handful of cycles.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::platform::RepoRef;

#[derive(Debug, Clone, Copy)]
pub struct IntervalConfig {
    pub base_seconds: u64,
    pub max_seconds: u64,
    pub cooldown_after_empty_cycles: u32,
    pub cooldown_multiplier: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct RepoActivity {
    score: f64,
    consecutive_empty: u32,
}

pub struct ActivityScorer {
    repos: Mutex<HashMap<RepoRef, RepoActivity>>,
    config: IntervalConfig,
}

pub struct CycleResult {
    pub changed: bool,
}

impl ActivityScorer {
    pub fn new(config: IntervalConfig) -> Self {
        Self {
            repos: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn observe(&self, repo: &RepoRef, result: CycleResult) {
        let mut repos = self.repos.lock().unwrap();
        let entry = repos.entry(repo.clone()).or_default();
        if result.changed {
            entry.score = (entry.score + 0.4).min(1.0);
            entry.consecutive_empty = 0;
        } else {
            entry.score = (entry.score * 0.75).max(0.0);
            entry.consecutive_empty += 1;
        }
    }

    pub fn score(&self, repo: &RepoRef) -> f64 {
        self.repos
            .lock()
            .unwrap()
            .get(repo)
            .map(|e| e.score)
            .unwrap_or(0.0)
    }

    pub fn next_interval(&self, repo: &RepoRef) -> Duration {
        let repos = self.repos.lock().unwrap();
        let entry = repos.get(repo).copied().unwrap_or_default();
        let base = interval_for_score(entry.score, self.config.base_seconds);
        let mut seconds = base;
        if entry.consecutive_empty >= self.config.cooldown_after_empty_cycles {
            seconds = ((base as f64) * self.config.cooldown_multiplier) as u64;
        }
        Duration::from_secs(seconds.min(self.config.max_seconds))
    }
}

fn interval_for_score(score: f64, base_seconds: u64) -> u64 {
    let mapped = if score >= 0.7 {
        base_seconds
    } else if score >= 0.4 {
        base_seconds * 2
    } else if score >= 0.15 {
        base_seconds * 5
    } else {
        base_seconds * 15
    };
    mapped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> IntervalConfig {
        IntervalConfig {
            base_seconds: 60,
            max_seconds: 3600,
            cooldown_after_empty_cycles: 5,
            cooldown_multiplier: 1.5,
        }
    }

    fn repo() -> RepoRef {
        RepoRef::new("acme", "web")
    }

    #[test]
    fn score_rises_on_change_from_zero() {
        let scorer = ActivityScorer::new(config());
        scorer.observe(&repo(), CycleResult { changed: true });
        assert!((scorer.score(&repo()) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn score_decays_on_no_change() {
        let scorer = ActivityScorer::new(config());
        scorer.observe(&repo(), CycleResult { changed: true });
        scorer.observe(&repo(), CycleResult { changed: false });
        assert!((scorer.score(&repo()) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn score_saturates_at_one() {
        let scorer = ActivityScorer::new(config());
        for _ in 0..10 {
            scorer.observe(&repo(), CycleResult { changed: true });
        }
        assert!(scorer.score(&repo()) <= 1.0);
    }

    #[test]
    fn score_never_drops_below_zero() {
        let scorer = ActivityScorer::new(config());
        for _ in 0..50 {
            scorer.observe(&repo(), CycleResult { changed: false });
        }
        assert!(scorer.score(&repo()) >= 0.0);
    }

    #[test]
    fn ten_consecutive_empty_cycles_raise_interval_by_at_least_1_5x_base() {
        let scorer = ActivityScorer::new(config());
        for _ in 0..10 {
            scorer.observe(&repo(), CycleResult { changed: false });
        }
        let interval = scorer.next_interval(&repo());
        assert!(interval.as_secs() as f64 >= 60.0 * 1.5);
    }

    #[test]
    fn high_score_maps_to_base_interval() {
        let scorer = ActivityScorer::new(config());
        scorer.observe(&repo(), CycleResult { changed: true });
        scorer.observe(&repo(), CycleResult { changed: true });
        assert_eq!(scorer.next_interval(&repo()), Duration::from_secs(60));
    }

    #[test]
    fn interval_caps_at_configured_max() {
        let mut cfg = config();
        cfg.max_seconds = 100;
        let scorer = ActivityScorer::new(cfg);
        for _ in 0..10 {
            scorer.observe(&repo(), CycleResult { changed: false });
        }
        assert_eq!(scorer.next_interval(&repo()), Duration::from_secs(100));
    }
}
