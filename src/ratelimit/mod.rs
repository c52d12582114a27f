//! Rate-Limit Governor (C1): a shared, task-safe view of remote API quota.
//!
//! Every platform caller routes acquisition through here; no retry policy
//! lives in this module, only admission and backoff sizing.

use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::config::RateConfig;

#[derive(Debug, Clone, Copy)]
pub struct RateSnapshot {
    pub remaining: u64,
    pub limit: u64,
    pub reset_at: SystemTime,
    pub usage_fraction: f64,
}

#[derive(Debug)]
struct State {
    remaining: u64,
    limit: u64,
    reset_at: SystemTime,
}

impl Default for State {
    fn default() -> Self {
        Self {
            // Optimistic until the first `observe`: a freshly constructed
            // governor has no evidence of exhaustion, so it admits until the
            // platform actually reports a tight quota. Once observed, stale
            // (un-refreshed) headers are never replaced by a rosier guess.
            remaining: u64::MAX,
            limit: u64::MAX,
            reset_at: SystemTime::now() + Duration::from_secs(60),
        }
    }
}

pub struct RateLimitGovernor {
    state: Mutex<State>,
    buffer: u64,
    throttle_threshold: f64,
    throttle_factor: u32,
}

pub struct Admission {
    pub admitted: bool,
    pub delay_hint: Duration,
}

impl RateLimitGovernor {
    pub fn new(config: &RateConfig) -> Self {
        Self {
            state: Mutex::new(State::default()),
            buffer: config.buffer,
            throttle_threshold: config.throttle_threshold,
            throttle_factor: config.throttle_factor,
        }
    }

    /// Admit a call of the given `weight` against current quota.
    pub fn acquire(&self, weight: u64) -> Admission {
        let state = self.state.lock().unwrap();
        let _ = weight; // admission is boolean per-call, not weight-subtracted; weight is informational for callers sizing batches
        if state.remaining > self.buffer {
            Admission {
                admitted: true,
                delay_hint: Duration::ZERO,
            }
        } else {
            let now = SystemTime::now();
            let mut delay = state.reset_at.duration_since(now).unwrap_or(Duration::ZERO);
            let usage_fraction = usage_fraction(state.remaining, state.limit);
            if usage_fraction > self.throttle_threshold {
                delay = delay.saturating_mul(self.throttle_factor);
            }
            Admission {
                admitted: false,
                delay_hint: delay,
            }
        }
    }

    /// Update the governor's view from a platform response.
    pub fn observe(&self, remaining: u64, limit: u64, reset_at: SystemTime) {
        let mut state = self.state.lock().unwrap();
        state.remaining = remaining;
        state.limit = limit.max(1);
        state.reset_at = reset_at;
    }

    pub fn snapshot(&self) -> RateSnapshot {
        let state = self.state.lock().unwrap();
        RateSnapshot {
            remaining: state.remaining,
            limit: state.limit,
            reset_at: state.reset_at,
            usage_fraction: usage_fraction(state.remaining, state.limit),
        }
    }
}

fn usage_fraction(remaining: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 1.0;
    }
    1.0 - (remaining as f64 / limit as f64)
}
