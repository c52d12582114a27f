//! Dashboard-issue body encoding (§3, §6): a human-readable Markdown report
//! followed by a hidden JSON block delimited by an HTML comment sentinel.
//! The hidden block is authoritative; the human block is always regenerated
//! from it, never hand-edited by readers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::fingerprint::Fingerprint;

const SENTINEL_OPEN: &str = "<!-- RENOVATE_AGENT_STATE\n";
const SENTINEL_CLOSE: &str = "\n-->";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrRecord {
    pub fingerprint: Fingerprint,
    pub last_action: String,
    pub last_action_at: String,
    #[serde(default)]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Stats {
    pub cycles: u64,
    pub prs_acted: u64,
    pub approvals: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PollingMetadata {
    pub last_cycle_at: Option<String>,
    pub current_interval_seconds: Option<u64>,
    pub activity_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DashboardRecord {
    pub per_pr: HashMap<u64, PrRecord>,
    pub stats: Stats,
    pub polling_metadata: PollingMetadata,
}

impl DashboardRecord {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Render a dashboard body: a Markdown table followed by the hidden block.
pub fn render(record: &DashboardRecord) -> String {
    let mut body = String::new();
    body.push_str("# Renovate Agent Dashboard\n\n");

    if record.per_pr.is_empty() {
        body.push_str("No tracked pull requests.\n\n");
    } else {
        body.push_str("| PR | Last Action | At | Error |\n");
        body.push_str("|----|-------------|----|-------|\n");
        let mut numbers: Vec<&u64> = record.per_pr.keys().collect();
        numbers.sort();
        for number in numbers {
            let pr = &record.per_pr[number];
            body.push_str(&format!(
                "| #{} | {} | {} | {} |\n",
                number,
                pr.last_action,
                pr.last_action_at,
                pr.last_error.as_deref().unwrap_or("-")
            ));
        }
        body.push('\n');
    }

    body.push_str(&format!(
        "Cycles: {} · Approvals: {} · Activity score: {:.2}\n\n",
        record.stats.cycles,
        record.stats.approvals,
        record.polling_metadata.activity_score.unwrap_or(0.0)
    ));

    let json = serde_json::to_string(record).expect("DashboardRecord always serializes");
    body.push_str(SENTINEL_OPEN);
    body.push_str(&json);
    body.push_str(SENTINEL_CLOSE);
    body
}

/// Parse a dashboard body, locating the hidden block by sentinel. A missing
/// sentinel, or unparseable JSON between sentinels, yields an empty record
/// (§8 scenario 6: corruption recovery).
pub fn parse(body: &str) -> DashboardRecord {
    parse_checked(body).0
}

/// Like `parse`, but also reports whether the hidden block was present yet
/// unparseable, as opposed to simply absent (no dashboard issue yet).
/// Callers bump the `dashboard_rebuilt` metric only in the former case.
pub fn parse_checked(body: &str) -> (DashboardRecord, bool) {
    let Some(start) = body.find(SENTINEL_OPEN) else {
        return (DashboardRecord::empty(), false);
    };
    let json_start = start + SENTINEL_OPEN.len();
    let Some(end_rel) = body[json_start..].find(SENTINEL_CLOSE) else {
        warn!("dashboard hidden block missing closing sentinel, rebuilding");
        return (DashboardRecord::empty(), true);
    };
    let json = &body[json_start..json_start + end_rel];
    match serde_json::from_str(json) {
        Ok(record) => (record, false),
        Err(err) => {
            warn!("dashboard hidden block failed to parse ({err}), rebuilding");
            (DashboardRecord::empty(), true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{CheckAggregate, PrState, ReviewDecision};

    fn sample() -> DashboardRecord {
        let mut record = DashboardRecord::empty();
        record.per_pr.insert(
            7,
            PrRecord {
                fingerprint: Fingerprint::compute(
                    PrState::Open,
                    "abc123",
                    Some(true),
                    CheckAggregate::Success,
                    ReviewDecision::ApprovedByUs,
                    false,
                ),
                last_action: "Approved".into(),
                last_action_at: "2026-01-01T00:00:00Z".into(),
                last_error: None,
            },
        );
        record.stats = Stats {
            cycles: 3,
            prs_acted: 1,
            approvals: 1,
        };
        record.polling_metadata = PollingMetadata {
            last_cycle_at: Some("2026-01-01T00:05:00Z".into()),
            current_interval_seconds: Some(60),
            activity_score: Some(0.4),
        };
        record
    }

    #[test]
    fn round_trip_preserves_record() {
        let record = sample();
        let body = render(&record);
        let parsed = parse(&body);
        assert_eq!(parsed, record);
    }

    #[test]
    fn missing_sentinel_yields_empty_record() {
        let parsed = parse("just some plain text issue body");
        assert_eq!(parsed, DashboardRecord::empty());
    }

    #[test]
    fn truncated_json_yields_empty_record() {
        let mut body = render(&sample());
        let cutoff = body.find(SENTINEL_OPEN).unwrap() + SENTINEL_OPEN.len() + 10;
        body.truncate(cutoff);
        let parsed = parse(&body);
        assert_eq!(parsed, DashboardRecord::empty());
    }

    #[test]
    fn empty_record_renders_without_table() {
        let body = render(&DashboardRecord::empty());
        assert!(body.contains("No tracked pull requests."));
    }
}
