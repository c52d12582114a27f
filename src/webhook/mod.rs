//! Event Intake (C6): the webhook/serverless entrypoint. Verifies an
//! HMAC-SHA256 signature, normalizes the payload into a typed event, and
//! enqueues relevant PRs into the `Deduplicator` with `source=event`.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::platform::RepoRef;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeError {
    InvalidSignature,
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelevantEvent {
    pub repo: RepoRef,
    pub number: u64,
}

/// Verify `X-Hub-Signature-256: sha256=<hex>` against `body` using `secret`,
/// constant-time.
pub fn verify_signature(secret: &str, signature_header: Option<&str>, body: &[u8]) -> bool {
    let Some(header) = signature_header else {
        return false;
    };
    let Some(hex_sig) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(provided) = hex::decode(hex_sig) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    // Constant-time comparison regardless of length mismatch: compare against
    // a zero-padded/truncated buffer rather than short-circuiting on length.
    if provided.len() != expected.len() {
        return false;
    }
    provided.ct_eq(&expected).into()
}

#[derive(Debug, Deserialize)]
struct RepoField {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestField {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct PullRequestEventBody {
    action: String,
    repository: RepoField,
    pull_request: PullRequestField,
}

#[derive(Debug, Deserialize)]
struct CheckSuitePrRef {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct CheckSuiteField {
    status: String,
    pull_requests: Vec<CheckSuitePrRef>,
}

#[derive(Debug, Deserialize)]
struct CheckSuiteEventBody {
    repository: RepoField,
    check_suite: CheckSuiteField,
}

const RELEVANT_PR_ACTIONS: &[&str] = &["opened", "synchronize", "reopened", "ready_for_review", "closed"];

/// Parse a webhook body for `event_type` and decide whether it is
/// PR-relevant. Returns `Ok(None)` for a recognized-but-irrelevant event
/// (still a 200 response, per §4.6).
pub fn parse_event(event_type: &str, body: &[u8]) -> Result<Option<RelevantEvent>, IntakeError> {
    match event_type {
        "pull_request" => {
            let payload: PullRequestEventBody = serde_json::from_slice(body)
                .map_err(|err| IntakeError::Malformed(err.to_string()))?;
            if !RELEVANT_PR_ACTIONS.contains(&payload.action.as_str()) {
                return Ok(None);
            }
            let repo = payload
                .repository
                .full_name
                .parse::<RepoRef>()
                .map_err(IntakeError::Malformed)?;
            Ok(Some(RelevantEvent {
                repo,
                number: payload.pull_request.number,
            }))
        }
        "check_suite" | "check_run" => {
            let payload: CheckSuiteEventBody = serde_json::from_slice(body)
                .map_err(|err| IntakeError::Malformed(err.to_string()))?;
            if payload.check_suite.status != "completed" {
                return Ok(None);
            }
            let Some(pr_ref) = payload.check_suite.pull_requests.first() else {
                return Ok(None);
            };
            let repo = payload
                .repository
                .full_name
                .parse::<RepoRef>()
                .map_err(IntakeError::Malformed)?;
            Ok(Some(RelevantEvent {
                repo,
                number: pr_ref.number,
            }))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_is_accepted() {
        let body = b"{\"hello\":\"world\"}";
        let sig = sign("s3cr3t", body);
        assert!(verify_signature("s3cr3t", Some(&sig), body));
    }

    #[test]
    fn single_byte_mutation_is_rejected() {
        let body = b"{\"hello\":\"world\"}";
        let sig = sign("s3cr3t", body);
        let mutated = b"{\"hello\":\"worle\"}";
        assert!(!verify_signature("s3cr3t", Some(&sig), mutated));
    }

    #[test]
    fn missing_header_is_rejected() {
        assert!(!verify_signature("s3cr3t", None, b"body"));
    }

    #[test]
    fn malformed_header_is_rejected() {
        assert!(!verify_signature("s3cr3t", Some("not-a-signature"), b"body"));
    }

    #[test]
    fn pull_request_opened_is_relevant() {
        let body = br#"{"action":"opened","repository":{"full_name":"acme/web"},"pull_request":{"number":7}}"#;
        let event = parse_event("pull_request", body).unwrap().unwrap();
        assert_eq!(event.repo, RepoRef::new("acme", "web"));
        assert_eq!(event.number, 7);
    }

    #[test]
    fn pull_request_labeled_is_not_relevant() {
        let body = br#"{"action":"labeled","repository":{"full_name":"acme/web"},"pull_request":{"number":7}}"#;
        assert_eq!(parse_event("pull_request", body).unwrap(), None);
    }

    #[test]
    fn check_suite_incomplete_is_not_relevant() {
        let body = br#"{"repository":{"full_name":"acme/web"},"check_suite":{"status":"in_progress","pull_requests":[{"number":7}]}}"#;
        assert_eq!(parse_event("check_suite", body).unwrap(), None);
    }

    #[test]
    fn check_suite_completed_is_relevant() {
        let body = br#"{"repository":{"full_name":"acme/web"},"check_suite":{"status":"completed","pull_requests":[{"number":9}]}}"#;
        let event = parse_event("check_suite", body).unwrap().unwrap();
        assert_eq!(event.number, 9);
    }

    #[test]
    fn unknown_event_type_is_ignored() {
        assert_eq!(parse_event("star", b"{}").unwrap(), None);
    }

    #[test]
    fn malformed_body_is_rejected() {
        let result = parse_event("pull_request", b"not json");
        assert!(matches!(result, Err(IntakeError::Malformed(_))));
    }
}
