//! Fingerprint computation over a pull request's action-relevant fields.
//!
//! Only these six inputs may influence the digest: any other field change
//! (labels, description edits, unrelated comments) must not alter it, or
//! idempotence (I1) breaks.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::platform::{CheckAggregate, PrState, ReviewDecision};

/// A fixed-size digest over a PR's action-relevant fields. Compares only by
/// equality — never ordered, never partially inspected by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn compute(
        state: PrState,
        head_sha: &str,
        mergeable: Option<bool>,
        checks: CheckAggregate,
        review_decision: ReviewDecision,
        has_conflicts: bool,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update([state as u8]);
        hasher.update(head_sha.as_bytes());
        hasher.update([0]); // separator so head_sha can't run into the next field
        hasher.update([mergeable_tag(mergeable)]);
        hasher.update([checks as u8]);
        hasher.update([review_decision as u8]);
        hasher.update([u8::from(has_conflicts)]);
        Self(hasher.finalize().into())
    }

    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

fn mergeable_tag(mergeable: Option<bool>) -> u8 {
    match mergeable {
        Some(true) => 1,
        Some(false) => 2,
        None => 0,
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid fingerprint hex: {s:?}")))
    }
}
