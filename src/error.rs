//! Crate-wide error kinds.
//!
//! Mirrors the propagation policy: per-PR and per-repo errors are caught and
//! recorded by their owning component, while `ConfigInvalid` and a startup
//! `AuthInvalid` are the only kinds that terminate the process (see
//! `ErrorKind::exit_code`).

use std::time::SystemTime;

use thiserror::Error;

/// Errors surfaced by the core engine.
#[derive(Debug, Error, Clone)]
pub enum ErrorKind {
    /// Configuration failed validation. Fatal at startup.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Platform credentials were rejected. Fatal at startup; at runtime this
    /// becomes a mode transition to degraded instead.
    #[error("invalid credentials: {0}")]
    AuthInvalid(String),

    /// Remote API quota is exhausted.
    #[error("rate limited, reset at {reset_at:?}")]
    RateLimited { reset_at: Option<SystemTime> },

    /// The requested resource does not exist (or is no longer visible).
    #[error("not found: {0}")]
    NotFound(String),

    /// Credentials are valid but lack permission for this resource.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A transient failure (network error, 5xx, timeout). Safe to retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// An inbound event could not be parsed into a known shape.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The dependency fixer ran and reported failure.
    #[error("fixer failed: {0}")]
    FixerFailed(String),
}

impl ErrorKind {
    /// Whether this error should terminate the process when encountered
    /// during startup (§7 propagation policy).
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(self, ErrorKind::ConfigInvalid(_) | ErrorKind::AuthInvalid(_))
    }

    /// Process exit code this error maps to, if it is fatal at startup.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ErrorKind::ConfigInvalid(_) => Some(2),
            ErrorKind::AuthInvalid(_) => Some(3),
            _ => None,
        }
    }

    /// Whether a caller should retry this error (as opposed to recording and
    /// moving on).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient(_) | ErrorKind::RateLimited { .. })
    }

    /// Short machine-readable label, used in metrics (`errors_by_kind`) and
    /// the dashboard's `last_error` field.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::ConfigInvalid(_) => "config_invalid",
            ErrorKind::AuthInvalid(_) => "auth_invalid",
            ErrorKind::RateLimited { .. } => "rate_limited",
            ErrorKind::NotFound(_) => "not_found",
            ErrorKind::Forbidden(_) => "forbidden",
            ErrorKind::Transient(_) => "transient",
            ErrorKind::Malformed(_) => "malformed",
            ErrorKind::FixerFailed(_) => "fixer_failed",
        }
    }
}
