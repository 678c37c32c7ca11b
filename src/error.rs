//! Error types for the book-illustrator library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`]: **Fatal**: the run cannot produce a book (every
//!   candidate model exhausted, test-image pool empty, storage unwritable).
//!   Returned as `Err(PipelineError)` from [`crate::orchestrator::Pipeline`].
//!
//! * [`CandidateError`]: **Non-fatal**: one candidate model failed (rate
//!   limit, malformed JSON, no image in the response). The fallback loop
//!   absorbs it and moves on to the next candidate; it only reaches the caller
//!   inside [`PipelineError::UpstreamUnavailable`] once every candidate failed.
//!
//! Neither type's `Display` output is meant for end users of an HTTP API;
//! [`ErrorBody`] is the sanitised form for that.

use crate::model::RunStage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the book-illustrator library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Upstream errors ──────────────────────────────────────────────────
    /// Every candidate model for a stage failed.
    #[error("All {} candidate models failed during {stage}", failures.len())]
    UpstreamUnavailable {
        stage: RunStage,
        failures: Vec<CandidateFailure>,
    },

    // ── Config errors ────────────────────────────────────────────────────
    /// Invalid configuration, an empty test-image pool, or an unusable
    /// storage location. Never retried.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The caller submitted something the pipeline cannot work on.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ── Rendering errors ─────────────────────────────────────────────────
    /// The document could not be assembled or its bytes could not be written.
    #[error("Rendering failed: {0}")]
    RenderingFailure(String),

    // ── Storage errors ───────────────────────────────────────────────────
    /// The durable storage collaborator rejected an operation.
    #[error("Storage error during {op} ({path}): {source}")]
    Storage {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored record exists but could not be decoded.
    #[error("Corrupt stored record '{path}': {detail}")]
    CorruptRecord { path: PathBuf, detail: String },

    /// No stored record for the requested key.
    #[error("Not found: {0}")]
    NotFound(String),

    // ── Catch-all ────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Stable, machine-readable code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::UpstreamUnavailable { .. } => "upstream_unavailable",
            PipelineError::ConfigurationError(_) => "configuration_error",
            PipelineError::InvalidInput(_) => "invalid_input",
            PipelineError::RenderingFailure(_) => "rendering_failure",
            PipelineError::Storage { .. } | PipelineError::CorruptRecord { .. } => "storage_error",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::Internal(_) => "internal_error",
        }
    }

    /// Per-candidate diagnostics, if this error carries any.
    pub fn candidate_failures(&self) -> &[CandidateFailure] {
        match self {
            PipelineError::UpstreamUnavailable { failures, .. } => failures,
            _ => &[],
        }
    }

    pub(crate) fn storage(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Storage {
            op,
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error from a single candidate model.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CandidateError {
    /// The upstream signalled rate limiting (HTTP 429 / quota exhausted).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The model answered, but not in the expected schema.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// An image model answered without any inline image data.
    #[error("response contained no image data")]
    NoImageData,

    /// Non-success HTTP status other than 429.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Connection-level failure or provider construction failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The caller-side timeout elapsed before the model answered.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
}

impl CandidateError {
    /// `true` when the failure should trigger the shared rate-limit back-off
    /// before the next candidate is tried.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, CandidateError::RateLimited(_))
    }

    /// Classify a provider error message. Providers that only expose a
    /// string error are mapped here so the fallback loop can still tell a
    /// rate limit from any other failure.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("ratelimit")
            || lower.contains("quota")
            || lower.contains("resource_exhausted")
            || lower.contains("too many requests")
        {
            CandidateError::RateLimited(message)
        } else {
            CandidateError::Transport(message)
        }
    }
}

/// One failed candidate, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFailure {
    pub model: String,
    pub error: CandidateError,
}

impl fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.model, self.error)
    }
}

/// Structured error response for the HTTP boundary.
///
/// Carries a generic message and a stable `kind`; internal detail (candidate
/// errors, paths, OS errors) is logged, never sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

impl ErrorBody {
    /// HTTP status an HTTP boundary should pair with this body.
    pub const STATUS: u16 = 500;
}

impl From<&PipelineError> for ErrorBody {
    fn from(err: &PipelineError) -> Self {
        let error = match err {
            PipelineError::UpstreamUnavailable { .. } => {
                "The generation service is currently unavailable. Please try again later."
            }
            PipelineError::ConfigurationError(_) => "The illustration service is misconfigured.",
            PipelineError::InvalidInput(_) => "The submitted manuscript could not be processed.",
            PipelineError::RenderingFailure(_) => "The book could not be rendered.",
            PipelineError::Storage { .. } | PipelineError::CorruptRecord { .. } => {
                "The book could not be saved."
            }
            PipelineError::NotFound(_) => "The requested book was not found.",
            PipelineError::Internal(_) => "An unexpected error occurred.",
        };
        ErrorBody {
            error: error.to_string(),
            kind: err.kind().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_unavailable_display_counts_candidates() {
        let e = PipelineError::UpstreamUnavailable {
            stage: RunStage::Structuring,
            failures: vec![
                CandidateFailure {
                    model: "a".into(),
                    error: CandidateError::RateLimited("429".into()),
                },
                CandidateFailure {
                    model: "b".into(),
                    error: CandidateError::Malformed("not json".into()),
                },
            ],
        };
        let msg = e.to_string();
        assert!(msg.contains("All 2"), "got: {msg}");
        assert!(msg.contains("structuring"), "got: {msg}");
        assert_eq!(e.candidate_failures().len(), 2);
    }

    #[test]
    fn classify_rate_limit_messages() {
        assert!(CandidateError::from_message("HTTP 429 Too Many Requests").is_rate_limited());
        assert!(CandidateError::from_message("RESOURCE_EXHAUSTED: quota").is_rate_limited());
        assert!(CandidateError::from_message("Rate limit exceeded").is_rate_limited());
        assert!(!CandidateError::from_message("connection refused").is_rate_limited());
        assert!(!CandidateError::Malformed("x".into()).is_rate_limited());
    }

    #[test]
    fn error_body_hides_internal_detail() {
        let e = PipelineError::UpstreamUnavailable {
            stage: RunStage::Structuring,
            failures: vec![CandidateFailure {
                model: "gemini-secret-model".into(),
                error: CandidateError::Api {
                    status: 500,
                    message: "stack trace here".into(),
                },
            }],
        };
        let body = ErrorBody::from(&e);
        assert_eq!(body.kind, "upstream_unavailable");
        assert!(!body.error.contains("gemini-secret-model"));
        assert!(!body.error.contains("stack trace"));

        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"kind\":\"upstream_unavailable\""));
    }

    #[test]
    fn storage_error_keeps_source() {
        use std::error::Error as _;
        let e = PipelineError::storage(
            "write snapshot",
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(e.to_string().contains("write snapshot"));
        assert!(e.source().is_some());
        assert_eq!(e.kind(), "storage_error");
    }
}
