//! Ordered candidate fallback, shared by text and image generation.
//!
//! Each candidate model is called at most once, in list order; the first
//! success wins and no later candidate is called. A rate-limit signal trips
//! the [`BackoffGate`], which every caller holding a clone of the same gate
//! waits on before its next attempt, so one throttled block slows the whole
//! process down instead of letting other workers keep hammering the upstream.

use crate::error::{CandidateError, CandidateFailure};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, warn};

/// Process-wide rate-limit back-off shared by every fallback loop.
#[derive(Debug, Clone, Default)]
pub struct BackoffGate {
    blocked_until: Arc<Mutex<Option<Instant>>>,
}

impl BackoffGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep until any active back-off has elapsed.
    pub async fn wait(&self) {
        let until = *self.blocked_until.lock().await;
        if let Some(until) = until {
            let remaining = until.saturating_duration_since(Instant::now());
            if !remaining.is_zero() {
                debug!("Rate-limit back-off: waiting {:?}", remaining);
                sleep_until(until).await;
            }
        }
    }

    /// Block all callers for `duration` from now. Never shortens an active back-off.
    pub async fn trip(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut guard = self.blocked_until.lock().await;
        *guard = Some(match *guard {
            Some(current) if current > until => current,
            _ => until,
        });
    }
}

/// How a fallback loop paces and bounds its candidate calls.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    pub gate: BackoffGate,
    /// Pause applied after a rate-limit signal.
    pub backoff: Duration,
    /// Caller-side timeout for each candidate call.
    pub call_timeout: Option<Duration>,
}

impl FallbackPolicy {
    pub fn new(gate: BackoffGate, backoff: Duration, call_timeout: Option<Duration>) -> Self {
        Self {
            gate,
            backoff,
            call_timeout,
        }
    }
}

/// Try `candidates` in order until `call` succeeds.
///
/// Returns the winning model together with its output, or every recorded
/// failure when the list is exhausted. `label` only appears in log lines.
pub async fn first_success<T, F, Fut>(
    label: &str,
    candidates: &[String],
    policy: &FallbackPolicy,
    mut call: F,
) -> Result<(String, T), Vec<CandidateFailure>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, CandidateError>>,
{
    let mut failures = Vec::new();

    for model in candidates.iter().filter(|m| !m.trim().is_empty()) {
        policy.gate.wait().await;
        debug!("{}: trying {}", label, model);

        let result = match policy.call_timeout {
            Some(limit) => match timeout(limit, call(model.clone())).await {
                Ok(r) => r,
                Err(_) => Err(CandidateError::Timeout {
                    secs: limit.as_secs(),
                }),
            },
            None => call(model.clone()).await,
        };

        match result {
            Ok(value) => return Ok((model.clone(), value)),
            Err(error) => {
                warn!("{}: {} failed: {}", label, model, error);
                if error.is_rate_limited() {
                    policy.gate.trip(policy.backoff).await;
                }
                failures.push(CandidateFailure {
                    model: model.clone(),
                    error,
                });
            }
        }
    }

    Err(failures)
}
