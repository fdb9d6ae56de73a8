//! Retry/backoff/jitter wrapper around every broker call.

use crate::error::{BrokerError, BrokerResult};
use palisade_audit::{events, AuditEvent, AuditLogger, Severity};
use palisade_safety::KillSwitch;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{error, warn};

/// Retry policy for broker calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per call before giving up.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base backoff; attempt n waits `base * 2^n`, capped.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: f64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: f64,
    /// Uniform random jitter added to each backoff.
    #[serde(default = "default_backoff_jitter_secs")]
    pub backoff_jitter_secs: f64,
    /// Shared consecutive-failure count that triggers the kill switch.
    #[serde(default = "default_consecutive_failure_limit")]
    pub consecutive_failure_limit: u32,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_backoff_base_secs() -> f64 {
    1.0
}

fn default_backoff_max_secs() -> f64 {
    30.0
}

fn default_backoff_jitter_secs() -> f64 {
    0.5
}

fn default_consecutive_failure_limit() -> u32 {
    5
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            backoff_jitter_secs: default_backoff_jitter_secs(),
            consecutive_failure_limit: default_consecutive_failure_limit(),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.backoff_base_secs * 2f64.powi(attempt as i32);
        let capped = exp.min(self.backoff_max_secs);
        let jitter = if self.backoff_jitter_secs > 0.0 {
            rand::thread_rng().gen_range(0.0..self.backoff_jitter_secs)
        } else {
            0.0
        };
        Duration::from_secs_f64(capped + jitter)
    }
}

/// Failure counter shared across every wrapped call of a session.
///
/// Any failure increments it; any success resets it. Reaching the limit
/// (across calls, not just within one) triggers the kill switch.
#[derive(Debug, Default)]
pub struct RetryState {
    consecutive_failures: AtomicU32,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    fn increment(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }
}

/// Run one broker operation with retries, backoff, and escalation.
///
/// - An active kill switch fails immediately without contacting the broker.
/// - Transient errors retry up to `retry_attempts` with capped exponential
///   backoff plus jitter; every retry emits an audit event.
/// - The shared failure counter increments per failed attempt and resets
///   on success; at `consecutive_failure_limit` the kill switch is
///   triggered and the call returns a fatal error with no further retries.
/// - Venue-fatal errors skip retrying but still count toward escalation.
pub async fn call_with_retry<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    state: &RetryState,
    kill_switch: &KillSwitch,
    audit: &AuditLogger,
    mut op: F,
) -> BrokerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BrokerResult<T>>,
{
    if let Some(reason) = kill_switch.reason() {
        return Err(BrokerError::Halted {
            operation: operation.to_string(),
            reason,
        });
    }

    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => {
                state.reset();
                return Ok(value);
            }
            Err(e) => {
                let failures = state.increment();
                warn!(
                    operation,
                    attempt,
                    failures,
                    error = %e,
                    "broker call failed"
                );

                if failures >= policy.consecutive_failure_limit {
                    let reason = format!(
                        "broker failure escalation: {failures} consecutive failures \
                         (last: {operation}: {e})"
                    );
                    error!(operation, failures, "triggering kill switch");
                    kill_switch.trigger(&reason);
                    audit.log(AuditEvent::new(
                        events::BROKER_EXHAUSTED,
                        Severity::Critical,
                        json!({
                            "operation": operation,
                            "consecutive_failures": failures,
                            "error": e.to_string(),
                            "escalated": true,
                        }),
                    ));
                    return Err(BrokerError::fatal(operation, reason));
                }

                if !e.is_transient() {
                    audit.log(AuditEvent::new(
                        events::BROKER_EXHAUSTED,
                        Severity::Error,
                        json!({
                            "operation": operation,
                            "error": e.to_string(),
                            "escalated": false,
                        }),
                    ));
                    return Err(e);
                }

                attempt += 1;
                if attempt >= policy.retry_attempts {
                    audit.log(AuditEvent::new(
                        events::BROKER_EXHAUSTED,
                        Severity::Error,
                        json!({
                            "operation": operation,
                            "attempts": attempt,
                            "error": e.to_string(),
                            "escalated": false,
                        }),
                    ));
                    return Err(BrokerError::fatal(
                        operation,
                        format!("retries exhausted after {attempt} attempts: {e}"),
                    ));
                }

                let delay = policy.backoff(attempt - 1);
                audit.log(AuditEvent::new(
                    events::BROKER_RETRY,
                    Severity::Warning,
                    json!({
                        "operation": operation,
                        "attempt": attempt,
                        "delay_ms": delay.as_millis() as u64,
                        "error": e.to_string(),
                    }),
                ));
                tokio::time::sleep(delay).await;
            }
        }
    }
}
