//! Broker error taxonomy.

use thiserror::Error;

/// Broker call failures, split by how the resilience wrapper treats them.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Retryable: timeouts, rate limits, transient venue errors. Invisible
    /// to the caller unless retries exhaust.
    #[error("transient broker error in {operation}: {message}")]
    Transient { operation: String, message: String },

    /// Not retryable: the session must unwind. Raised directly by venues
    /// for unrecoverable conditions, or by the wrapper after exhaustion /
    /// consecutive-failure escalation.
    #[error("fatal broker error in {operation}: {message}")]
    Fatal { operation: String, message: String },

    /// The kill switch was already active; the broker was not contacted.
    #[error("broker call {operation} suppressed: kill switch active ({reason})")]
    Halted { operation: String, reason: String },
}

impl BrokerError {
    pub fn transient(operation: &str, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn fatal(operation: &str, message: impl Into<String>) -> Self {
        Self::Fatal {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;
