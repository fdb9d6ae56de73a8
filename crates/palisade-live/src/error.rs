//! Live pipeline error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LiveError {
    /// The kill switch is active; the session unwinds gracefully.
    #[error("session halted: {0}")]
    Halted(String),

    /// A broker call failed fatally (after retries / escalation).
    #[error("broker failure: {0}")]
    Broker(#[from] palisade_broker::BrokerError),
}

pub type LiveResult<T> = Result<T, LiveError>;
