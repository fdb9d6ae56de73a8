//! Safety error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SafetyError {
    /// Sentinel returned by `KillSwitch::check` while the switch is active.
    /// Consumed once per bar by the pipelines; never unwinds past the loop.
    #[error("kill switch active: {reason}")]
    KillSwitchActive { reason: String },

    #[error("kill switch stores must be distinct per mode: {path} is reused")]
    StorePathConflict { path: String },

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type SafetyResult<T> = Result<T, SafetyError>;
