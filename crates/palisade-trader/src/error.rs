//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] palisade_telemetry::TelemetryError),

    #[error("Audit error: {0}")]
    Audit(#[from] palisade_audit::AuditError),

    #[error("Safety error: {0}")]
    Safety(#[from] palisade_safety::SafetyError),

    #[error("Risk error: {0}")]
    Risk(#[from] palisade_risk::RiskError),

    #[error("Backtest error: {0}")]
    Backtest(#[from] palisade_backtest::BacktestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
