//! Backtest error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bar error: {0}")]
    Core(#[from] palisade_core::CoreError),

    #[error("accounting error: {0}")]
    Portfolio(#[from] palisade_portfolio::PortfolioError),

    #[error("no bar history loaded")]
    EmptyHistory,
}

pub type BacktestResult<T> = Result<T, BacktestError>;
