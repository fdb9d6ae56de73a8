//! Core error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid bar for {symbol}: {reason}")]
    InvalidBar { symbol: String, reason: String },

    #[error("invalid signal strength {strength} (must be finite and within [0, 1])")]
    InvalidStrength { strength: f64 },

    #[error("invalid order quantity {quantity} for {symbol}")]
    InvalidQuantity { symbol: String, quantity: f64 },
}

pub type CoreResult<T> = Result<T, CoreError>;
