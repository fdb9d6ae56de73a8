//! Portfolio error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("sell of {requested} exceeds held quantity {held} for {symbol}")]
    SellExceedsHolding {
        symbol: String,
        requested: f64,
        held: f64,
    },

    #[error("invalid fill for {symbol}: quantity {quantity}, price {price}")]
    InvalidFill {
        symbol: String,
        quantity: f64,
        price: f64,
    },
}

pub type PortfolioResult<T> = Result<T, PortfolioError>;
