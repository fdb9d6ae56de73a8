//! Open position state.

use serde::{Deserialize, Serialize};

/// An open long position in a symbol.
///
/// Quantity stays non-negative while the position is open; holders remove
/// the entry from their maps once quantity reaches zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub current_price: f64,
}

impl Position {
    pub fn new(symbol: impl Into<String>, quantity: f64, entry_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            avg_entry_price: entry_price,
            current_price: entry_price,
        }
    }

    /// Market value at the last marked price.
    pub fn market_value(&self) -> f64 {
        self.quantity * self.current_price
    }

    /// Unrealized PnL against the average entry price.
    pub fn unrealized_pnl(&self) -> f64 {
        (self.current_price - self.avg_entry_price) * self.quantity
    }

    pub fn is_empty(&self) -> bool {
        self.quantity <= 0.0
    }

    /// Mark the position to a new price.
    pub fn mark(&mut self, price: f64) {
        self.current_price = price;
    }
}
