//! FIFO lot matching.

use crate::error::{PortfolioError, PortfolioResult};
use std::collections::{HashMap, VecDeque};
use tracing::trace;

#[derive(Debug, Clone, Copy)]
struct Lot {
    quantity: f64,
    price: f64,
}

/// Per-symbol FIFO lot book.
///
/// Buys append a lot; sells consume the oldest lots first and return the
/// realized PnL matched against each consumed slice. The average entry
/// price of what remains is the quantity-weighted mean of the open lots.
#[derive(Debug, Default)]
pub struct LotBook {
    lots: HashMap<String, VecDeque<Lot>>,
}

impl LotBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a buy fill.
    pub fn buy(&mut self, symbol: &str, quantity: f64, price: f64) -> PortfolioResult<()> {
        if !(quantity > 0.0 && quantity.is_finite() && price > 0.0 && price.is_finite()) {
            return Err(PortfolioError::InvalidFill {
                symbol: symbol.to_string(),
                quantity,
                price,
            });
        }
        self.lots
            .entry(symbol.to_string())
            .or_default()
            .push_back(Lot { quantity, price });
        trace!(symbol, quantity, price, "lot opened");
        Ok(())
    }

    /// Record a sell fill; returns the realized PnL matched FIFO.
    ///
    /// Selling 8 against lots of 5@100 and 5@110 at price p realizes
    /// `5*(p-100) + 3*(p-110)` and leaves 2@110 open.
    pub fn sell(&mut self, symbol: &str, quantity: f64, price: f64) -> PortfolioResult<f64> {
        if !(quantity > 0.0 && quantity.is_finite() && price > 0.0 && price.is_finite()) {
            return Err(PortfolioError::InvalidFill {
                symbol: symbol.to_string(),
                quantity,
                price,
            });
        }

        let held = self.quantity(symbol);
        if quantity > held + 1e-9 {
            return Err(PortfolioError::SellExceedsHolding {
                symbol: symbol.to_string(),
                requested: quantity,
                held,
            });
        }

        let lots = self.lots.get_mut(symbol).expect("held > 0 implies lots");
        let mut remaining = quantity;
        let mut realized = 0.0;

        while remaining > 1e-9 {
            let lot = match lots.front_mut() {
                Some(lot) => lot,
                None => break,
            };
            let consumed = remaining.min(lot.quantity);
            realized += consumed * (price - lot.price);
            lot.quantity -= consumed;
            remaining -= consumed;
            if lot.quantity <= 1e-9 {
                lots.pop_front();
            }
        }

        if lots.is_empty() {
            self.lots.remove(symbol);
        }
        trace!(symbol, quantity, price, realized, "lots consumed");
        Ok(realized)
    }

    /// Total held quantity for a symbol.
    pub fn quantity(&self, symbol: &str) -> f64 {
        self.lots
            .get(symbol)
            .map(|lots| lots.iter().map(|l| l.quantity).sum())
            .unwrap_or(0.0)
    }

    /// Quantity-weighted average entry price of the remaining lots.
    pub fn avg_entry_price(&self, symbol: &str) -> Option<f64> {
        let lots = self.lots.get(symbol)?;
        let total: f64 = lots.iter().map(|l| l.quantity).sum();
        if total <= 0.0 {
            return None;
        }
        Some(lots.iter().map(|l| l.quantity * l.price).sum::<f64>() / total)
    }

    pub fn is_flat(&self, symbol: &str) -> bool {
        self.quantity(symbol) <= 0.0
    }

    /// Symbols with open lots.
    pub fn open_symbols(&self) -> impl Iterator<Item = &str> {
        self.lots.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_matching() {
        let mut book = LotBook::new();
        book.buy("AAPL", 5.0, 100.0).unwrap();
        book.buy("AAPL", 5.0, 110.0).unwrap();

        // Oldest lots consumed first: 5@100 fully, then 3@110.
        let realized = book.sell("AAPL", 8.0, 120.0).unwrap();
        let expected = 5.0 * (120.0 - 100.0) + 3.0 * (120.0 - 110.0);
        assert!((realized - expected).abs() < 1e-9);

        // 2@110 remain.
        assert!((book.quantity("AAPL") - 2.0).abs() < 1e-9);
        assert!((book.avg_entry_price("AAPL").unwrap() - 110.0).abs() < 1e-9);
    }

    #[test]
    fn test_full_close_removes_symbol() {
        let mut book = LotBook::new();
        book.buy("AAPL", 5.0, 100.0).unwrap();
        book.sell("AAPL", 5.0, 90.0).unwrap();

        assert!(book.is_flat("AAPL"));
        assert!(book.avg_entry_price("AAPL").is_none());
        assert_eq!(book.open_symbols().count(), 0);
    }

    #[test]
    fn test_oversell_rejected() {
        let mut book = LotBook::new();
        book.buy("AAPL", 5.0, 100.0).unwrap();

        let result = book.sell("AAPL", 6.0, 100.0);
        assert!(matches!(
            result,
            Err(PortfolioError::SellExceedsHolding { .. })
        ));
        // Book unchanged.
        assert!((book.quantity("AAPL") - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_avg_entry() {
        let mut book = LotBook::new();
        book.buy("AAPL", 10.0, 100.0).unwrap();
        book.buy("AAPL", 30.0, 120.0).unwrap();

        let avg = book.avg_entry_price("AAPL").unwrap();
        assert!((avg - 115.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_fill_rejected() {
        let mut book = LotBook::new();
        assert!(book.buy("AAPL", 0.0, 100.0).is_err());
        assert!(book.buy("AAPL", 1.0, f64::NAN).is_err());
        assert!(book.sell("AAPL", -1.0, 100.0).is_err());
    }

    #[test]
    fn test_realized_loss() {
        let mut book = LotBook::new();
        book.buy("AAPL", 10.0, 100.0).unwrap();
        let realized = book.sell("AAPL", 10.0, 95.0).unwrap();
        assert!((realized + 50.0).abs() < 1e-9);
    }
}
