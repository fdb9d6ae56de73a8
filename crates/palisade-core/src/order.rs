//! Order lifecycle types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns 1 for buy, -1 for sell (for cash-flow calculations).
    pub fn sign(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order lifecycle status. Filled, Cancelled, and Rejected are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Filled => write!(f, "filled"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Unique order identifier.
///
/// Every order carries a fresh UUID so retried submissions stay
/// distinguishable in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A risk-approved order on its way to (or back from) a broker.
///
/// Created by the risk manager, mutated by broker/fill logic. `filled_at`,
/// when set, is always UTC by type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub status: OrderStatus,
    pub filled_price: Option<f64>,
    pub filled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(symbol: impl Into<String>, side: OrderSide, quantity: f64) -> Self {
        Self {
            id: OrderId::new(),
            symbol: symbol.into(),
            side,
            quantity,
            stop_loss: None,
            take_profit: None,
            status: OrderStatus::Pending,
            filled_price: None,
            filled_at: None,
            created_at: Utc::now(),
        }
    }

    /// Attach protective stop levels, builder-style.
    pub fn with_stops(mut self, stop_loss: Option<f64>, take_profit: Option<f64>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    /// Transition to Filled at the given price and time.
    pub fn fill(&mut self, price: f64, at: DateTime<Utc>) {
        self.status = OrderStatus::Filled;
        self.filled_price = Some(price);
        self.filled_at = Some(at);
    }

    pub fn notional(&self, price: f64) -> f64 {
        self.quantity * price
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_id_unique() {
        assert_ne!(OrderId::new(), OrderId::new());
    }

    #[test]
    fn test_side_opposite_and_sign() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Buy.sign(), 1);
        assert_eq!(OrderSide::Sell.sign(), -1);
    }

    #[test]
    fn test_fill_transition() {
        let mut order = Order::new("AAPL", OrderSide::Buy, 10.0);
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(!order.status.is_terminal());

        order.fill(150.25, Utc::now());
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.status.is_terminal());
        assert_eq!(order.filled_price, Some(150.25));
        assert!(order.filled_at.is_some());
    }
}
