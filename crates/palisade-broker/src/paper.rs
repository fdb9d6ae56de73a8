//! In-memory paper trading venue.

use crate::error::{BrokerError, BrokerResult};
use crate::traits::Broker;
use async_trait::async_trait;
use chrono::Utc;
use palisade_core::{Order, OrderId, OrderSide, OrderStatus, Position};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Paper venue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperBrokerConfig {
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
    /// Fill slippage applied against the order side.
    #[serde(default = "default_slippage_pct")]
    pub slippage_pct: f64,
    /// Commission per share/unit.
    #[serde(default = "default_commission_per_share")]
    pub commission_per_share: f64,
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
}

fn default_initial_balance() -> f64 {
    100_000.0
}

fn default_slippage_pct() -> f64 {
    0.0005
}

fn default_commission_per_share() -> f64 {
    0.005
}

fn default_base_currency() -> String {
    "USD".to_string()
}

impl Default for PaperBrokerConfig {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
            slippage_pct: default_slippage_pct(),
            commission_per_share: default_commission_per_share(),
            base_currency: default_base_currency(),
        }
    }
}

#[derive(Debug)]
struct PaperState {
    cash: f64,
    positions: HashMap<String, Position>,
    marks: HashMap<String, f64>,
    /// Remaining scripted failures (for resilience tests).
    fail_remaining: u32,
}

/// Immediate-fill paper broker.
///
/// Orders fill at the last marked price adjusted by slippage against the
/// order side, minus commission. The pipeline marks prices from incoming
/// bars via [`set_market_price`](Self::set_market_price). `fail_next`
/// scripts transient failures so resilience behavior can be exercised
/// without a flaky network.
pub struct PaperBroker {
    config: PaperBrokerConfig,
    state: Mutex<PaperState>,
}

impl PaperBroker {
    pub fn new(config: PaperBrokerConfig) -> Self {
        let cash = config.initial_balance;
        Self {
            config,
            state: Mutex::new(PaperState {
                cash,
                positions: HashMap::new(),
                marks: HashMap::new(),
                fail_remaining: 0,
            }),
        }
    }

    /// Mark a symbol's market price; open positions re-mark immediately.
    pub fn set_market_price(&self, symbol: &str, price: f64) {
        let mut state = self.state.lock();
        state.marks.insert(symbol.to_string(), price);
        if let Some(position) = state.positions.get_mut(symbol) {
            position.mark(price);
        }
    }

    /// Script the next `n` broker calls to fail transiently.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().fail_remaining = n;
    }

    fn check_scripted_failure(&self, operation: &str) -> BrokerResult<()> {
        let mut state = self.state.lock();
        if state.fail_remaining > 0 {
            state.fail_remaining -= 1;
            return Err(BrokerError::transient(operation, "scripted failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn submit_order(&self, mut order: Order) -> BrokerResult<Order> {
        self.check_scripted_failure("submit_order")?;
        let mut state = self.state.lock();

        let mark = match state.marks.get(&order.symbol).copied() {
            Some(mark) => mark,
            None => {
                warn!(symbol = %order.symbol, "no mark price; rejecting order");
                order.status = OrderStatus::Rejected;
                return Ok(order);
            }
        };

        let fill_price = match order.side {
            OrderSide::Buy => mark * (1.0 + self.config.slippage_pct),
            OrderSide::Sell => mark * (1.0 - self.config.slippage_pct),
        };
        let commission = order.quantity * self.config.commission_per_share;

        match order.side {
            OrderSide::Buy => {
                let cost = order.quantity * fill_price + commission;
                if cost > state.cash {
                    debug!(
                        symbol = %order.symbol,
                        cost,
                        cash = state.cash,
                        "insufficient cash; rejecting"
                    );
                    order.status = OrderStatus::Rejected;
                    return Ok(order);
                }
                state.cash -= cost;
                state
                    .positions
                    .entry(order.symbol.clone())
                    .and_modify(|position| {
                        let total = position.quantity + order.quantity;
                        position.avg_entry_price = (position.avg_entry_price
                            * position.quantity
                            + fill_price * order.quantity)
                            / total;
                        position.quantity = total;
                        position.mark(mark);
                    })
                    .or_insert_with(|| {
                        Position::new(&order.symbol, order.quantity, fill_price)
                    });
            }
            OrderSide::Sell => {
                let held = state
                    .positions
                    .get(&order.symbol)
                    .map(|p| p.quantity)
                    .unwrap_or(0.0);
                if order.quantity > held + 1e-9 {
                    debug!(
                        symbol = %order.symbol,
                        requested = order.quantity,
                        held,
                        "oversell; rejecting"
                    );
                    order.status = OrderStatus::Rejected;
                    return Ok(order);
                }
                state.cash += order.quantity * fill_price - commission;
                let now_empty = match state.positions.get_mut(&order.symbol) {
                    Some(position) => {
                        position.quantity -= order.quantity;
                        position.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    state.positions.remove(&order.symbol);
                }
            }
        }

        order.fill(fill_price, Utc::now());
        debug!(
            symbol = %order.symbol,
            side = %order.side,
            qty = order.quantity,
            fill_price,
            "paper fill"
        );
        Ok(order)
    }

    async fn cancel_order(&self, _id: &OrderId) -> BrokerResult<bool> {
        self.check_scripted_failure("cancel_order")?;
        // Fills are immediate; there is never a resting order to cancel.
        Ok(false)
    }

    async fn positions(&self) -> BrokerResult<HashMap<String, Position>> {
        self.check_scripted_failure("positions")?;
        Ok(self.state.lock().positions.clone())
    }

    async fn portfolio_value(&self) -> BrokerResult<f64> {
        self.check_scripted_failure("portfolio_value")?;
        let state = self.state.lock();
        let positions: f64 = state.positions.values().map(Position::market_value).sum();
        Ok(state.cash + positions)
    }

    async fn cash(&self) -> BrokerResult<f64> {
        self.check_scripted_failure("cash")?;
        Ok(self.state.lock().cash)
    }

    async fn account_base_currency(&self) -> BrokerResult<String> {
        Ok(self.config.base_currency.clone())
    }

    async fn on_market_data(&self, bar: &palisade_core::Bar) -> BrokerResult<()> {
        self.set_market_price(&bar.symbol, bar.close);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> PaperBroker {
        PaperBroker::new(PaperBrokerConfig {
            initial_balance: 10_000.0,
            slippage_pct: 0.0,
            commission_per_share: 0.0,
            base_currency: "USD".to_string(),
        })
    }

    #[tokio::test]
    async fn test_buy_then_sell_round_trip() {
        let broker = broker();
        broker.set_market_price("AAPL", 100.0);

        let buy = broker
            .submit_order(Order::new("AAPL", OrderSide::Buy, 10.0))
            .await
            .unwrap();
        assert_eq!(buy.status, OrderStatus::Filled);
        assert_eq!(buy.filled_price, Some(100.0));
        assert_eq!(broker.cash().await.unwrap(), 9_000.0);

        broker.set_market_price("AAPL", 110.0);
        let sell = broker
            .submit_order(Order::new("AAPL", OrderSide::Sell, 10.0))
            .await
            .unwrap();
        assert_eq!(sell.status, OrderStatus::Filled);
        assert_eq!(broker.cash().await.unwrap(), 10_100.0);
        assert!(broker.positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_slippage_and_commission_applied() {
        let broker = PaperBroker::new(PaperBrokerConfig {
            initial_balance: 10_000.0,
            slippage_pct: 0.01,
            commission_per_share: 0.10,
            base_currency: "USD".to_string(),
        });
        broker.set_market_price("AAPL", 100.0);

        let buy = broker
            .submit_order(Order::new("AAPL", OrderSide::Buy, 10.0))
            .await
            .unwrap();
        assert_eq!(buy.filled_price, Some(101.0));
        // 10 * 101 + 10 * 0.10 commission.
        assert!((broker.cash().await.unwrap() - (10_000.0 - 1_011.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_insufficient_cash_rejected() {
        let broker = broker();
        broker.set_market_price("AAPL", 100.0);

        let order = broker
            .submit_order(Order::new("AAPL", OrderSide::Buy, 1_000.0))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
        assert_eq!(broker.cash().await.unwrap(), 10_000.0);
    }

    #[tokio::test]
    async fn test_oversell_rejected() {
        let broker = broker();
        broker.set_market_price("AAPL", 100.0);
        broker
            .submit_order(Order::new("AAPL", OrderSide::Buy, 5.0))
            .await
            .unwrap();

        let sell = broker
            .submit_order(Order::new("AAPL", OrderSide::Sell, 6.0))
            .await
            .unwrap();
        assert_eq!(sell.status, OrderStatus::Rejected);
    }

    #[tokio::test]
    async fn test_unknown_symbol_rejected() {
        let broker = broker();
        let order = broker
            .submit_order(Order::new("ZZZZ", OrderSide::Buy, 1.0))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let broker = broker();
        broker.set_market_price("AAPL", 100.0);
        broker.fail_next(2);

        assert!(broker.positions().await.is_err());
        assert!(broker.cash().await.is_err());
        // Third call succeeds.
        assert!(broker.cash().await.is_ok());
    }

    #[tokio::test]
    async fn test_portfolio_value_marks_positions() {
        let broker = broker();
        broker.set_market_price("AAPL", 100.0);
        broker
            .submit_order(Order::new("AAPL", OrderSide::Buy, 10.0))
            .await
            .unwrap();

        broker.set_market_price("AAPL", 120.0);
        // 9000 cash + 10 * 120.
        assert!((broker.portfolio_value().await.unwrap() - 10_200.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_averaging_into_position() {
        let broker = broker();
        broker.set_market_price("AAPL", 100.0);
        broker
            .submit_order(Order::new("AAPL", OrderSide::Buy, 10.0))
            .await
            .unwrap();

        broker.set_market_price("AAPL", 120.0);
        broker
            .submit_order(Order::new("AAPL", OrderSide::Buy, 10.0))
            .await
            .unwrap();

        let positions = broker.positions().await.unwrap();
        let position = positions.get("AAPL").unwrap();
        assert!((position.quantity - 20.0).abs() < 1e-9);
        assert!((position.avg_entry_price - 110.0).abs() < 1e-9);
    }
}
