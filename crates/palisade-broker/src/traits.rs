//! The broker capability interface.

use crate::error::BrokerResult;
use async_trait::async_trait;
use palisade_core::{Bar, Order, OrderId, Position};
use std::collections::HashMap;

/// Capabilities every venue adapter provides.
///
/// Implementations live outside this workspace (concrete wire protocols
/// are not part of the core); the in-workspace [`crate::PaperBroker`]
/// exists for paper sessions and tests. All methods may fail transiently;
/// callers go through the resilience wrapper rather than calling these
/// directly from the pipelines.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Submit an order; returns the order with venue-assigned status
    /// (filled, rejected, or still pending).
    async fn submit_order(&self, order: Order) -> BrokerResult<Order>;

    /// Cancel a pending order. Returns whether a cancellation happened.
    async fn cancel_order(&self, id: &OrderId) -> BrokerResult<bool>;

    /// All currently open positions, keyed by symbol.
    async fn positions(&self) -> BrokerResult<HashMap<String, Position>>;

    /// Total account value (cash plus positions) in the base currency.
    async fn portfolio_value(&self) -> BrokerResult<f64>;

    /// Free cash in the base currency.
    async fn cash(&self) -> BrokerResult<f64>;

    /// Quote currency for a symbol, when the venue knows it.
    async fn symbol_currency(&self, _symbol: &str) -> BrokerResult<Option<String>> {
        Ok(None)
    }

    /// The account's base currency.
    async fn account_base_currency(&self) -> BrokerResult<String> {
        Ok("USD".to_string())
    }

    /// Hand the venue a market-data bar. Real venues ignore this; the
    /// paper venue uses it to mark fill prices.
    async fn on_market_data(&self, _bar: &Bar) -> BrokerResult<()> {
        Ok(())
    }
}
