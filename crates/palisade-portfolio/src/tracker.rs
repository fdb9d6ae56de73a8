//! Currency-normalized portfolio valuation.

use chrono::{DateTime, Duration, Utc};
use palisade_core::Position;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// One FX rate into the account base currency, with its observation time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FxRate {
    /// Units of base currency per unit of the quoted currency.
    pub rate: f64,
    pub as_of: DateTime<Utc>,
}

/// FX table for converting symbol currencies into the account base.
///
/// Rates come either from the broker (live) or from configuration; each
/// conversion reports whether the rate used was older than the staleness
/// threshold so snapshots can flag suspect valuations instead of hiding
/// them.
#[derive(Debug, Clone)]
pub struct FxRates {
    base_currency: String,
    rates: HashMap<String, FxRate>,
    max_age: Duration,
}

impl FxRates {
    pub fn new(base_currency: impl Into<String>, max_age: Duration) -> Self {
        Self {
            base_currency: base_currency.into(),
            rates: HashMap::new(),
            max_age,
        }
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    pub fn set_rate(&mut self, currency: impl Into<String>, rate: f64, as_of: DateTime<Utc>) {
        self.rates.insert(currency.into(), FxRate { rate, as_of });
    }

    /// Convert `amount` of `currency` into the base currency.
    ///
    /// Returns the converted amount and a staleness flag. The base currency
    /// converts 1:1 and is never stale; a missing rate passes the amount
    /// through unconverted and is flagged stale so the snapshot shows the
    /// gap rather than silently dropping value.
    pub fn convert(&self, amount: f64, currency: &str, now: DateTime<Utc>) -> (f64, bool) {
        if currency == self.base_currency {
            return (amount, false);
        }
        match self.rates.get(currency) {
            Some(fx) => {
                let stale = now - fx.as_of > self.max_age;
                (amount * fx.rate, stale)
            }
            None => {
                warn!(currency, "no FX rate; passing amount through unconverted");
                (amount, true)
            }
        }
    }
}

/// Valuation of one holding, in base currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingValue {
    pub symbol: String,
    pub quantity: f64,
    pub currency: String,
    pub value_base: f64,
    pub fx_stale: bool,
}

/// Point-in-time, currency-normalized portfolio valuation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp: DateTime<Utc>,
    pub base_currency: String,
    pub cash: f64,
    pub positions_value: f64,
    pub total_value: f64,
    pub holdings: Vec<HoldingValue>,
    /// True if any holding was valued with a stale or missing FX rate.
    pub any_fx_stale: bool,
}

/// Builds currency-normalized snapshots from positions and cash.
pub struct PortfolioTracker {
    fx: FxRates,
}

impl PortfolioTracker {
    pub fn new(fx: FxRates) -> Self {
        Self { fx }
    }

    pub fn fx_mut(&mut self) -> &mut FxRates {
        &mut self.fx
    }

    /// Value every position in base currency and total with cash.
    ///
    /// `symbol_currencies` maps symbols quoted in a non-base currency;
    /// absent symbols are assumed base-quoted. Cash is always base.
    pub fn snapshot(
        &self,
        positions: &HashMap<String, Position>,
        cash: f64,
        symbol_currencies: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> PortfolioSnapshot {
        let mut holdings = Vec::with_capacity(positions.len());
        let mut positions_value = 0.0;
        let mut any_fx_stale = false;

        for position in positions.values() {
            let currency = symbol_currencies
                .get(&position.symbol)
                .cloned()
                .unwrap_or_else(|| self.fx.base_currency().to_string());
            let (value_base, fx_stale) =
                self.fx.convert(position.market_value(), &currency, now);

            positions_value += value_base;
            any_fx_stale |= fx_stale;
            holdings.push(HoldingValue {
                symbol: position.symbol.clone(),
                quantity: position.quantity,
                currency,
                value_base,
                fx_stale,
            });
        }

        holdings.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        PortfolioSnapshot {
            timestamp: now,
            base_currency: self.fx.base_currency().to_string(),
            cash,
            positions_value,
            total_value: cash + positions_value,
            holdings,
            any_fx_stale,
        }
    }
}
