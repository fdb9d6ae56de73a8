//! OHLCV bar type.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV sample for a symbol over an interval.
///
/// Timestamps are `DateTime<Utc>` so the explicit-UTC invariant is carried
/// by the type. Bars are immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Build a validated bar.
    ///
    /// Rejects non-finite fields, non-positive prices, negative volume,
    /// and OHLC values that do not satisfy `low <= open, close <= high`.
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> CoreResult<Self> {
        let symbol = symbol.into();
        let bar = Self {
            symbol,
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        };
        bar.validate()?;
        Ok(bar)
    }

    /// Re-check the bar invariants.
    ///
    /// Used by the data-quality gate on bars that arrive from outside
    /// (deserialized feeds, CSV rows) and therefore bypassed `new`.
    pub fn validate(&self) -> CoreResult<()> {
        let fields = [self.open, self.high, self.low, self.close, self.volume];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(self.invalid("non-finite field"));
        }
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(self.invalid("non-positive price"));
        }
        if self.volume < 0.0 {
            return Err(self.invalid("negative volume"));
        }
        if self.low > self.high {
            return Err(self.invalid("low above high"));
        }
        if self.open < self.low || self.open > self.high {
            return Err(self.invalid("open outside [low, high]"));
        }
        if self.close < self.low || self.close > self.high {
            return Err(self.invalid("close outside [low, high]"));
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> CoreError {
        CoreError::InvalidBar {
            symbol: self.symbol.clone(),
            reason: reason.to_string(),
        }
    }
}
