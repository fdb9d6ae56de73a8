//! Demo moving-average-cross strategy.
//!
//! Ships as wiring glue so the binary has something to inject; real
//! strategies implement [`SignalGenerator`] outside this workspace.

use palisade_core::{Bar, Signal, SignalGenerator, SignalKind};
use serde_json::json;
use std::collections::VecDeque;
use tracing::trace;

/// Long on a fast-over-slow SMA cross, close on the reverse cross.
///
/// Signal strength scales with the separation of the averages; an
/// N-period average true range rides along in metadata for ATR stops.
pub struct SmaCrossStrategy {
    name: String,
    fast_period: usize,
    slow_period: usize,
    closes: VecDeque<f64>,
    true_ranges: VecDeque<f64>,
    prev_close: Option<f64>,
    /// Fast was above slow on the previous bar.
    was_above: Option<bool>,
}

impl SmaCrossStrategy {
    const ATR_PERIOD: usize = 14;

    pub fn new(name: impl Into<String>, fast_period: usize, slow_period: usize) -> Self {
        Self {
            name: name.into(),
            fast_period: fast_period.max(1),
            slow_period: slow_period.max(2),
            closes: VecDeque::new(),
            true_ranges: VecDeque::new(),
            prev_close: None,
            was_above: None,
        }
    }

    fn sma(&self, period: usize) -> Option<f64> {
        if self.closes.len() < period {
            return None;
        }
        let sum: f64 = self.closes.iter().rev().take(period).sum();
        Some(sum / period as f64)
    }

    fn atr(&self) -> Option<f64> {
        if self.true_ranges.len() < Self::ATR_PERIOD {
            return None;
        }
        let sum: f64 = self.true_ranges.iter().sum();
        Some(sum / self.true_ranges.len() as f64)
    }
}

impl SignalGenerator for SmaCrossStrategy {
    fn on_bar(&mut self, bar: &Bar) -> Option<Signal> {
        let true_range = match self.prev_close {
            Some(prev) => (bar.high - bar.low)
                .max((bar.high - prev).abs())
                .max((bar.low - prev).abs()),
            None => bar.high - bar.low,
        };
        self.true_ranges.push_back(true_range);
        while self.true_ranges.len() > Self::ATR_PERIOD {
            self.true_ranges.pop_front();
        }
        self.prev_close = Some(bar.close);

        self.closes.push_back(bar.close);
        while self.closes.len() > self.slow_period {
            self.closes.pop_front();
        }

        let fast = self.sma(self.fast_period)?;
        let slow = self.sma(self.slow_period)?;
        let above = fast > slow;
        let crossed = match self.was_above.replace(above) {
            Some(was_above) => was_above != above,
            // First comparable bar establishes the state; no signal.
            None => return None,
        };
        if !crossed {
            return None;
        }

        let kind = if above { SignalKind::Long } else { SignalKind::Close };
        // Separation of the averages, capped at 5%, mapped onto [0, 1].
        let separation = ((fast - slow).abs() / slow).min(0.05);
        let strength = (separation / 0.05).clamp(0.0, 1.0);

        trace!(
            symbol = %bar.symbol,
            fast,
            slow,
            ?kind,
            strength,
            "SMA cross"
        );

        let mut signal =
            Signal::new(&bar.symbol, kind, strength, bar.timestamp, &self.name).ok()?;
        if let Some(atr) = self.atr() {
            signal = signal.with_metadata("atr", json!(atr));
        }
        Some(signal)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
