//! Strategy signals and the strategy seam.

use crate::bar::Bar;
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// What a strategy recommends for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    /// Enter (or add to) a long position.
    Long,
    /// Close the open position, if any.
    Close,
    /// Do nothing this bar.
    Hold,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Close => write!(f, "close"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

/// A strategy's recommendation with a confidence strength.
///
/// `strength` scales position sizing and must lie in `[0, 1]`; values
/// outside that range are a construction error, not a clamped warning.
/// `metadata` carries strategy-specific extras (e.g. an `"atr"` value used
/// for ATR-derived stops).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub kind: SignalKind,
    pub strength: f64,
    pub timestamp: DateTime<Utc>,
    pub strategy: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Signal {
    pub fn new(
        symbol: impl Into<String>,
        kind: SignalKind,
        strength: f64,
        timestamp: DateTime<Utc>,
        strategy: impl Into<String>,
    ) -> CoreResult<Self> {
        if !strength.is_finite() || !(0.0..=1.0).contains(&strength) {
            return Err(CoreError::InvalidStrength { strength });
        }
        Ok(Self {
            symbol: symbol.into(),
            kind,
            strength,
            timestamp,
            strategy: strategy.into(),
            metadata: HashMap::new(),
        })
    }

    /// Attach a metadata entry, builder-style.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Fetch a numeric metadata value, if present and finite.
    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata
            .get(key)
            .and_then(serde_json::Value::as_f64)
            .filter(|v| v.is_finite())
    }
}

/// The strategy seam: anything that turns bar history into signals.
///
/// Concrete strategies are interchangeable adapters injected at pipeline
/// construction. Implementations keep their own bar history; the pipeline
/// only ever hands them the current bar.
pub trait SignalGenerator: Send {
    /// Process one bar and optionally emit a signal.
    fn on_bar(&mut self, bar: &Bar) -> Option<Signal>;

    /// Identifier recorded on emitted signals and audit rows.
    fn name(&self) -> &str;
}
