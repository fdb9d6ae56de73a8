//! Data-quality gating for incoming bars.

use chrono::{DateTime, Duration, Utc};
use palisade_core::Bar;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Quality gate configuration. Zero thresholds disable the check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// A bar older than this (vs wall clock) is stale. 0 disables.
    #[serde(default = "default_max_bar_age_secs")]
    pub max_bar_age_secs: i64,
    /// Inter-bar gap above this is reported (not skipped). 0 disables.
    #[serde(default = "default_max_gap_secs")]
    pub max_gap_secs: i64,
    /// Consecutive skipped bars per symbol before escalating to the kill
    /// switch.
    #[serde(default = "default_stale_escalation_limit")]
    pub stale_escalation_limit: u32,
}

fn default_max_bar_age_secs() -> i64 {
    300
}

fn default_max_gap_secs() -> i64 {
    0
}

fn default_stale_escalation_limit() -> u32 {
    3
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            max_bar_age_secs: default_max_bar_age_secs(),
            max_gap_secs: default_max_gap_secs(),
            stale_escalation_limit: default_stale_escalation_limit(),
        }
    }
}

/// Gate verdict for one bar.
#[derive(Debug, Clone, PartialEq)]
pub enum QualityVerdict {
    /// Process the bar. `gap_secs` reports an unusually large inter-bar
    /// gap for auditing; the bar itself is fine.
    Accept { gap_secs: Option<i64> },
    /// Skip the bar.
    Skip {
        reason: String,
        /// Set when this symbol's consecutive-skip count reached the
        /// escalation limit; the caller triggers the kill switch.
        escalate: bool,
    },
}

#[derive(Debug, Default)]
struct SymbolQuality {
    last_timestamp: Option<DateTime<Utc>>,
    consecutive_skips: u32,
}

/// Stale/gap/regression detection, tracked per symbol.
///
/// A skipped bar increments the symbol's consecutive-skip counter; a good
/// bar resets it. Three consecutive skips (configurable) escalate.
#[derive(Debug)]
pub struct DataQualityGate {
    config: QualityConfig,
    symbols: HashMap<String, SymbolQuality>,
}

impl DataQualityGate {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            symbols: HashMap::new(),
        }
    }

    pub fn check(&mut self, bar: &Bar, now: DateTime<Utc>) -> QualityVerdict {
        let state = self.symbols.entry(bar.symbol.clone()).or_default();

        if let Err(e) = bar.validate() {
            return Self::skip(state, &self.config, format!("invalid bar: {e}"));
        }

        if let Some(last) = state.last_timestamp {
            if bar.timestamp <= last {
                return Self::skip(
                    state,
                    &self.config,
                    format!(
                        "timestamp regression: {} <= last {}",
                        bar.timestamp, last
                    ),
                );
            }
        }

        if self.config.max_bar_age_secs > 0 {
            let age = now - bar.timestamp;
            if age > Duration::seconds(self.config.max_bar_age_secs) {
                return Self::skip(
                    state,
                    &self.config,
                    format!(
                        "stale bar: {}s old > {}s max",
                        age.num_seconds(),
                        self.config.max_bar_age_secs
                    ),
                );
            }
        }

        let gap_secs = match (state.last_timestamp, self.config.max_gap_secs) {
            (Some(last), max) if max > 0 => {
                let gap = (bar.timestamp - last).num_seconds();
                (gap > max).then_some(gap)
            }
            _ => None,
        };
        if let Some(gap) = gap_secs {
            warn!(symbol = %bar.symbol, gap_secs = gap, "inter-bar gap detected");
        }

        state.last_timestamp = Some(bar.timestamp);
        state.consecutive_skips = 0;
        QualityVerdict::Accept { gap_secs }
    }

    fn skip(state: &mut SymbolQuality, config: &QualityConfig, reason: String) -> QualityVerdict {
        state.consecutive_skips += 1;
        let escalate = state.consecutive_skips >= config.stale_escalation_limit;
        debug!(
            %reason,
            consecutive = state.consecutive_skips,
            escalate,
            "bar skipped"
        );
        QualityVerdict::Skip { reason, escalate }
    }
}
