//! Market-hours filtering for the live pipeline.

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Exchange session window. Crypto trades around the clock and bypasses
/// the filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketHoursConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Start hour, inclusive, in `timezone`.
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    /// End hour, exclusive.
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    /// IANA timezone name; unresolvable names fall back to UTC.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_enabled() -> bool {
    true
}

fn default_start_hour() -> u32 {
    9
}

fn default_end_hour() -> u32 {
    16
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

impl Default for MarketHoursConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
            timezone: default_timezone(),
        }
    }
}

/// Resolved market-hours filter.
pub struct MarketHoursFilter {
    config: MarketHoursConfig,
    tz: Tz,
}

impl MarketHoursFilter {
    pub fn new(config: MarketHoursConfig) -> Self {
        let tz = match config.timezone.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                warn!(
                    timezone = %config.timezone,
                    "unresolvable market-hours timezone; falling back to UTC"
                );
                Tz::UTC
            }
        };
        Self { config, tz }
    }

    /// Whether a bar stamped `at` should be processed. Crypto always
    /// passes.
    pub fn in_session(&self, is_crypto: bool, at: DateTime<Utc>) -> bool {
        if !self.config.enabled || is_crypto {
            return true;
        }
        let hour = at.with_timezone(&self.tz).hour();
        hour >= self.config.start_hour && hour < self.config.end_hour
    }
}
