//! Risk configuration.

use crate::error::{RiskError, RiskResult};
use serde::{Deserialize, Serialize};

/// Stop/size parameters that differ by asset class.
///
/// Crypto gets wider stops and a smaller per-position cap by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRiskParams {
    /// Fixed stop-loss distance as a fraction of entry price, used when ATR
    /// stops are disabled or the signal carries no ATR.
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    /// Fixed take-profit distance as a fraction of entry price.
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
    /// ATR multiple for the stop-loss distance.
    #[serde(default = "default_atr_multiplier")]
    pub atr_multiplier: f64,
    /// ATR multiple for the take-profit distance.
    #[serde(default = "default_atr_tp_multiplier")]
    pub atr_tp_multiplier: f64,
    /// Cap on one position's value as a fraction of portfolio value.
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,
}

fn default_stop_loss_pct() -> f64 {
    0.05
}

fn default_take_profit_pct() -> f64 {
    0.10
}

fn default_atr_multiplier() -> f64 {
    2.0
}

fn default_atr_tp_multiplier() -> f64 {
    4.0
}

fn default_max_position_pct() -> f64 {
    0.10
}

impl Default for AssetRiskParams {
    fn default() -> Self {
        Self {
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            atr_multiplier: default_atr_multiplier(),
            atr_tp_multiplier: default_atr_tp_multiplier(),
            max_position_pct: default_max_position_pct(),
        }
    }
}

impl AssetRiskParams {
    /// Wider crypto defaults.
    pub fn crypto_defaults() -> Self {
        Self {
            stop_loss_pct: 0.08,
            take_profit_pct: 0.15,
            atr_multiplier: 2.5,
            atr_tp_multiplier: 5.0,
            max_position_pct: 0.05,
        }
    }
}

/// What to do when a candidate entry is too correlated with an open
/// position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMode {
    /// Reject the signal outright.
    #[default]
    Reject,
    /// Degrade signal strength linearly with the excess correlation.
    Scale,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Maximum tolerated absolute correlation against any open symbol.
    #[serde(default = "default_correlation_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub mode: CorrelationMode,
}

fn default_correlation_threshold() -> f64 {
    0.7
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            threshold: default_correlation_threshold(),
            mode: CorrelationMode::default(),
        }
    }
}

/// Full risk-manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction of portfolio value risked per trade at full strength.
    #[serde(default = "default_max_portfolio_risk_pct")]
    pub max_portfolio_risk_pct: f64,
    /// Maximum simultaneously open positions.
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    /// Drawdown-from-peak fraction that halts new entries (strict `>`).
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,
    /// Intraday loss fraction that halts new entries (strict `>`).
    #[serde(default = "default_max_intraday_loss_pct")]
    pub max_intraday_loss_pct: f64,
    /// Consecutive losing closes that halt new entries (`>=`). 0 disables.
    #[serde(default = "default_consecutive_loss_limit")]
    pub consecutive_loss_limit: u32,
    /// Rolling 95% VaR fraction that halts new entries (fails at equality).
    #[serde(default = "default_max_var_pct")]
    pub max_var_pct: f64,
    /// Number of portfolio returns in the VaR window.
    #[serde(default = "default_var_window")]
    pub var_window: usize,
    /// Prefer ATR-derived stops when the signal carries an ATR value.
    #[serde(default = "default_use_atr_stops")]
    pub use_atr_stops: bool,
    /// Cap on projected crypto exposure as a fraction of portfolio value.
    #[serde(default = "default_max_crypto_exposure_pct")]
    pub max_crypto_exposure_pct: f64,
    /// Whether the sector concentration gate runs at all.
    #[serde(default = "default_sector_gate_enabled")]
    pub sector_gate_enabled: bool,
    /// Cap on projected single-sector exposure as a fraction of portfolio
    /// value.
    #[serde(default = "default_max_sector_concentration_pct")]
    pub max_sector_concentration_pct: f64,
    /// Equity stop/size parameters.
    #[serde(default)]
    pub equity: AssetRiskParams,
    /// Crypto overrides.
    #[serde(default = "AssetRiskParams::crypto_defaults")]
    pub crypto: AssetRiskParams,
    #[serde(default)]
    pub correlation: CorrelationConfig,
}

fn default_max_portfolio_risk_pct() -> f64 {
    0.02
}

fn default_max_open_positions() -> usize {
    5
}

fn default_max_drawdown_pct() -> f64 {
    0.20
}

fn default_max_intraday_loss_pct() -> f64 {
    0.05
}

fn default_consecutive_loss_limit() -> u32 {
    3
}

fn default_max_var_pct() -> f64 {
    0.05
}

fn default_var_window() -> usize {
    20
}

fn default_use_atr_stops() -> bool {
    true
}

fn default_max_crypto_exposure_pct() -> f64 {
    0.25
}

fn default_sector_gate_enabled() -> bool {
    true
}

fn default_max_sector_concentration_pct() -> f64 {
    0.30
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_portfolio_risk_pct: default_max_portfolio_risk_pct(),
            max_open_positions: default_max_open_positions(),
            max_drawdown_pct: default_max_drawdown_pct(),
            max_intraday_loss_pct: default_max_intraday_loss_pct(),
            consecutive_loss_limit: default_consecutive_loss_limit(),
            max_var_pct: default_max_var_pct(),
            var_window: default_var_window(),
            use_atr_stops: default_use_atr_stops(),
            max_crypto_exposure_pct: default_max_crypto_exposure_pct(),
            sector_gate_enabled: default_sector_gate_enabled(),
            max_sector_concentration_pct: default_max_sector_concentration_pct(),
            equity: AssetRiskParams::default(),
            crypto: AssetRiskParams::crypto_defaults(),
            correlation: CorrelationConfig::default(),
        }
    }
}

impl RiskConfig {
    /// Reject configurations that would make gates meaningless.
    pub fn validate(&self) -> RiskResult<()> {
        let fractions = [
            ("max_portfolio_risk_pct", self.max_portfolio_risk_pct),
            ("max_drawdown_pct", self.max_drawdown_pct),
            ("max_intraday_loss_pct", self.max_intraday_loss_pct),
            ("max_var_pct", self.max_var_pct),
            ("max_crypto_exposure_pct", self.max_crypto_exposure_pct),
            (
                "max_sector_concentration_pct",
                self.max_sector_concentration_pct,
            ),
        ];
        for (name, value) in fractions {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(RiskError::InvalidConfig(format!(
                    "{name} must be a fraction in [0, 1], got {value}"
                )));
            }
        }
        if self.var_window == 0 {
            return Err(RiskError::InvalidConfig(
                "var_window must be at least 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.correlation.threshold) {
            return Err(RiskError::InvalidConfig(format!(
                "correlation threshold must lie in [0, 1), got {}",
                self.correlation.threshold
            )));
        }
        Ok(())
    }

    /// Parameters for the given asset class.
    pub fn params_for(&self, crypto: bool) -> &AssetRiskParams {
        if crypto {
            &self.crypto
        } else {
            &self.equity
        }
    }
}
