//! Application configuration.

use crate::error::{AppError, AppResult};
use palisade_backtest::BacktestConfig;
use palisade_broker::{PaperBrokerConfig, RetryPolicy};
use palisade_core::{AssetClass, RunMode, StaticAssetCatalog};
use palisade_live::{MarketHoursConfig, QualityConfig};
use palisade_risk::{RiskConfig, StaticCorrelationMatrix};
use palisade_safety::{GuardrailConfig, KillSwitchPaths};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One traded symbol with its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,
    #[serde(default)]
    pub class: AssetClass,
    #[serde(default)]
    pub sector: Option<String>,
    /// Quote currency when not the account base.
    #[serde(default)]
    pub currency: Option<String>,
    /// CSV bar file for backtests; defaults to `<data_dir>/<symbol>.csv`.
    #[serde(default)]
    pub data_file: Option<PathBuf>,
}

/// One externally estimated correlation pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationPair {
    pub a: String,
    pub b: String,
    pub correlation: f64,
}

/// Configured FX rate into the base currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FxRateConfig {
    pub currency: String,
    pub rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FxConfig {
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
    #[serde(default)]
    pub rates: Vec<FxRateConfig>,
    /// Rates older than this are flagged stale in snapshots.
    #[serde(default = "default_fx_max_age_secs")]
    pub max_age_secs: i64,
}

fn default_base_currency() -> String {
    "USD".to_string()
}

fn default_fx_max_age_secs() -> i64 {
    3_600
}

impl Default for FxConfig {
    fn default() -> Self {
        Self {
            base_currency: default_base_currency(),
            rates: Vec::new(),
            max_age_secs: default_fx_max_age_secs(),
        }
    }
}

/// Demo SMA-cross strategy parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_fast_period")]
    pub fast_period: usize,
    #[serde(default = "default_slow_period")]
    pub slow_period: usize,
}

fn default_fast_period() -> usize {
    10
}

fn default_slow_period() -> usize {
    30
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            fast_period: default_fast_period(),
            slow_period: default_slow_period(),
        }
    }
}

/// Full application configuration, loaded from TOML with `PALISADE_`
/// environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mode: RunMode,
    /// Durable state (kill-switch flags, audit tables) lives here, one
    /// file per runtime mode.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub symbols: Vec<SymbolConfig>,
    #[serde(default)]
    pub correlations: Vec<CorrelationPair>,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub guardrails: GuardrailConfig,
    #[serde(default)]
    pub resilience: RetryPolicy,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub market_hours: MarketHoursConfig,
    /// Bounded paper/live session length, if any.
    #[serde(default)]
    pub session_duration_secs: Option<u64>,
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub paper: PaperBrokerConfig,
    #[serde(default)]
    pub fx: FxConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Explicit kill-switch store paths; defaults derive from `state_dir`.
    #[serde(default)]
    pub kill_switch: Option<KillSwitchPaths>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            state_dir: default_state_dir(),
            data_dir: default_data_dir(),
            symbols: Vec::new(),
            correlations: Vec::new(),
            risk: RiskConfig::default(),
            guardrails: GuardrailConfig::default(),
            resilience: RetryPolicy::default(),
            quality: QualityConfig::default(),
            market_hours: MarketHoursConfig::default(),
            session_duration_secs: None,
            backtest: BacktestConfig::default(),
            paper: PaperBrokerConfig::default(),
            fx: FxConfig::default(),
            strategy: StrategyConfig::default(),
            kill_switch: None,
        }
    }
}

impl AppConfig {
    /// Load from a TOML file layered with `PALISADE_`-prefixed environment
    /// overrides. A missing file is not fatal: defaults apply, overrides
    /// still layer on top.
    pub fn load(path: &str) -> AppResult<Self> {
        let mut builder = config::Config::builder();
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            warn!(path, "config file not found; using defaults");
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("PALISADE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::Config(format!("failed to load config: {e}")))?;

        let app_config: Self = settings
            .try_deserialize()
            .map_err(|e| AppError::Config(format!("failed to parse config: {e}")))?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Validate cross-field invariants before any store is opened.
    pub fn validate(&self) -> AppResult<()> {
        self.risk
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;
        self.kill_switch_paths()
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;
        for pair in &self.correlations {
            if !pair.correlation.is_finite() || pair.correlation.abs() > 1.0 {
                return Err(AppError::Config(format!(
                    "correlation {} for {}/{} outside [-1, 1]",
                    pair.correlation, pair.a, pair.b
                )));
            }
        }
        if self.strategy.fast_period >= self.strategy.slow_period {
            return Err(AppError::Config(format!(
                "fast period {} must be shorter than slow period {}",
                self.strategy.fast_period, self.strategy.slow_period
            )));
        }
        Ok(())
    }

    /// Kill-switch stores, one per mode, defaulting under `state_dir`.
    pub fn kill_switch_paths(&self) -> KillSwitchPaths {
        self.kill_switch
            .clone()
            .unwrap_or_else(|| KillSwitchPaths::under(&self.state_dir))
    }

    /// Audit table path for the active mode; never shared across modes.
    pub fn audit_db_path(&self) -> PathBuf {
        self.state_dir.join(format!("audit_{}.db", self.mode))
    }

    /// CSV file for a symbol's bar history.
    pub fn data_file(&self, symbol: &SymbolConfig) -> PathBuf {
        symbol
            .data_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(format!("{}.csv", symbol.symbol)))
    }

    /// Build the read-only asset catalog from the symbol universe.
    pub fn build_catalog(&self) -> StaticAssetCatalog {
        let crypto = self
            .symbols
            .iter()
            .filter(|s| s.class.is_crypto())
            .map(|s| s.symbol.clone());
        let sectors: HashMap<String, String> = self
            .symbols
            .iter()
            .filter_map(|s| s.sector.clone().map(|sector| (s.symbol.clone(), sector)))
            .collect();
        StaticAssetCatalog::new(crypto, sectors)
    }

    /// Build the read-only correlation matrix.
    pub fn build_correlations(&self) -> StaticCorrelationMatrix {
        let mut matrix = StaticCorrelationMatrix::new();
        for pair in &self.correlations {
            matrix.insert(&pair.a, &pair.b, pair.correlation);
        }
        matrix
    }

    /// Symbol → quote currency map for non-base-quoted symbols.
    pub fn symbol_currencies(&self) -> HashMap<String, String> {
        self.symbols
            .iter()
            .filter_map(|s| s.currency.clone().map(|c| (s.symbol.clone(), c)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_validate() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("palisade.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
mode = "paper"

[[symbols]]
symbol = "AAPL"
sector = "tech"

[[symbols]]
symbol = "BTC-USD"
class = "crypto"

[risk]
max_drawdown_pct = 0.15

[guardrails]
max_orders_per_day = 20
"#
        )
        .unwrap();

        let config = AppConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.mode, RunMode::Paper);
        assert_eq!(config.symbols.len(), 2);
        assert!((config.risk.max_drawdown_pct - 0.15).abs() < 1e-9);
        assert_eq!(config.guardrails.max_orders_per_day, 20);

        let catalog = config.build_catalog();
        use palisade_core::AssetCatalog;
        assert!(catalog.asset_class("BTC-USD").is_crypto());
        assert_eq!(catalog.sector("AAPL"), Some("tech"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AppConfig::load("/nonexistent/palisade.toml").unwrap();
        assert_eq!(config.mode, RunMode::Paper);
    }

    #[test]
    fn test_invalid_correlation_rejected() {
        let mut config = AppConfig::default();
        config.correlations.push(CorrelationPair {
            a: "AAPL".to_string(),
            b: "MSFT".to_string(),
            correlation: 1.5,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_conflicting_kill_switch_paths_rejected() {
        let mut config = AppConfig::default();
        config.kill_switch = Some(KillSwitchPaths {
            paper: PathBuf::from("state/ks.json"),
            live: PathBuf::from("state/ks.json"),
            test: PathBuf::from("state/ks_test.json"),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_scoped_audit_paths_distinct() {
        let mut config = AppConfig::default();
        config.mode = RunMode::Paper;
        let paper = config.audit_db_path();
        config.mode = RunMode::Live;
        let live = config.audit_db_path();
        assert_ne!(paper, live);
    }
}
