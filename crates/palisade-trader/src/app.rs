//! Session wiring.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::strategy::SmaCrossStrategy;
use chrono::Duration;
use palisade_audit::AuditLogger;
use palisade_backtest::{BacktestReplayPipeline, BacktestReport, BarHistory};
use palisade_broker::PaperBroker;
use palisade_core::{Bar, RunMode, SignalGenerator};
use palisade_live::{LiveBarPipeline, LivePipelineConfig, SessionSummary};
use palisade_portfolio::{FxRates, PortfolioTracker};
use palisade_risk::RiskManager;
use palisade_safety::{KillSwitch, PaperGuardrails};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Wires configuration into runnable sessions.
///
/// Backtests run in the isolated `test` stores regardless of the
/// configured mode; paper sessions use the paper stores. Live sessions
/// need a venue adapter linked from outside this workspace, so this
/// binary refuses to start one.
pub struct Application {
    config: AppConfig,
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Deterministic replay over the configured CSV history.
    pub async fn run_backtest(&self) -> AppResult<BacktestReport> {
        std::fs::create_dir_all(&self.config.state_dir)?;

        let audit = Arc::new(AuditLogger::new(
            self.config.state_dir.join("audit_test.db"),
        ));
        audit.start()?;
        let kill_switch = Arc::new(KillSwitch::open(
            &self.config.kill_switch_paths(),
            RunMode::Test,
        )?);

        let guardrails = Arc::new(PaperGuardrails::new(self.config.guardrails.clone()));
        let risk = Arc::new(RiskManager::new(
            self.config.risk.clone(),
            RunMode::Test,
            Arc::new(self.config.build_catalog()),
            Arc::new(self.config.build_correlations()),
            guardrails,
        )?);

        let history = self.load_history()?;
        let strategies = self.build_strategies();

        let mut pipeline = BacktestReplayPipeline::new(
            self.config.backtest.clone(),
            history,
            strategies,
            risk,
            kill_switch,
            audit.clone(),
        );
        let report = pipeline.run()?;

        audit.stop().await?;

        info!(
            final_equity = report.final_equity,
            total_return = report.total_return,
            fills = report.fills,
            rejections = report.rejections,
            "backtest complete"
        );
        Ok(report)
    }

    /// Paper session: the live pipeline against the in-memory paper
    /// venue, fed by replaying the configured CSV history through the
    /// bar channel.
    ///
    /// Replayed bars carry their historical timestamps; set
    /// `quality.max_bar_age_secs = 0` in drill configs or the staleness
    /// check will skip everything.
    pub async fn run_paper(&self) -> AppResult<SessionSummary> {
        match self.config.mode {
            RunMode::Live => {
                return Err(AppError::Config(
                    "live sessions need a venue adapter; none is linked into this binary"
                        .to_string(),
                ));
            }
            RunMode::Paper | RunMode::Test => {}
        }
        std::fs::create_dir_all(&self.config.state_dir)?;

        let audit = Arc::new(AuditLogger::new(self.config.audit_db_path()));
        audit.start()?;
        let kill_switch = Arc::new(KillSwitch::open(
            &self.config.kill_switch_paths(),
            self.config.mode,
        )?);

        let guardrails = Arc::new(PaperGuardrails::new(self.config.guardrails.clone()));
        let catalog = Arc::new(self.config.build_catalog());
        let risk = Arc::new(RiskManager::new(
            self.config.risk.clone(),
            self.config.mode,
            catalog.clone(),
            Arc::new(self.config.build_correlations()),
            guardrails.clone(),
        )?);

        let broker = Arc::new(PaperBroker::new(self.config.paper.clone()));

        let mut fx = FxRates::new(
            self.config.fx.base_currency.clone(),
            Duration::seconds(self.config.fx.max_age_secs),
        );
        let now = chrono::Utc::now();
        for rate in &self.config.fx.rates {
            fx.set_rate(&rate.currency, rate.rate, now);
        }
        let tracker = PortfolioTracker::new(fx);

        let pipeline_config = LivePipelineConfig {
            mode: self.config.mode,
            quality: self.config.quality.clone(),
            market_hours: self.config.market_hours.clone(),
            retry: self.config.resilience.clone(),
            session_duration_secs: self.config.session_duration_secs,
            commission_per_share: self.config.backtest.commission_per_share,
        };
        let mut pipeline = LiveBarPipeline::new(
            pipeline_config,
            self.build_strategies(),
            broker,
            risk,
            kill_switch,
            audit.clone(),
            guardrails,
            catalog,
            tracker,
        );

        let (tx, rx) = mpsc::channel(256);
        let bars = self.collect_bars()?;
        let feeder = tokio::spawn(async move {
            for bar in bars {
                if tx.send(bar).await.is_err() {
                    break;
                }
            }
        });

        let summary = pipeline.run(rx).await;
        if let Err(e) = feeder.await {
            warn!(?e, "bar feeder join failed");
        }
        audit.stop().await?;

        info!(
            bars = summary.bars_processed,
            fills = summary.fills,
            halted = ?summary.halted,
            "paper session complete"
        );
        Ok(summary)
    }

    fn build_strategies(&self) -> BTreeMap<String, Box<dyn SignalGenerator>> {
        self.config
            .symbols
            .iter()
            .map(|symbol| {
                let strategy: Box<dyn SignalGenerator> = Box::new(SmaCrossStrategy::new(
                    "sma_cross",
                    self.config.strategy.fast_period,
                    self.config.strategy.slow_period,
                ));
                (symbol.symbol.clone(), strategy)
            })
            .collect()
    }

    fn load_history(&self) -> AppResult<BarHistory> {
        let mut history = BarHistory::new();
        for symbol in &self.config.symbols {
            let path = self.config.data_file(symbol);
            if !path.exists() {
                warn!(symbol = %symbol.symbol, path = %path.display(), "no data file; skipping");
                continue;
            }
            history.load_csv(&symbol.symbol, &path)?;
        }
        Ok(history)
    }

    /// All bars across symbols in global timestamp order, for feeding the
    /// paper pipeline.
    fn collect_bars(&self) -> AppResult<Vec<Bar>> {
        let history = self.load_history()?;
        let mut bars: Vec<Bar> = Vec::new();
        for date in history.all_dates() {
            for symbol in self.config.symbols.iter().map(|s| s.symbol.as_str()) {
                if let Some(bar) = history.bar(symbol, date) {
                    bars.push(bar.clone());
                }
            }
        }
        bars.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SymbolConfig;
    use chrono::{TimeZone, Utc};
    use std::io::Write;
    use tempfile::TempDir;

    fn write_csv(dir: &TempDir, symbol: &str, days: u32) -> std::path::PathBuf {
        let path = dir.path().join(format!("{symbol}.csv"));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "timestamp,open,high,low,close,volume").unwrap();
        for d in 1..=days {
            // Decline then rally, so the fast average crosses the slow one.
            let price = if d <= days / 2 {
                110.0 - d as f64 * 0.8
            } else {
                100.0 + (d - days / 2) as f64 * 2.0
            };
            let ts = Utc.with_ymd_and_hms(2024, 3, d, 21, 0, 0).unwrap();
            writeln!(
                file,
                "{},{:.2},{:.2},{:.2},{:.2},10000",
                ts.to_rfc3339(),
                price,
                price * 1.01,
                price * 0.99,
                price
            )
            .unwrap();
        }
        path
    }

    fn test_config(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.mode = RunMode::Test;
        config.state_dir = dir.path().join("state");
        config.data_dir = dir.path().to_path_buf();
        config.strategy.fast_period = 2;
        config.strategy.slow_period = 5;
        config.risk.use_atr_stops = false;
        config.guardrails.session_enabled = false;
        config.market_hours.enabled = false;
        config.quality.max_bar_age_secs = 0;
        config.symbols.push(SymbolConfig {
            symbol: "AAPL".to_string(),
            class: Default::default(),
            sector: None,
            currency: None,
            data_file: None,
        });
        config
    }

    #[tokio::test]
    async fn test_backtest_end_to_end() {
        let dir = TempDir::new().unwrap();
        write_csv(&dir, "AAPL", 25);

        let app = Application::new(test_config(&dir)).unwrap();
        let report = app.run_backtest().await.unwrap();

        assert_eq!(report.equity_curve.len(), 25);
        assert!(report.halted.is_none());
        // The rally triggers at least one buy.
        assert!(report.fills >= 1);
    }

    #[tokio::test]
    async fn test_paper_session_end_to_end() {
        let dir = TempDir::new().unwrap();
        write_csv(&dir, "AAPL", 25);

        let app = Application::new(test_config(&dir)).unwrap();
        let summary = app.run_paper().await.unwrap();

        assert_eq!(summary.bars_processed, 25);
        assert!(summary.halted.is_none());
    }

    #[tokio::test]
    async fn test_live_mode_refused() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.mode = RunMode::Live;

        let app = Application::new(config).unwrap();
        assert!(matches!(
            app.run_paper().await,
            Err(AppError::Config(_))
        ));
    }
}
