//! The live bar-processing loop.

use crate::error::{LiveError, LiveResult};
use crate::quality::{DataQualityGate, QualityConfig, QualityVerdict};
use crate::session::{MarketHoursConfig, MarketHoursFilter};
use chrono::Utc;
use palisade_audit::{events, AuditEvent, AuditLogger, Severity};
use palisade_broker::{call_with_retry, Broker, RetryPolicy, RetryState};
use palisade_core::{AssetCatalog, Bar, OrderSide, OrderStatus, SignalGenerator};
use palisade_portfolio::PortfolioTracker;
use palisade_risk::{Approval, RiskManager};
use palisade_safety::{KillSwitch, PaperGuardrails};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Live pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivePipelineConfig {
    pub mode: palisade_core::RunMode,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub market_hours: MarketHoursConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Bounded session length; the bar subscription is cancelled when it
    /// elapses but an in-flight bar finishes processing.
    #[serde(default)]
    pub session_duration_secs: Option<u64>,
    /// Per-share fee estimate recorded on fill audit rows.
    #[serde(default = "default_commission_per_share")]
    pub commission_per_share: f64,
}

fn default_commission_per_share() -> f64 {
    0.005
}

/// What the session did, reported at the end of `run`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSummary {
    pub bars_processed: u64,
    pub bars_skipped: u64,
    pub signals: u64,
    pub orders_submitted: u64,
    pub fills: u64,
    pub rejections: u64,
    /// Why the session unwound early, if it did.
    pub halted: Option<String>,
}

/// Real-time bar pipeline.
///
/// Per bar: quality gate, market-hours filter, kill-switch check,
/// strategy, risk approval against broker-reported positions/value
/// (fetched through the resilience wrapper), resilient submission, VaR
/// feed from consecutive portfolio values, and an unconditional
/// end-of-bar currency-normalized snapshot.
pub struct LiveBarPipeline {
    config: LivePipelineConfig,
    strategies: BTreeMap<String, Box<dyn SignalGenerator>>,
    broker: Arc<dyn Broker>,
    risk: Arc<RiskManager>,
    kill_switch: Arc<KillSwitch>,
    audit: Arc<AuditLogger>,
    guardrails: Arc<PaperGuardrails>,
    catalog: Arc<dyn AssetCatalog>,
    tracker: PortfolioTracker,
    quality: DataQualityGate,
    market_hours: MarketHoursFilter,
    retry_state: RetryState,
    prev_portfolio_value: Option<f64>,
    symbol_currencies: HashMap<String, String>,
    summary: SessionSummary,
}

impl LiveBarPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: LivePipelineConfig,
        strategies: BTreeMap<String, Box<dyn SignalGenerator>>,
        broker: Arc<dyn Broker>,
        risk: Arc<RiskManager>,
        kill_switch: Arc<KillSwitch>,
        audit: Arc<AuditLogger>,
        guardrails: Arc<PaperGuardrails>,
        catalog: Arc<dyn AssetCatalog>,
        tracker: PortfolioTracker,
    ) -> Self {
        let quality = DataQualityGate::new(config.quality.clone());
        let market_hours = MarketHoursFilter::new(config.market_hours.clone());
        Self {
            config,
            strategies,
            broker,
            risk,
            kill_switch,
            audit,
            guardrails,
            catalog,
            tracker,
            quality,
            market_hours,
            retry_state: RetryState::new(),
            prev_portfolio_value: None,
            symbol_currencies: HashMap::new(),
            summary: SessionSummary::default(),
        }
    }

    /// Process bars until the stream closes, the session duration elapses,
    /// or a halt unwinds the session. Exit is graceful either way: the
    /// audit queue is drained before returning.
    pub async fn run(&mut self, mut bars: mpsc::Receiver<Bar>) -> SessionSummary {
        self.audit.log(AuditEvent::new(
            events::SESSION_STARTED,
            Severity::Info,
            json!({ "mode": self.config.mode.to_string() }),
        ));

        let deadline = self
            .config
            .session_duration_secs
            .map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));

        loop {
            let bar = match deadline {
                Some(deadline) => tokio::select! {
                    biased;
                    maybe_bar = bars.recv() => match maybe_bar {
                        Some(bar) => bar,
                        None => break,
                    },
                    _ = tokio::time::sleep_until(deadline) => {
                        info!("session duration reached; cancelling bar stream");
                        break;
                    }
                },
                None => match bars.recv().await {
                    Some(bar) => bar,
                    None => break,
                },
            };

            if let Err(e) = self.process_bar(bar).await {
                warn!(%e, "session unwinding");
                self.summary.halted = Some(e.to_string());
                break;
            }
        }

        self.audit.log(AuditEvent::new(
            events::SESSION_ENDED,
            Severity::Info,
            json!({
                "bars_processed": self.summary.bars_processed,
                "fills": self.summary.fills,
                "rejections": self.summary.rejections,
                "halted": self.summary.halted,
            }),
        ));
        if let Err(e) = self.audit.flush().await {
            warn!(%e, "audit drain on exit failed");
        }

        info!(
            bars = self.summary.bars_processed,
            fills = self.summary.fills,
            halted = ?self.summary.halted,
            "live session ended"
        );
        self.summary.clone()
    }

    async fn process_bar(&mut self, bar: Bar) -> LiveResult<()> {
        // 1. Data quality.
        match self.quality.check(&bar, Utc::now()) {
            QualityVerdict::Skip { reason, escalate } => {
                self.summary.bars_skipped += 1;
                self.audit.log(
                    AuditEvent::new(
                        events::DATA_QUALITY_SKIP,
                        Severity::Warning,
                        json!({ "reason": reason }),
                    )
                    .with_symbol(&bar.symbol),
                );
                if escalate {
                    let message = format!(
                        "data quality: repeated bad bars for {} ({reason})",
                        bar.symbol
                    );
                    self.kill_switch.trigger(&message);
                    self.audit.log(
                        AuditEvent::new(
                            events::KILL_SWITCH_TRIGGERED,
                            Severity::Critical,
                            json!({ "reason": message }),
                        )
                        .with_symbol(&bar.symbol),
                    );
                }
                return Ok(());
            }
            QualityVerdict::Accept { gap_secs: Some(gap) } => {
                self.audit.log(
                    AuditEvent::new(
                        events::DATA_GAP,
                        Severity::Warning,
                        json!({ "gap_secs": gap }),
                    )
                    .with_symbol(&bar.symbol),
                );
            }
            QualityVerdict::Accept { gap_secs: None } => {}
        }

        // 2. Market hours (crypto bypasses).
        let is_crypto = self.catalog.asset_class(&bar.symbol).is_crypto();
        if !self.market_hours.in_session(is_crypto, bar.timestamp) {
            debug!(symbol = %bar.symbol, "outside market hours; bar skipped");
            self.summary.bars_skipped += 1;
            return Ok(());
        }

        // 3. Kill switch: abandon the bar and unwind the session.
        if let Err(e) = self.kill_switch.check() {
            self.audit.log(AuditEvent::new(
                events::KILL_SWITCH_HALT,
                Severity::Critical,
                json!({ "reason": e.to_string() }),
            ));
            return Err(LiveError::Halted(e.to_string()));
        }

        self.summary.bars_processed += 1;

        // Let the venue see the bar (the paper broker marks fills off it).
        if let Err(e) = self.broker.on_market_data(&bar).await {
            debug!(%e, "venue ignored market data");
        }

        // 4. Strategy.
        let signal = match self.strategies.get_mut(&bar.symbol) {
            Some(strategy) => strategy.on_bar(&bar),
            None => None,
        };
        if let Some(signal) = signal {
            self.summary.signals += 1;
            self.handle_signal(signal, &bar).await?;
        }

        // 7. VaR feed and unconditional end-of-bar snapshot.
        self.end_of_bar(&bar).await?;
        Ok(())
    }

    async fn handle_signal(
        &mut self,
        signal: palisade_core::Signal,
        bar: &Bar,
    ) -> LiveResult<()> {
        // 5. Risk approval against live broker state.
        let broker = Arc::clone(&self.broker);
        let positions = call_with_retry(
            "positions",
            &self.config.retry,
            &self.retry_state,
            &self.kill_switch,
            &self.audit,
            move || {
                let broker = Arc::clone(&broker);
                async move { broker.positions().await }
            },
        )
        .await?;

        let broker = Arc::clone(&self.broker);
        let portfolio_value = call_with_retry(
            "portfolio_value",
            &self.config.retry,
            &self.retry_state,
            &self.kill_switch,
            &self.audit,
            move || {
                let broker = Arc::clone(&broker);
                async move { broker.portfolio_value().await }
            },
        )
        .await?;

        let approval = self
            .risk
            .approve(&signal, portfolio_value, bar.close, &positions);

        let order = match approval {
            Approval::NoAction => return Ok(()),
            Approval::Rejected { code, reason } => {
                self.summary.rejections += 1;
                debug!(symbol = %signal.symbol, %code, %reason, "signal rejected");
                self.audit.log(
                    AuditEvent::new(
                        events::RISK_REJECTION,
                        Severity::Info,
                        json!({ "code": code.code(), "reason": reason }),
                    )
                    .with_symbol(&signal.symbol)
                    .with_strategy(&signal.strategy),
                );
                if self.config.mode.is_paper() {
                    self.guardrails.record_reject(&signal.symbol, Utc::now());
                }
                return Ok(());
            }
            Approval::Approved(order) => order,
        };

        // Entry price must be captured before a close fills, while the
        // position still exists broker-side.
        let entry_price = positions
            .get(&order.symbol)
            .map(|position| position.avg_entry_price);

        // 6. Submit through the resilience wrapper.
        if self.config.mode.is_paper() {
            self.guardrails.record_order(Utc::now());
        }
        self.summary.orders_submitted += 1;
        self.audit.log(
            AuditEvent::new(
                events::ORDER_SUBMITTED,
                Severity::Info,
                json!({
                    "side": order.side.to_string(),
                    "quantity": order.quantity,
                    "stop_loss": order.stop_loss,
                    "take_profit": order.take_profit,
                }),
            )
            .with_symbol(&order.symbol)
            .with_strategy(&signal.strategy),
        );

        let broker = Arc::clone(&self.broker);
        let order_template = order.clone();
        let submitted = call_with_retry(
            "submit_order",
            &self.config.retry,
            &self.retry_state,
            &self.kill_switch,
            &self.audit,
            move || {
                let broker = Arc::clone(&broker);
                let order = order_template.clone();
                async move { broker.submit_order(order).await }
            },
        )
        .await?;

        match submitted.status {
            OrderStatus::Filled => {
                self.summary.fills += 1;
                let fill_price = submitted.filled_price.unwrap_or(bar.close);
                let slippage_pct = if bar.close > 0.0 {
                    (fill_price - bar.close) / bar.close
                } else {
                    0.0
                };
                let estimated_fee = submitted.quantity * self.config.commission_per_share;
                self.audit.log(
                    AuditEvent::new(
                        events::ORDER_FILLED,
                        Severity::Info,
                        json!({
                            "side": submitted.side.to_string(),
                            "quantity": submitted.quantity,
                            "fill_price": fill_price,
                            "signal_price": bar.close,
                            "slippage_pct": slippage_pct,
                            "estimated_fee": estimated_fee,
                        }),
                    )
                    .with_symbol(&submitted.symbol)
                    .with_strategy(&signal.strategy),
                );
                if self.config.mode.is_paper() {
                    self.guardrails.record_fill();
                }

                if submitted.side == OrderSide::Sell {
                    let realized = entry_price
                        .map(|entry| (fill_price - entry) * submitted.quantity);
                    let profitable = realized.map(|pnl| pnl > 0.0).unwrap_or(false);
                    self.risk.record_trade_result(profitable);
                    self.audit.log(
                        AuditEvent::new(
                            events::TRADE_CLOSED,
                            Severity::Info,
                            json!({
                                "quantity": submitted.quantity,
                                "fill_price": fill_price,
                                "realized_pnl": realized,
                                "profitable": profitable,
                            }),
                        )
                        .with_symbol(&submitted.symbol)
                        .with_strategy(&signal.strategy),
                    );
                }
            }
            OrderStatus::Rejected => {
                self.summary.rejections += 1;
                warn!(symbol = %submitted.symbol, "order rejected by broker");
                self.audit.log(
                    AuditEvent::new(
                        events::ORDER_REJECTED,
                        Severity::Warning,
                        json!({
                            "side": submitted.side.to_string(),
                            "quantity": submitted.quantity,
                        }),
                    )
                    .with_symbol(&submitted.symbol)
                    .with_strategy(&signal.strategy),
                );
                if self.config.mode.is_paper() {
                    self.guardrails.record_reject(&submitted.symbol, Utc::now());
                }
            }
            OrderStatus::Pending | OrderStatus::Cancelled => {
                debug!(
                    symbol = %submitted.symbol,
                    status = %submitted.status,
                    "order not terminal"
                );
            }
        }

        Ok(())
    }

    async fn end_of_bar(&mut self, bar: &Bar) -> LiveResult<()> {
        let broker = Arc::clone(&self.broker);
        let portfolio_value = call_with_retry(
            "portfolio_value",
            &self.config.retry,
            &self.retry_state,
            &self.kill_switch,
            &self.audit,
            move || {
                let broker = Arc::clone(&broker);
                async move { broker.portfolio_value().await }
            },
        )
        .await?;

        if let Some(prev) = self.prev_portfolio_value {
            if prev > 0.0 {
                self.risk.update_portfolio_return(portfolio_value / prev - 1.0);
            }
        }
        self.prev_portfolio_value = Some(portfolio_value);

        let broker = Arc::clone(&self.broker);
        let positions = call_with_retry(
            "positions",
            &self.config.retry,
            &self.retry_state,
            &self.kill_switch,
            &self.audit,
            move || {
                let broker = Arc::clone(&broker);
                async move { broker.positions().await }
            },
        )
        .await?;

        let broker = Arc::clone(&self.broker);
        let cash = call_with_retry(
            "cash",
            &self.config.retry,
            &self.retry_state,
            &self.kill_switch,
            &self.audit,
            move || {
                let broker = Arc::clone(&broker);
                async move { broker.cash().await }
            },
        )
        .await?;

        // Resolve quote currencies for any newly seen symbols;
        // best-effort, the venue may not know.
        for symbol in positions.keys() {
            if !self.symbol_currencies.contains_key(symbol) {
                if let Ok(Some(currency)) = self.broker.symbol_currency(symbol).await {
                    self.symbol_currencies.insert(symbol.clone(), currency);
                }
            }
        }

        let snapshot =
            self.tracker
                .snapshot(&positions, cash, &self.symbol_currencies, Utc::now());
        self.audit.log(
            AuditEvent::new(
                events::PORTFOLIO_SNAPSHOT,
                Severity::Info,
                json!({
                    "total_value": snapshot.total_value,
                    "cash": snapshot.cash,
                    "positions_value": snapshot.positions_value,
                    "holdings": snapshot.holdings.len(),
                    "any_fx_stale": snapshot.any_fx_stale,
                }),
            )
            .with_symbol(&bar.symbol),
        );
        debug!(
            total_value = snapshot.total_value,
            fx_stale = snapshot.any_fx_stale,
            "end-of-bar snapshot"
        );
        Ok(())
    }
}
