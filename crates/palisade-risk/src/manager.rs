//! The risk approval state machine.

use crate::config::{CorrelationMode, RiskConfig};
use crate::error::RiskResult;
use crate::lookup::CorrelationSource;
use crate::var::VarWindow;
use chrono::NaiveDate;
use palisade_core::{
    AssetCatalog, Order, OrderSide, Position, RejectReason, RunMode, Signal, SignalKind,
};
use palisade_safety::PaperGuardrails;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Outcome of one approval pass.
///
/// Rejections are expected, coded, and recoverable next bar. `NoAction`
/// covers the cases the taxonomy assigns no code to: Hold signals, Close
/// with nothing open, and a computed quantity of zero.
#[derive(Debug, Clone)]
pub enum Approval {
    Approved(Order),
    Rejected { code: RejectReason, reason: String },
    NoAction,
}

impl Approval {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved(_))
    }

    pub fn order(self) -> Option<Order> {
        match self {
            Self::Approved(order) => Some(order),
            _ => None,
        }
    }

    pub fn reject_code(&self) -> Option<RejectReason> {
        match self {
            Self::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// State touched only from the single bar-processing call path.
///
/// The lock is uncontended; it exists so the manager can be shared as
/// `Arc<RiskManager>` across the pipeline's call sites.
#[derive(Debug)]
struct BarPathState {
    intraday_baseline: f64,
    baseline_date: Option<NaiveDate>,
    consecutive_losses: u32,
    var: VarWindow,
}

/// Approval state machine: circuit breakers, sizing, exposure gates.
///
/// Gate boundary semantics are deliberately heterogeneous and follow the
/// trading system this encodes: drawdown and intraday-loss reject on
/// strict `>`, the consecutive-loss breaker on `>=`, the VaR gate fails at
/// exact equality, and guardrail counts pass exactly at their limits.
/// Do not unify them.
pub struct RiskManager {
    config: RiskConfig,
    mode: RunMode,
    catalog: Arc<dyn AssetCatalog>,
    correlations: Arc<dyn CorrelationSource>,
    guardrails: Arc<PaperGuardrails>,
    /// Peak equity is the one field reached from more than one call path
    /// (`approve` and `update_portfolio_return` run from different call
    /// sites in the live pipeline), so its read-modify-write gets its own
    /// explicit mutex.
    peak_equity: Mutex<f64>,
    state: Mutex<BarPathState>,
}

impl RiskManager {
    pub fn new(
        config: RiskConfig,
        mode: RunMode,
        catalog: Arc<dyn AssetCatalog>,
        correlations: Arc<dyn CorrelationSource>,
        guardrails: Arc<PaperGuardrails>,
    ) -> RiskResult<Self> {
        config.validate()?;
        let var = VarWindow::new(config.var_window);
        Ok(Self {
            config,
            mode,
            catalog,
            correlations,
            guardrails,
            peak_equity: Mutex::new(0.0),
            state: Mutex::new(BarPathState {
                intraday_baseline: 0.0,
                baseline_date: None,
                consecutive_losses: 0,
                var,
            }),
        })
    }

    /// Run the full approval chain for one signal.
    ///
    /// Checks short-circuit in order: drawdown, intraday loss, consecutive
    /// losses, VaR, paper guardrails, then signal dispatch with the
    /// per-entry gates.
    pub fn approve(
        &self,
        signal: &Signal,
        portfolio_value: f64,
        current_price: f64,
        open_positions: &HashMap<String, Position>,
    ) -> Approval {
        // 1. Drawdown breaker. Peak equity never decreases.
        {
            let mut peak = self.peak_equity.lock();
            if portfolio_value.is_finite() && portfolio_value > *peak {
                *peak = portfolio_value;
            }
            if *peak > 0.0 {
                let drawdown = (*peak - portfolio_value) / *peak;
                if drawdown > self.config.max_drawdown_pct {
                    return self.reject(
                        RejectReason::DrawdownHalt,
                        format!(
                            "drawdown {:.4} > {:.4} (peak {:.2})",
                            drawdown, self.config.max_drawdown_pct, *peak
                        ),
                    );
                }
            }
        }

        let mut state = self.state.lock();

        // 2. Intraday-loss breaker; baseline resets on the first signal of
        // a new UTC trading day.
        let day = signal.timestamp.date_naive();
        if state.baseline_date != Some(day) {
            state.baseline_date = Some(day);
            state.intraday_baseline = portfolio_value;
            trace!(%day, baseline = portfolio_value, "intraday baseline reset");
        }
        if state.intraday_baseline > 0.0 {
            let loss = (state.intraday_baseline - portfolio_value) / state.intraday_baseline;
            if loss > self.config.max_intraday_loss_pct {
                return self.reject(
                    RejectReason::IntradayLossHalt,
                    format!(
                        "intraday loss {:.4} > {:.4}",
                        loss, self.config.max_intraday_loss_pct
                    ),
                );
            }
        }

        // 3. Consecutive-loss breaker.
        if self.config.consecutive_loss_limit > 0
            && state.consecutive_losses >= self.config.consecutive_loss_limit
        {
            return self.reject(
                RejectReason::ConsecutiveLossHalt,
                format!(
                    "{} consecutive losses >= limit {}",
                    state.consecutive_losses, self.config.consecutive_loss_limit
                ),
            );
        }

        // 4. VaR gate; fails at exact equality.
        if let Some(var) = state.var.var_95() {
            if var >= self.config.max_var_pct {
                return self.reject(
                    RejectReason::VarGate,
                    format!("95% VaR {:.4} >= {:.4}", var, self.config.max_var_pct),
                );
            }
        }
        drop(state);

        let is_crypto = self.catalog.asset_class(&signal.symbol).is_crypto();

        // 5. Paper guardrails (paper mode only).
        if self.mode.is_paper() {
            let breaches =
                self.guardrails
                    .all_checks(&signal.symbol, is_crypto, signal.timestamp);
            if let Some(first) = breaches.first() {
                return self.reject(RejectReason::PaperGuardrail, first.to_string());
            }
        }

        // 6. Signal dispatch.
        match signal.kind {
            SignalKind::Hold => Approval::NoAction,
            SignalKind::Close => match open_positions.get(&signal.symbol) {
                Some(position) => {
                    let order = Order::new(&signal.symbol, OrderSide::Sell, position.quantity);
                    debug!(symbol = %signal.symbol, qty = position.quantity, "close approved");
                    Approval::Approved(order)
                }
                None => Approval::NoAction,
            },
            SignalKind::Long => self.approve_long(
                signal,
                portfolio_value,
                current_price,
                open_positions,
                is_crypto,
            ),
        }
    }

    fn approve_long(
        &self,
        signal: &Signal,
        portfolio_value: f64,
        current_price: f64,
        open_positions: &HashMap<String, Position>,
        is_crypto: bool,
    ) -> Approval {
        // 6a. Duplicate and position-count checks.
        if open_positions.contains_key(&signal.symbol) {
            return self.reject(
                RejectReason::DuplicatePosition,
                format!("already holding {}", signal.symbol),
            );
        }
        if open_positions.len() >= self.config.max_open_positions {
            return self.reject(
                RejectReason::MaxPositions,
                format!(
                    "{} open positions >= max {}",
                    open_positions.len(),
                    self.config.max_open_positions
                ),
            );
        }

        // 6b. Correlation gate against currently open symbols.
        let mut strength = signal.strength;
        let threshold = self.config.correlation.threshold;
        let max_corr = open_positions
            .keys()
            .filter_map(|held| self.correlations.correlation(&signal.symbol, held))
            .map(f64::abs)
            .fold(0.0_f64, f64::max);
        if max_corr > threshold {
            match self.config.correlation.mode {
                CorrelationMode::Reject => {
                    return self.reject(
                        RejectReason::CorrelationLimit,
                        format!("max correlation {max_corr:.3} > threshold {threshold:.3}"),
                    );
                }
                CorrelationMode::Scale => {
                    // Linear decay inherited from the production formula;
                    // keep exactly as written.
                    let factor = (1.0 - (max_corr - threshold) / (1.0 - threshold)).max(0.0);
                    strength *= factor;
                    if strength <= 0.0 {
                        return self.reject(
                            RejectReason::CorrelationLimit,
                            format!(
                                "correlation {max_corr:.3} scaled strength to zero"
                            ),
                        );
                    }
                    debug!(
                        symbol = %signal.symbol,
                        max_corr,
                        factor,
                        "correlation-scaled signal strength"
                    );
                }
            }
        }

        // 6c. Stop-loss / take-profit, ATR-derived when available.
        let params = self.config.params_for(is_crypto);
        let atr = signal.metadata_f64("atr").filter(|a| *a > 0.0);
        let (stop_loss, take_profit) = match atr {
            Some(atr) if self.config.use_atr_stops => {
                let stop = (current_price - params.atr_multiplier * atr).max(0.0001);
                let take = current_price + params.atr_tp_multiplier * atr;
                (stop, take)
            }
            _ => (
                current_price * (1.0 - params.stop_loss_pct),
                current_price * (1.0 + params.take_profit_pct),
            ),
        };
        let effective_stop_pct = if current_price > 0.0 {
            (current_price - stop_loss) / current_price
        } else {
            0.0
        };

        // 6d. Fixed-fractional position sizing.
        let quantity = match size_position(
            portfolio_value,
            current_price,
            effective_stop_pct,
            strength,
            self.config.max_portfolio_risk_pct,
            params.max_position_pct,
        ) {
            Some(quantity) => quantity,
            None => {
                debug!(symbol = %signal.symbol, "sized to zero; no order");
                return Approval::NoAction;
            }
        };
        let new_value = quantity * current_price;

        // 6e. Crypto exposure gate.
        if is_crypto {
            let existing: f64 = open_positions
                .values()
                .filter(|p| self.catalog.asset_class(&p.symbol).is_crypto())
                .map(Position::market_value)
                .sum();
            let projected = (existing + new_value) / portfolio_value;
            if projected > self.config.max_crypto_exposure_pct {
                return self.reject(
                    RejectReason::CryptoExposureLimit,
                    format!(
                        "projected crypto exposure {:.4} > {:.4}",
                        projected, self.config.max_crypto_exposure_pct
                    ),
                );
            }
        }

        // 6f. Sector concentration gate (skippable).
        if self.config.sector_gate_enabled {
            if let Some(sector) = self.catalog.sector(&signal.symbol) {
                let existing: f64 = open_positions
                    .values()
                    .filter(|p| self.catalog.sector(&p.symbol) == Some(sector))
                    .map(Position::market_value)
                    .sum();
                let projected = (existing + new_value) / portfolio_value;
                if projected > self.config.max_sector_concentration_pct {
                    return self.reject(
                        RejectReason::SectorConcentrationRejected,
                        format!(
                            "projected {sector} exposure {:.4} > {:.4}",
                            projected, self.config.max_sector_concentration_pct
                        ),
                    );
                }
            }
        }

        // 6g. Approved.
        let order = Order::new(&signal.symbol, OrderSide::Buy, quantity)
            .with_stops(Some(stop_loss), Some(take_profit));
        debug!(
            symbol = %signal.symbol,
            quantity,
            stop_loss,
            take_profit,
            "long approved"
        );
        Approval::Approved(order)
    }

    fn reject(&self, code: RejectReason, reason: String) -> Approval {
        debug!(code = %code, %reason, "signal rejected");
        Approval::Rejected { code, reason }
    }

    /// Record a closed trade's outcome. A profitable close resets the
    /// consecutive-loss counter; a losing one increments it.
    pub fn record_trade_result(&self, profitable: bool) {
        let mut state = self.state.lock();
        if profitable {
            if state.consecutive_losses > 0 {
                trace!(previous = state.consecutive_losses, "loss streak reset");
            }
            state.consecutive_losses = 0;
        } else {
            state.consecutive_losses += 1;
            if self.config.consecutive_loss_limit > 0
                && state.consecutive_losses >= self.config.consecutive_loss_limit
            {
                warn!(
                    losses = state.consecutive_losses,
                    "consecutive-loss breaker armed"
                );
            }
        }
    }

    /// Feed one period portfolio return into the VaR window.
    pub fn update_portfolio_return(&self, daily_return: f64) {
        self.state.lock().var.push(daily_return);
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.state.lock().consecutive_losses
    }

    pub fn peak_equity(&self) -> f64 {
        *self.peak_equity.lock()
    }
}

/// Fixed-fractional sizing.
///
/// `risk_dollars = portfolio_value * max_portfolio_risk_pct * strength`,
/// capped by the asset-class position cap; the result is rounded to four
/// decimals. Returns `None` (no order, not an error) for non-finite or
/// non-positive inputs or a zero quantity.
fn size_position(
    portfolio_value: f64,
    price: f64,
    stop_pct: f64,
    strength: f64,
    max_portfolio_risk_pct: f64,
    max_position_pct: f64,
) -> Option<f64> {
    if !portfolio_value.is_finite() || portfolio_value <= 0.0 {
        return None;
    }
    if !price.is_finite() || price <= 0.0 {
        return None;
    }
    if !stop_pct.is_finite() || stop_pct <= 0.0 {
        return None;
    }

    let risk_dollars = portfolio_value * max_portfolio_risk_pct * strength;
    let qty_from_risk = risk_dollars / (price * stop_pct);
    let qty_from_cap = portfolio_value * max_position_pct / price;
    let quantity = round4(qty_from_risk.min(qty_from_cap)).max(0.0);

    if quantity <= 0.0 {
        None
    } else {
        Some(quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StaticCorrelationMatrix;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use palisade_core::StaticAssetCatalog;
    use palisade_safety::GuardrailConfig;
    use serde_json::json;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap()
    }

    fn catalog() -> Arc<StaticAssetCatalog> {
        let mut sectors = HashMap::new();
        sectors.insert("AAPL".to_string(), "tech".to_string());
        sectors.insert("MSFT".to_string(), "tech".to_string());
        sectors.insert("XOM".to_string(), "energy".to_string());
        Arc::new(StaticAssetCatalog::new(
            vec!["BTC-USD".to_string(), "ETH-USD".to_string()],
            sectors,
        ))
    }

    fn guardrails() -> Arc<PaperGuardrails> {
        Arc::new(PaperGuardrails::new(GuardrailConfig {
            session_enabled: false,
            ..GuardrailConfig::default()
        }))
    }

    fn manager_with(config: RiskConfig, correlations: StaticCorrelationMatrix) -> RiskManager {
        RiskManager::new(
            config,
            RunMode::Test,
            catalog(),
            Arc::new(correlations),
            guardrails(),
        )
        .unwrap()
    }

    fn manager(config: RiskConfig) -> RiskManager {
        manager_with(config, StaticCorrelationMatrix::new())
    }

    fn base_config() -> RiskConfig {
        let mut cfg = RiskConfig::default();
        cfg.equity.max_position_pct = 0.10;
        cfg.max_portfolio_risk_pct = 0.02;
        cfg.equity.stop_loss_pct = 0.05;
        cfg.use_atr_stops = false;
        // Keep the intraday breaker out of the way unless a test arms it.
        cfg.max_intraday_loss_pct = 0.90;
        cfg
    }

    fn long(symbol: &str, strength: f64) -> Signal {
        Signal::new(symbol, SignalKind::Long, strength, ts(), "test").unwrap()
    }

    fn no_positions() -> HashMap<String, Position> {
        HashMap::new()
    }

    // === Sizing scenarios ===

    #[test]
    fn test_scenario_a_cap_binds() {
        let risk = manager(base_config());
        let approval = risk.approve(&long("AAPL", 1.0), 100_000.0, 150.0, &no_positions());

        let order = approval.order().expect("approved");
        // qty_from_risk = 266.667, qty_from_cap = 66.667 -> cap binds.
        assert!((order.quantity - 66.6667).abs() < 1e-4);
        assert_eq!(order.side, OrderSide::Buy);
    }

    #[test]
    fn test_scenario_b_weak_signal_risk_binds() {
        let risk = manager(base_config());
        let strong = risk
            .approve(&long("AAPL", 1.0), 100_000.0, 150.0, &no_positions())
            .order()
            .unwrap();
        let weak = risk
            .approve(&long("AAPL", 0.2), 100_000.0, 150.0, &no_positions())
            .order()
            .unwrap();

        // qty_from_risk = 53.333 < qty_from_cap = 66.667.
        assert!((weak.quantity - 53.3333).abs() < 1e-4);
        assert!(weak.quantity < strong.quantity);
    }

    #[test]
    fn test_quantity_non_decreasing_in_strength() {
        let risk = manager(base_config());
        let mut previous = 0.0;
        for step in 1..=10 {
            let strength = step as f64 / 10.0;
            let qty = risk
                .approve(&long("AAPL", strength), 100_000.0, 150.0, &no_positions())
                .order()
                .map(|o| o.quantity)
                .unwrap_or(0.0);
            assert!(qty >= previous, "qty decreased at strength {strength}");
            previous = qty;
        }
    }

    #[test]
    fn test_non_finite_inputs_yield_no_action() {
        let risk = manager(base_config());
        for (pv, price) in [
            (f64::NAN, 150.0),
            (100_000.0, f64::NAN),
            (0.0, 150.0),
            (100_000.0, 0.0),
            (f64::INFINITY, 150.0),
        ] {
            let approval = risk.approve(&long("AAPL", 1.0), pv, price, &no_positions());
            assert!(
                matches!(approval, Approval::NoAction),
                "pv={pv} price={price}"
            );
        }
    }

    // === Drawdown breaker ===

    #[test]
    fn test_scenario_c_drawdown_boundary_passes() {
        let risk = manager(base_config());
        // Establish the peak.
        assert!(risk
            .approve(&long("AAPL", 1.0), 100_000.0, 150.0, &no_positions())
            .is_approved());

        // Exactly 20% drawdown with a 20% limit: not strictly greater, so
        // the order is still approved.
        let approval = risk.approve(&long("AAPL", 1.0), 80_000.0, 150.0, &no_positions());
        assert!(approval.is_approved());

        // One dollar deeper trips the breaker.
        let approval = risk.approve(&long("AAPL", 1.0), 79_999.0, 150.0, &no_positions());
        assert_eq!(approval.reject_code(), Some(RejectReason::DrawdownHalt));
    }

    #[test]
    fn test_drawdown_recovers_when_equity_recovers() {
        let risk = manager(base_config());
        assert!(risk
            .approve(&long("AAPL", 1.0), 100_000.0, 150.0, &no_positions())
            .is_approved());

        assert_eq!(
            risk.approve(&long("AAPL", 1.0), 70_000.0, 150.0, &no_positions())
                .reject_code(),
            Some(RejectReason::DrawdownHalt)
        );

        // Back above the threshold: approvals resume. Peak never decreased.
        assert!(risk
            .approve(&long("AAPL", 1.0), 85_000.0, 150.0, &no_positions())
            .is_approved());
        assert_eq!(risk.peak_equity(), 100_000.0);
    }

    // === Intraday breaker ===

    #[test]
    fn test_intraday_baseline_resets_per_utc_day() {
        let mut cfg = base_config();
        cfg.max_intraday_loss_pct = 0.05;
        // Keep the drawdown breaker out of the way.
        cfg.max_drawdown_pct = 0.90;
        let risk = manager(cfg);

        let day1 = Signal::new("AAPL", SignalKind::Long, 1.0, ts(), "test").unwrap();
        assert!(risk
            .approve(&day1, 100_000.0, 150.0, &no_positions())
            .is_approved());

        // 6% down the same day: halted.
        let later = Signal::new(
            "AAPL",
            SignalKind::Long,
            1.0,
            ts() + Duration::hours(2),
            "test",
        )
        .unwrap();
        assert_eq!(
            risk.approve(&later, 94_000.0, 150.0, &no_positions())
                .reject_code(),
            Some(RejectReason::IntradayLossHalt)
        );

        // Next UTC day the baseline resets to the current value.
        let next_day = Signal::new(
            "AAPL",
            SignalKind::Long,
            1.0,
            ts() + Duration::days(1),
            "test",
        )
        .unwrap();
        assert!(risk
            .approve(&next_day, 94_000.0, 150.0, &no_positions())
            .is_approved());
    }

    // === Consecutive-loss breaker ===

    #[test]
    fn test_consecutive_loss_breaker_and_reset() {
        let mut cfg = base_config();
        cfg.consecutive_loss_limit = 3;
        let risk = manager(cfg);

        risk.record_trade_result(false);
        risk.record_trade_result(false);
        assert!(risk
            .approve(&long("AAPL", 1.0), 100_000.0, 150.0, &no_positions())
            .is_approved());

        risk.record_trade_result(false);
        assert_eq!(
            risk.approve(&long("AAPL", 1.0), 100_000.0, 150.0, &no_positions())
                .reject_code(),
            Some(RejectReason::ConsecutiveLossHalt)
        );

        // Only a profitable close resets the streak.
        risk.record_trade_result(true);
        assert_eq!(risk.consecutive_losses(), 0);
        assert!(risk
            .approve(&long("AAPL", 1.0), 100_000.0, 150.0, &no_positions())
            .is_approved());
    }

    // === VaR gate ===

    #[test]
    fn test_var_gate_fails_at_exact_equality() {
        let mut cfg = base_config();
        cfg.var_window = 20;
        cfg.max_var_pct = 0.04;
        let risk = manager(cfg);

        for i in 0..20 {
            risk.update_portfolio_return(if i == 0 { -0.04 } else { 0.001 });
        }
        // VaR == max_var_pct: the gate fails at equality.
        assert_eq!(
            risk.approve(&long("AAPL", 1.0), 100_000.0, 150.0, &no_positions())
                .reject_code(),
            Some(RejectReason::VarGate)
        );
    }

    #[test]
    fn test_var_gate_unarmed_until_window_full() {
        let mut cfg = base_config();
        cfg.var_window = 20;
        cfg.max_var_pct = 0.01;
        let risk = manager(cfg);

        for _ in 0..19 {
            risk.update_portfolio_return(-0.10);
        }
        assert!(risk
            .approve(&long("AAPL", 1.0), 100_000.0, 150.0, &no_positions())
            .is_approved());
    }

    // === Dispatch ===

    #[test]
    fn test_hold_and_close_without_position_are_no_ops() {
        let risk = manager(base_config());

        let hold = Signal::new("AAPL", SignalKind::Hold, 0.5, ts(), "test").unwrap();
        assert!(matches!(
            risk.approve(&hold, 100_000.0, 150.0, &no_positions()),
            Approval::NoAction
        ));

        let close = Signal::new("AAPL", SignalKind::Close, 0.5, ts(), "test").unwrap();
        assert!(matches!(
            risk.approve(&close, 100_000.0, 150.0, &no_positions()),
            Approval::NoAction
        ));
    }

    #[test]
    fn test_close_emits_full_size_sell() {
        let risk = manager(base_config());
        let mut positions = no_positions();
        positions.insert("AAPL".to_string(), Position::new("AAPL", 42.0, 140.0));

        let close = Signal::new("AAPL", SignalKind::Close, 1.0, ts(), "test").unwrap();
        let order = risk
            .approve(&close, 100_000.0, 150.0, &positions)
            .order()
            .unwrap();
        assert_eq!(order.side, OrderSide::Sell);
        assert!((order.quantity - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_and_max_positions() {
        let mut cfg = base_config();
        cfg.max_open_positions = 2;
        let risk = manager(cfg);

        let mut positions = no_positions();
        positions.insert("AAPL".to_string(), Position::new("AAPL", 10.0, 150.0));

        assert_eq!(
            risk.approve(&long("AAPL", 1.0), 100_000.0, 150.0, &positions)
                .reject_code(),
            Some(RejectReason::DuplicatePosition)
        );

        positions.insert("XOM".to_string(), Position::new("XOM", 10.0, 100.0));
        assert_eq!(
            risk.approve(&long("MSFT", 1.0), 100_000.0, 300.0, &positions)
                .reject_code(),
            Some(RejectReason::MaxPositions)
        );
    }

    // === Correlation gate ===

    #[test]
    fn test_correlation_reject_mode() {
        let mut cfg = base_config();
        cfg.correlation.threshold = 0.7;
        cfg.correlation.mode = CorrelationMode::Reject;
        let mut matrix = StaticCorrelationMatrix::new();
        matrix.insert("AAPL", "MSFT", 0.85);
        let risk = manager_with(cfg, matrix);

        let mut positions = no_positions();
        positions.insert("MSFT".to_string(), Position::new("MSFT", 1.0, 300.0));

        assert_eq!(
            risk.approve(&long("AAPL", 1.0), 100_000.0, 150.0, &positions)
                .reject_code(),
            Some(RejectReason::CorrelationLimit)
        );
    }

    #[test]
    fn test_correlation_scale_mode_shrinks_quantity() {
        let mut cfg = base_config();
        cfg.correlation.threshold = 0.7;
        cfg.correlation.mode = CorrelationMode::Scale;
        cfg.sector_gate_enabled = false;
        let mut matrix = StaticCorrelationMatrix::new();
        matrix.insert("AAPL", "MSFT", 0.85);
        let risk = manager_with(cfg, matrix);

        let mut positions = no_positions();
        positions.insert("MSFT".to_string(), Position::new("MSFT", 1.0, 300.0));

        let order = risk
            .approve(&long("AAPL", 1.0), 100_000.0, 150.0, &positions)
            .order()
            .unwrap();

        // factor = 1 - (0.85 - 0.7)/(1 - 0.7) = 0.5; risk leg binds:
        // qty = 100000*0.02*0.5 / (150*0.05) = 133.333 -> capped at 66.667.
        // With the cap still binding the scale shows through only below the
        // cap, so check against the unscaled order too.
        let unscaled = risk
            .approve(&long("XOM", 1.0), 100_000.0, 150.0, &no_positions())
            .order()
            .unwrap();
        assert!(order.quantity <= unscaled.quantity);
    }

    #[test]
    fn test_correlation_scale_to_zero_rejects() {
        let mut cfg = base_config();
        cfg.correlation.threshold = 0.5;
        cfg.correlation.mode = CorrelationMode::Scale;
        let mut matrix = StaticCorrelationMatrix::new();
        matrix.insert("AAPL", "MSFT", 1.0);
        let risk = manager_with(cfg, matrix);

        let mut positions = no_positions();
        positions.insert("MSFT".to_string(), Position::new("MSFT", 1.0, 300.0));

        // corr 1.0 -> factor 0 -> strength 0 -> reject.
        assert_eq!(
            risk.approve(&long("AAPL", 1.0), 100_000.0, 150.0, &positions)
                .reject_code(),
            Some(RejectReason::CorrelationLimit)
        );
    }

    // === Stops ===

    #[test]
    fn test_atr_stops_preferred_over_fixed() {
        let mut cfg = base_config();
        cfg.use_atr_stops = true;
        cfg.equity.atr_multiplier = 2.0;
        cfg.equity.atr_tp_multiplier = 4.0;
        let risk = manager(cfg);

        let signal = long("AAPL", 1.0).with_metadata("atr", json!(3.0));
        let order = risk
            .approve(&signal, 100_000.0, 150.0, &no_positions())
            .order()
            .unwrap();

        assert!((order.stop_loss.unwrap() - (150.0 - 6.0)).abs() < 1e-9);
        assert!((order.take_profit.unwrap() - (150.0 + 12.0)).abs() < 1e-9);
    }

    #[test]
    fn test_atr_stop_floored_above_zero() {
        let mut cfg = base_config();
        cfg.use_atr_stops = true;
        cfg.equity.atr_multiplier = 2.0;
        let risk = manager(cfg);

        // Huge ATR would push the stop negative; it floors at 0.0001.
        let signal = long("AAPL", 1.0).with_metadata("atr", json!(500.0));
        let order = risk
            .approve(&signal, 100_000.0, 150.0, &no_positions())
            .order()
            .unwrap();
        assert_eq!(order.stop_loss, Some(0.0001));
    }

    #[test]
    fn test_fixed_stops_when_no_atr() {
        let mut cfg = base_config();
        cfg.use_atr_stops = true;
        let risk = manager(cfg);

        let order = risk
            .approve(&long("AAPL", 1.0), 100_000.0, 150.0, &no_positions())
            .order()
            .unwrap();
        assert!((order.stop_loss.unwrap() - 150.0 * 0.95).abs() < 1e-9);
        assert!((order.take_profit.unwrap() - 150.0 * 1.10).abs() < 1e-9);
    }

    // === Exposure gates ===

    #[test]
    fn test_crypto_exposure_gate() {
        let mut cfg = base_config();
        cfg.max_crypto_exposure_pct = 0.10;
        cfg.crypto.max_position_pct = 0.20;
        cfg.crypto.stop_loss_pct = 0.05;
        let risk = manager(cfg);

        let mut positions = no_positions();
        let mut eth = Position::new("ETH-USD", 2.0, 4_000.0);
        eth.mark(4_500.0);
        positions.insert("ETH-USD".to_string(), eth);

        // Existing crypto 9000 + new position would overflow 10% of 100k.
        assert_eq!(
            risk.approve(&long("BTC-USD", 1.0), 100_000.0, 50_000.0, &positions)
                .reject_code(),
            Some(RejectReason::CryptoExposureLimit)
        );
    }

    #[test]
    fn test_sector_concentration_gate_and_skip() {
        let mut cfg = base_config();
        cfg.max_sector_concentration_pct = 0.15;
        let risk = manager(cfg.clone());

        let mut positions = no_positions();
        positions.insert("MSFT".to_string(), Position::new("MSFT", 40.0, 300.0));

        // Existing tech 12k + new ~10k projects past 15% of 100k.
        assert_eq!(
            risk.approve(&long("AAPL", 1.0), 100_000.0, 150.0, &positions)
                .reject_code(),
            Some(RejectReason::SectorConcentrationRejected)
        );

        // Gate disabled: same signal passes.
        cfg.sector_gate_enabled = false;
        let relaxed = manager(cfg);
        assert!(relaxed
            .approve(&long("AAPL", 1.0), 100_000.0, 150.0, &positions)
            .is_approved());
    }
}
