//! Audit event shape and well-known event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event severity, serialized lowercase into the audit table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One append-only audit row. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub symbol: Option<String>,
    pub strategy: Option<String>,
    pub severity: Severity,
    pub payload: serde_json::Value,
}

impl AuditEvent {
    pub fn new(
        event_type: impl Into<String>,
        severity: Severity,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: event_type.into(),
            symbol: None,
            strategy: None,
            severity,
            payload,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }
}

/// Well-known event type names.
///
/// Kept as constants so reporting queries have stable strings to filter on.
pub mod events {
    pub const ORDER_SUBMITTED: &str = "order_submitted";
    pub const ORDER_FILLED: &str = "order_filled";
    pub const ORDER_REJECTED: &str = "order_rejected";
    pub const RISK_REJECTION: &str = "risk_rejection";
    pub const TRADE_CLOSED: &str = "trade_closed";
    pub const DATA_QUALITY_SKIP: &str = "data_quality_skip";
    pub const DATA_GAP: &str = "data_gap";
    pub const KILL_SWITCH_TRIGGERED: &str = "kill_switch_triggered";
    pub const KILL_SWITCH_HALT: &str = "kill_switch_halt";
    pub const BROKER_RETRY: &str = "broker_retry";
    pub const BROKER_EXHAUSTED: &str = "broker_exhausted";
    pub const SESSION_STARTED: &str = "session_started";
    pub const SESSION_ENDED: &str = "session_ended";
    pub const PORTFOLIO_SNAPSHOT: &str = "portfolio_snapshot";
}
