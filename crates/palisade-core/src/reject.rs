//! Coded risk-rejection reasons.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why the risk manager declined to produce an order.
///
/// Rejections are expected outcomes, not errors: every code is recoverable
/// on a later bar. The wire form is the SCREAMING_SNAKE code used in audit
/// rows and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    /// Drawdown from peak equity breached the configured maximum.
    DrawdownHalt,
    /// Loss since the intraday baseline breached the configured maximum.
    IntradayLossHalt,
    /// Too many consecutive losing closed trades.
    ConsecutiveLossHalt,
    /// Rolling portfolio VaR breached the configured maximum.
    VarGate,
    /// A paper-trading guardrail check failed.
    PaperGuardrail,
    /// Correlation with an open position too high.
    CorrelationLimit,
    /// Projected crypto exposure above the cap.
    CryptoExposureLimit,
    /// Projected sector concentration above the cap.
    SectorConcentrationRejected,
    /// Already holding the signal's symbol.
    DuplicatePosition,
    /// Open-position count at the configured maximum.
    MaxPositions,
}

impl RejectReason {
    /// Stable string code, as written to the audit table.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DrawdownHalt => "DRAWDOWN_HALT",
            Self::IntradayLossHalt => "INTRADAY_LOSS_HALT",
            Self::ConsecutiveLossHalt => "CONSECUTIVE_LOSS_HALT",
            Self::VarGate => "VAR_GATE",
            Self::PaperGuardrail => "PAPER_GUARDRAIL",
            Self::CorrelationLimit => "CORRELATION_LIMIT",
            Self::CryptoExposureLimit => "CRYPTO_EXPOSURE_LIMIT",
            Self::SectorConcentrationRejected => "SECTOR_CONCENTRATION_REJECTED",
            Self::DuplicatePosition => "DUPLICATE_POSITION",
            Self::MaxPositions => "MAX_POSITIONS",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_matches_serde_form() {
        let json = serde_json::to_string(&RejectReason::DrawdownHalt).unwrap();
        assert_eq!(json, format!("\"{}\"", RejectReason::DrawdownHalt.code()));

        let json = serde_json::to_string(&RejectReason::SectorConcentrationRejected).unwrap();
        assert_eq!(json, "\"SECTOR_CONCENTRATION_REJECTED\"");
    }
}
