//! Runtime operating mode.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating mode for a trading session.
///
/// The mode selects which durable stores (kill switch, audit table) are
/// opened; paper, live, and test stores must never be shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Simulated execution against a paper broker.
    #[default]
    Paper,
    /// Real-money execution against a live broker.
    Live,
    /// Test fixtures; isolated throwaway stores.
    Test,
}

impl RunMode {
    /// Whether paper-trading guardrails apply in this mode.
    pub fn is_paper(&self) -> bool {
        matches!(self, Self::Paper)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paper => write!(f, "paper"),
            Self::Live => write!(f, "live"),
            Self::Test => write!(f, "test"),
        }
    }
}
