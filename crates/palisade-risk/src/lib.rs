//! Risk approval state machine.
//!
//! [`RiskManager`] turns signals into orders (or coded rejections) by
//! running an ordered chain of circuit breakers, the paper guardrails,
//! and per-signal gates (correlation, sizing, exposure caps). All gate
//! boundary semantics are deliberately per-gate; see each check's docs.

pub mod config;
pub mod error;
pub mod lookup;
pub mod manager;
pub mod var;

pub use config::{AssetRiskParams, CorrelationConfig, CorrelationMode, RiskConfig};
pub use error::{RiskError, RiskResult};
pub use lookup::{CorrelationSource, StaticCorrelationMatrix};
pub use manager::{Approval, RiskManager};
pub use var::VarWindow;
