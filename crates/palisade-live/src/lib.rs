//! Real-time bar processing against a live or paper broker.
//!
//! Per incoming bar: data-quality gate, market-hours filter, kill-switch
//! check, strategy, risk approval against broker-reported state, resilient
//! submission, VaR feed, and an unconditional end-of-bar portfolio
//! snapshot.

pub mod error;
pub mod pipeline;
pub mod quality;
pub mod session;

pub use error::{LiveError, LiveResult};
pub use pipeline::{LiveBarPipeline, LivePipelineConfig, SessionSummary};
pub use quality::{DataQualityGate, QualityConfig, QualityVerdict};
pub use session::{MarketHoursConfig, MarketHoursFilter};
