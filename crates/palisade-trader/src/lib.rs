//! Palisade trading runner.
//!
//! Wires the risk-gated pipeline together for two session types:
//! deterministic backtest replay over CSV bar history, and a paper
//! session that drives the live pipeline against the in-memory paper
//! venue. Live venue adapters are linked in from outside this workspace.

pub mod app;
pub mod config;
pub mod error;
pub mod strategy;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use strategy::SmaCrossStrategy;
