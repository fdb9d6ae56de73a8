//! Portfolio accounting for palisade.
//!
//! [`LotBook`] matches sells against buys oldest-first and reports realized
//! PnL per closed slice; [`PortfolioTracker`] produces currency-normalized
//! valuation snapshots with FX staleness flags.

pub mod error;
pub mod lots;
pub mod tracker;

pub use error::{PortfolioError, PortfolioResult};
pub use lots::LotBook;
pub use tracker::{FxRate, FxRates, HoldingValue, PortfolioSnapshot, PortfolioTracker};
