//! Broker capability interface, call resilience, and the paper venue.
//!
//! Concrete venue adapters live outside this workspace; they implement
//! [`Broker`]. Every call the pipelines make goes through
//! [`resilience::call_with_retry`], which retries transients, escalates
//! persistent failures to the kill switch, and audits every attempt.

pub mod error;
pub mod paper;
pub mod resilience;
pub mod traits;

pub use error::{BrokerError, BrokerResult};
pub use paper::{PaperBroker, PaperBrokerConfig};
pub use resilience::{call_with_retry, RetryPolicy, RetryState};
pub use traits::Broker;
