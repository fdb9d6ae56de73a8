//! Capital-preservation safety state machines.
//!
//! - [`KillSwitch`]: a restart-durable halt flag, settable by any component
//!   and checked at the top of every bar iteration.
//! - [`PaperGuardrails`]: rate-limit / session-window / auto-stop checks
//!   that apply only when running in paper mode.

pub mod error;
pub mod guardrails;
pub mod kill_switch;

pub use error::{SafetyError, SafetyResult};
pub use guardrails::{GuardrailBreach, GuardrailConfig, PaperGuardrails};
pub use kill_switch::{KillSwitch, KillSwitchPaths};
