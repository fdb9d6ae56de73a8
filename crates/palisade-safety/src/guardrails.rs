//! Paper-trading guardrails.
//!
//! Five independent checks, each individually disable-able, that only
//! apply when running in paper mode:
//!
//! 1. Daily order limit (count since UTC midnight)
//! 2. Reject rate (count in the trailing hour)
//! 3. Per-symbol cooldown after a reject
//! 4. Session window in a configured timezone
//! 5. Auto-stop on a run of consecutive rejects
//!
//! Time-windowed lists are lazily pruned on each check. Checks take `now`
//! as a parameter so tests never sleep.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::{debug, warn};

/// Guardrail configuration. A zero limit disables the corresponding check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Maximum orders per UTC day. 0 disables. Exactly-at-limit passes.
    #[serde(default = "default_max_orders_per_day")]
    pub max_orders_per_day: u32,
    /// Maximum rejects in the trailing hour. 0 disables. At-limit passes.
    #[serde(default = "default_max_rejects_per_hour")]
    pub max_rejects_per_hour: u32,
    /// Per-symbol cooldown after a reject, in seconds. 0 disables.
    #[serde(default = "default_reject_cooldown_secs")]
    pub reject_cooldown_secs: u64,
    /// Whether the session-window check is enabled.
    #[serde(default = "default_session_enabled")]
    pub session_enabled: bool,
    /// Session start hour, inclusive.
    #[serde(default = "default_session_start_hour")]
    pub session_start_hour: u32,
    /// Session end hour, exclusive.
    #[serde(default = "default_session_end_hour")]
    pub session_end_hour: u32,
    /// IANA timezone for the session window. Unresolvable names fall back
    /// to UTC.
    #[serde(default = "default_session_timezone")]
    pub session_timezone: String,
    /// Crypto symbols skip the session-window check entirely.
    #[serde(default = "default_crypto_bypass_session")]
    pub crypto_bypass_session: bool,
    /// Maximum consecutive rejects before auto-stop. 0 disables.
    #[serde(default = "default_max_consecutive_rejects")]
    pub max_consecutive_rejects: u32,
    /// A reject more than this many minutes after the previous one restarts
    /// the consecutive counter at 1.
    #[serde(default = "default_consecutive_reject_reset_minutes")]
    pub consecutive_reject_reset_minutes: i64,
}

fn default_max_orders_per_day() -> u32 {
    50
}

fn default_max_rejects_per_hour() -> u32 {
    10
}

fn default_reject_cooldown_secs() -> u64 {
    300
}

fn default_session_enabled() -> bool {
    true
}

fn default_session_start_hour() -> u32 {
    9
}

fn default_session_end_hour() -> u32 {
    16
}

fn default_session_timezone() -> String {
    "America/New_York".to_string()
}

fn default_crypto_bypass_session() -> bool {
    true
}

fn default_max_consecutive_rejects() -> u32 {
    5
}

fn default_consecutive_reject_reset_minutes() -> i64 {
    30
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            max_orders_per_day: default_max_orders_per_day(),
            max_rejects_per_hour: default_max_rejects_per_hour(),
            reject_cooldown_secs: default_reject_cooldown_secs(),
            session_enabled: default_session_enabled(),
            session_start_hour: default_session_start_hour(),
            session_end_hour: default_session_end_hour(),
            session_timezone: default_session_timezone(),
            crypto_bypass_session: default_crypto_bypass_session(),
            max_consecutive_rejects: default_max_consecutive_rejects(),
            consecutive_reject_reset_minutes: default_consecutive_reject_reset_minutes(),
        }
    }
}

/// A single failing guardrail check.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardrailBreach {
    DailyOrderLimit { count: u32, limit: u32 },
    RejectRate { count: u32, limit: u32 },
    SymbolCooldown { until: DateTime<Utc> },
    OutsideSession { hour: u32, start: u32, end: u32 },
    AutoStop { count: u32, limit: u32 },
}

impl fmt::Display for GuardrailBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DailyOrderLimit { count, limit } => {
                write!(f, "daily order limit: {count} orders > {limit}")
            }
            Self::RejectRate { count, limit } => {
                write!(f, "reject rate: {count} rejects in last hour > {limit}")
            }
            Self::SymbolCooldown { until } => {
                write!(f, "symbol in cooldown until {until}")
            }
            Self::OutsideSession { hour, start, end } => {
                write!(f, "hour {hour} outside session [{start}, {end})")
            }
            Self::AutoStop { count, limit } => {
                write!(f, "auto-stop: {count} consecutive rejects > {limit}")
            }
        }
    }
}

#[derive(Debug, Default)]
struct GuardrailState {
    orders_today: VecDeque<DateTime<Utc>>,
    rejects_last_hour: VecDeque<DateTime<Utc>>,
    cooldowns: HashMap<String, DateTime<Utc>>,
    consecutive_rejects: u32,
    last_reject_at: Option<DateTime<Utc>>,
}

/// Paper-trading guardrail state machine.
///
/// Shared behind `Arc` between the risk manager (which reads via
/// [`all_checks`](Self::all_checks)) and the pipelines (which record
/// orders, rejects, and fills).
pub struct PaperGuardrails {
    config: GuardrailConfig,
    tz: Tz,
    state: Mutex<GuardrailState>,
}

impl PaperGuardrails {
    pub fn new(config: GuardrailConfig) -> Self {
        let tz = match config.session_timezone.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                warn!(
                    timezone = %config.session_timezone,
                    "unresolvable session timezone; falling back to UTC"
                );
                Tz::UTC
            }
        };
        Self {
            config,
            tz,
            state: Mutex::new(GuardrailState::default()),
        }
    }

    /// Run every enabled check; returns the union of failing reasons.
    /// Empty means pass.
    pub fn all_checks(
        &self,
        symbol: &str,
        is_crypto: bool,
        now: DateTime<Utc>,
    ) -> Vec<GuardrailBreach> {
        let mut state = self.state.lock();
        Self::prune(&mut state, now);

        let mut breaches = Vec::new();

        // 1. Daily order limit: exactly-at-limit passes.
        if self.config.max_orders_per_day > 0 {
            let count = state.orders_today.len() as u32;
            if count > self.config.max_orders_per_day {
                breaches.push(GuardrailBreach::DailyOrderLimit {
                    count,
                    limit: self.config.max_orders_per_day,
                });
            }
        }

        // 2. Reject rate over the trailing hour: same boundary semantics.
        if self.config.max_rejects_per_hour > 0 {
            let count = state.rejects_last_hour.len() as u32;
            if count > self.config.max_rejects_per_hour {
                breaches.push(GuardrailBreach::RejectRate {
                    count,
                    limit: self.config.max_rejects_per_hour,
                });
            }
        }

        // 3. Per-symbol cooldown.
        if self.config.reject_cooldown_secs > 0 {
            if let Some(&until) = state.cooldowns.get(symbol) {
                if now < until {
                    breaches.push(GuardrailBreach::SymbolCooldown { until });
                }
            }
        }

        // 4. Session window, start inclusive / end exclusive.
        if self.config.session_enabled && !(is_crypto && self.config.crypto_bypass_session) {
            let hour = now.with_timezone(&self.tz).hour();
            let (start, end) = (self.config.session_start_hour, self.config.session_end_hour);
            if !(hour >= start && hour < end) {
                breaches.push(GuardrailBreach::OutsideSession { hour, start, end });
            }
        }

        // 5. Auto-stop on consecutive rejects.
        if self.config.max_consecutive_rejects > 0
            && state.consecutive_rejects > self.config.max_consecutive_rejects
        {
            breaches.push(GuardrailBreach::AutoStop {
                count: state.consecutive_rejects,
                limit: self.config.max_consecutive_rejects,
            });
        }

        breaches
    }

    /// Record a submitted order.
    pub fn record_order(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.orders_today.push_back(now);
    }

    /// Record a rejected order attempt for `symbol`.
    ///
    /// Starts the symbol's cooldown and advances the consecutive-reject
    /// counter: within the reset window it increments, otherwise it
    /// restarts at 1.
    pub fn record_reject(&self, symbol: &str, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.rejects_last_hour.push_back(now);

        if self.config.reject_cooldown_secs > 0 {
            let until = now + Duration::seconds(self.config.reject_cooldown_secs as i64);
            state.cooldowns.insert(symbol.to_string(), until);
        }

        let within_window = state.last_reject_at.is_some_and(|last| {
            now - last <= Duration::minutes(self.config.consecutive_reject_reset_minutes)
        });
        state.consecutive_rejects = if within_window {
            state.consecutive_rejects + 1
        } else {
            1
        };
        state.last_reject_at = Some(now);

        debug!(
            symbol,
            consecutive = state.consecutive_rejects,
            "guardrail reject recorded"
        );
    }

    /// Record a successful fill; resets the consecutive-reject counter.
    pub fn record_fill(&self) {
        let mut state = self.state.lock();
        state.consecutive_rejects = 0;
        state.last_reject_at = None;
    }

    /// Current consecutive-reject count (for telemetry and tests).
    pub fn consecutive_rejects(&self) -> u32 {
        self.state.lock().consecutive_rejects
    }

    fn prune(state: &mut GuardrailState, now: DateTime<Utc>) {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .unwrap_or(now);
        while state.orders_today.front().is_some_and(|&t| t < midnight) {
            state.orders_today.pop_front();
        }

        let hour_ago = now - Duration::hours(1);
        while state
            .rejects_last_hour
            .front()
            .is_some_and(|&t| t < hour_ago)
        {
            state.rejects_last_hour.pop_front();
        }

        state.cooldowns.retain(|_, &mut until| until > now);
    }
}
