//! Restart-durable kill switch.

use crate::error::{SafetyError, SafetyResult};
use chrono::{DateTime, Utc};
use palisade_core::RunMode;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Configured flag-file locations, one per runtime mode.
///
/// Paper, live, and test sessions must never share a store: a halt raised
/// during live trading must not be cleared by a test run, and vice versa.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchPaths {
    pub paper: PathBuf,
    pub live: PathBuf,
    pub test: PathBuf,
}

impl KillSwitchPaths {
    /// Default layout under a state directory.
    pub fn under(state_dir: &Path) -> Self {
        Self {
            paper: state_dir.join("kill_switch_paper.json"),
            live: state_dir.join("kill_switch_live.json"),
            test: state_dir.join("kill_switch_test.json"),
        }
    }

    fn for_mode(&self, mode: RunMode) -> &Path {
        match mode {
            RunMode::Paper => &self.paper,
            RunMode::Live => &self.live,
            RunMode::Test => &self.test,
        }
    }

    /// All three paths must be pairwise distinct.
    pub fn validate(&self) -> SafetyResult<()> {
        let paths = [&self.paper, &self.live, &self.test];
        for i in 0..paths.len() {
            for j in (i + 1)..paths.len() {
                if paths[i] == paths[j] {
                    return Err(SafetyError::StorePathConflict {
                        path: paths[i].display().to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Persisted flag state.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FlagFile {
    active: bool,
    reason: String,
    triggered_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Triggered {
    reason: String,
    triggered_at: DateTime<Utc>,
}

/// Durable halt flag keyed to the runtime's storage location.
///
/// Once triggered it stays triggered until explicitly cleared, including
/// across process restarts: opening the same store after a crash re-arms
/// the in-memory latch, so a restarted process cannot silently resume
/// trading after a critical halt. The first trigger's reason wins;
/// later triggers are ignored.
pub struct KillSwitch {
    path: PathBuf,
    state: Mutex<Option<Triggered>>,
}

impl KillSwitch {
    /// Open the store for `mode`, validating that the configured mode
    /// paths are distinct, and load any persisted halt.
    pub fn open(paths: &KillSwitchPaths, mode: RunMode) -> SafetyResult<Self> {
        paths.validate()?;
        let path = paths.for_mode(mode).to_path_buf();

        let state = match Self::load(&path)? {
            Some(flag) if flag.active => {
                warn!(
                    path = %path.display(),
                    reason = %flag.reason,
                    "kill switch store already active on open"
                );
                Some(Triggered {
                    reason: flag.reason,
                    triggered_at: flag.triggered_at,
                })
            }
            _ => None,
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn load(path: &Path) -> SafetyResult<Option<FlagFile>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Set the halt flag permanently for this store.
    ///
    /// The in-memory latch is set even if persisting the flag file fails;
    /// the failure is logged and the current process still halts.
    pub fn trigger(&self, reason: &str) {
        let mut state = self.state.lock();
        if let Some(existing) = state.as_ref() {
            warn!(
                new_reason = reason,
                original = %existing.reason,
                "kill switch already triggered; keeping original reason"
            );
            return;
        }

        let triggered = Triggered {
            reason: reason.to_string(),
            triggered_at: Utc::now(),
        };
        error!(reason, path = %self.path.display(), "KILL SWITCH TRIGGERED");

        if let Err(e) = self.persist(&triggered) {
            error!(?e, "failed to persist kill switch flag");
        }
        *state = Some(triggered);
    }

    fn persist(&self, triggered: &Triggered) -> SafetyResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let flag = FlagFile {
            active: true,
            reason: triggered.reason.clone(),
            triggered_at: triggered.triggered_at,
        };
        fs::write(&self.path, serde_json::to_string_pretty(&flag)?)?;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.state.lock().as_ref().map(|t| t.reason.clone())
    }

    /// Sentinel check called at the top of every bar iteration.
    pub fn check(&self) -> SafetyResult<()> {
        match self.state.lock().as_ref() {
            Some(triggered) => Err(SafetyError::KillSwitchActive {
                reason: triggered.reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Explicitly clear the halt, in memory and on disk.
    ///
    /// An operator action, never called from the pipelines.
    pub fn clear(&self) -> SafetyResult<()> {
        let mut state = self.state.lock();
        if let Some(previous) = state.take() {
            info!(previous_reason = %previous.reason, "kill switch cleared");
        }
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    pub fn store_path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn paths(dir: &TempDir) -> KillSwitchPaths {
        KillSwitchPaths::under(dir.path())
    }

    #[test]
    fn test_initially_inactive() {
        let dir = TempDir::new().unwrap();
        let ks = KillSwitch::open(&paths(&dir), RunMode::Test).unwrap();
        assert!(!ks.is_active());
        assert!(ks.check().is_ok());
        assert!(ks.reason().is_none());
    }

    #[test]
    fn test_trigger_latches_and_checks_fail() {
        let dir = TempDir::new().unwrap();
        let ks = KillSwitch::open(&paths(&dir), RunMode::Test).unwrap();

        ks.trigger("drawdown breach");
        assert!(ks.is_active());
        assert_eq!(ks.reason().as_deref(), Some("drawdown breach"));

        match ks.check() {
            Err(SafetyError::KillSwitchActive { reason }) => {
                assert_eq!(reason, "drawdown breach");
            }
            other => panic!("expected KillSwitchActive, got {other:?}"),
        }
    }

    #[test]
    fn test_first_reason_wins() {
        let dir = TempDir::new().unwrap();
        let ks = KillSwitch::open(&paths(&dir), RunMode::Test).unwrap();

        ks.trigger("first");
        ks.trigger("second");
        assert_eq!(ks.reason().as_deref(), Some("first"));
    }

    #[test]
    fn test_survives_reopen_from_same_store() {
        let dir = TempDir::new().unwrap();
        {
            let ks = KillSwitch::open(&paths(&dir), RunMode::Test).unwrap();
            ks.trigger("broker outage");
        }

        // Simulated restart: a fresh handle on the same store must come up
        // already halted.
        let ks = KillSwitch::open(&paths(&dir), RunMode::Test).unwrap();
        assert!(ks.is_active());
        assert_eq!(ks.reason().as_deref(), Some("broker outage"));
    }

    #[test]
    fn test_modes_are_isolated() {
        let dir = TempDir::new().unwrap();
        let paper = KillSwitch::open(&paths(&dir), RunMode::Paper).unwrap();
        paper.trigger("paper halt");

        let live = KillSwitch::open(&paths(&dir), RunMode::Live).unwrap();
        assert!(!live.is_active());
    }

    #[test]
    fn test_clear_resets_store() {
        let dir = TempDir::new().unwrap();
        let ks = KillSwitch::open(&paths(&dir), RunMode::Test).unwrap();
        ks.trigger("halt");
        ks.clear().unwrap();
        assert!(!ks.is_active());

        let reopened = KillSwitch::open(&paths(&dir), RunMode::Test).unwrap();
        assert!(!reopened.is_active());
    }

    #[test]
    fn test_conflicting_paths_rejected() {
        let dir = TempDir::new().unwrap();
        let mut conflicting = paths(&dir);
        conflicting.live = conflicting.paper.clone();

        let result = KillSwitch::open(&conflicting, RunMode::Paper);
        assert!(matches!(
            result,
            Err(SafetyError::StorePathConflict { .. })
        ));
    }
}
