//! Process-scoped run state shared by the CLI and the watch loop.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::time::Duration;

use crate::config::SyncConfig;
use crate::error::{Error, Result};

/// Shortest allowed gap between automatic runs.
pub const MIN_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Explicitly requested by the user.
    Manual,
    /// Fired by the periodic timer.
    Automatic,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Manual => "manual",
            Trigger::Automatic => "automatic",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks whether a run is in flight and which configuration the periodic
/// timer was armed with.
#[derive(Default)]
pub struct Session {
    running: Cell<bool>,
    snapshot: RefCell<Option<SyncConfig>>,
}

/// Marks a run as in progress until dropped.
pub struct RunGuard<'a> {
    running: &'a Cell<bool>,
    trigger: Trigger,
}

impl RunGuard<'_> {
    pub fn trigger(&self) -> Trigger {
        self.trigger
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.set(false);
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Claim the run slot.
    ///
    /// While another run holds it, a manual trigger is refused with
    /// [`Error::RunInProgress`] and an automatic one is dropped (`Ok(None)`).
    pub fn begin(&self, trigger: Trigger) -> Result<Option<RunGuard<'_>>> {
        if self.running.get() {
            return match trigger {
                Trigger::Manual => Err(Error::RunInProgress),
                Trigger::Automatic => {
                    log::debug!("Skipping automatic sync: a run is already in progress");
                    Ok(None)
                }
            };
        }
        self.running.set(true);
        Ok(Some(RunGuard {
            running: &self.running,
            trigger,
        }))
    }

    /// Record the latest configuration. Returns true when the periodic timer
    /// has to be (re)armed: on the first snapshot or when the interval moved.
    pub fn observe_config(&self, config: &SyncConfig) -> bool {
        let mut snapshot = self.snapshot.borrow_mut();
        let rearm = match snapshot.as_ref() {
            None => true,
            Some(previous) => interval_for(previous) != interval_for(config),
        };
        if rearm {
            log::info!("Sync interval set to {} minutes", interval_for(config).as_secs() / 60);
        }
        *snapshot = Some(config.clone());
        rearm
    }

    pub fn snapshot(&self) -> Option<SyncConfig> {
        self.snapshot.borrow().clone()
    }
}

/// Interval for the periodic timer, never below [`MIN_INTERVAL`].
pub fn interval_for(config: &SyncConfig) -> Duration {
    config.interval().max(MIN_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_trigger_refused_while_running() {
        let session = Session::new();
        let guard = session.begin(Trigger::Manual).unwrap();
        assert!(guard.is_some());
        assert!(session.is_running());
        assert!(matches!(
            session.begin(Trigger::Manual),
            Err(Error::RunInProgress)
        ));
    }

    #[test]
    fn test_automatic_trigger_ignored_while_running() {
        let session = Session::new();
        let _guard = session.begin(Trigger::Automatic).unwrap().unwrap();
        assert!(session.begin(Trigger::Automatic).unwrap().is_none());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let session = Session::new();
        {
            let guard = session.begin(Trigger::Manual).unwrap().unwrap();
            assert_eq!(guard.trigger(), Trigger::Manual);
        }
        assert!(!session.is_running());
        assert!(session.begin(Trigger::Automatic).unwrap().is_some());
    }

    #[test]
    fn test_rearm_only_when_interval_changes() {
        let session = Session::new();
        let mut config = SyncConfig::default();
        assert!(session.observe_config(&config));
        assert!(!session.observe_config(&config));

        config.page_prefix = "Elsewhere".into();
        assert!(!session.observe_config(&config));
        assert_eq!(session.snapshot().unwrap().page_prefix, "Elsewhere");

        config.sync_interval_minutes = 30;
        assert!(session.observe_config(&config));
    }

    #[test]
    fn test_interval_floor() {
        let config = SyncConfig {
            sync_interval_minutes: 0,
            ..Default::default()
        };
        assert_eq!(interval_for(&config), MIN_INTERVAL);
        let config = SyncConfig {
            sync_interval_minutes: 5,
            ..Default::default()
        };
        assert_eq!(interval_for(&config), Duration::from_secs(300));
    }
}
