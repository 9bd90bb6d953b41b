//! # Retained State
//!
//! The only state that survives deep sleep. It is written explicitly right
//! before the hardware is armed and read back right after wake; a cold boot
//! starts from [`RetainedState::default`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::scheduler::Schedule;
use crate::wake::WakePin;

/// State carried from one wake cycle to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetainedState {
    schedule: Schedule,
    /// Motion seen since the last uplink.
    pub motion_observed: bool,
    /// Uplinks in a row without motion.
    pub stationary_count: u32,
    /// Pin armed on ext0 for the current sleep.
    pub last_wake_pin: Option<WakePin>,
}

impl RetainedState {
    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    pub fn next_activation(&self) -> i64 {
        self.schedule.next_activation
    }

    /// Replace the schedule, keeping the next uplink no earlier than the previous one.
    pub fn apply_schedule(&mut self, schedule: Schedule) {
        self.schedule = Schedule {
            next_activation: schedule.next_activation.max(schedule.previous_activation),
            ..schedule
        };
    }

    /// Move the next uplink, never before the previous one.
    pub fn set_next_activation(&mut self, next: i64) {
        self.schedule.next_activation = next.max(self.schedule.previous_activation);
    }

    /// Close the stationary streak for an uplink and clear the motion flag.
    ///
    /// # Returns
    ///
    /// * `u32` - Consecutive stationary uplinks including this one
    pub fn close_uplink_cycle(&mut self) -> u32 {
        if self.motion_observed {
            self.stationary_count = 0;
        } else {
            self.stationary_count = self.stationary_count.saturating_add(1);
        }
        self.motion_observed = false;
        self.stationary_count
    }
}

/// Storage that keeps [`RetainedState`] across deep sleep.
#[cfg_attr(test, mockall::automock)]
pub trait RetainedMemory: Send {
    /// Read the state written before the last sleep. `None` if there is none.
    fn restore(&mut self) -> Result<Option<RetainedState>>;

    /// Write the state right before sleeping.
    fn persist(&mut self, state: &RetainedState) -> Result<()>;
}

/// Retained state kept in a small JSON file.
#[derive(Debug, Clone)]
pub struct RetainedFile {
    path: PathBuf,
}

impl RetainedFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl RetainedMemory for RetainedFile {
    fn restore(&mut self) -> Result<Option<RetainedState>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&contents) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                // Treated like lost retained memory.
                warn!("Discarding unreadable retained state {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    fn persist(&mut self, state: &RetainedState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Retained state written to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_is_zeroed() {
        let state = RetainedState::default();
        assert_eq!(state.next_activation(), 0);
        assert_eq!(state.schedule().previous_activation, 0);
        assert!(!state.motion_observed);
        assert_eq!(state.stationary_count, 0);
        assert_eq!(state.last_wake_pin, None);
    }

    #[test]
    fn test_next_never_before_previous() {
        let mut state = RetainedState::default();
        state.apply_schedule(Schedule {
            next_activation: 50,
            previous_activation: 100,
            activation_offset_s: 30,
        });
        assert_eq!(state.next_activation(), 100);

        state.set_next_activation(10);
        assert_eq!(state.next_activation(), 100);
        state.set_next_activation(400);
        assert_eq!(state.next_activation(), 400);
    }

    #[test]
    fn test_stationary_streak() {
        let mut state = RetainedState::default();
        assert_eq!(state.close_uplink_cycle(), 1);
        assert_eq!(state.close_uplink_cycle(), 2);
        state.motion_observed = true;
        assert_eq!(state.close_uplink_cycle(), 0);
        assert!(!state.motion_observed);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut memory = RetainedFile::new(dir.path().join("rtc/retained.json"));
        assert_eq!(memory.restore().unwrap(), None);

        let mut state = RetainedState::default();
        state.apply_schedule(Schedule {
            next_activation: 1_700_000_100,
            previous_activation: 1_700_000_000,
            activation_offset_s: 100,
        });
        state.motion_observed = true;
        state.last_wake_pin = Some(WakePin::Key);
        memory.persist(&state).unwrap();

        assert_eq!(memory.restore().unwrap(), Some(state));
    }

    #[test]
    fn test_corrupt_file_reads_as_lost() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("retained.json");
        fs::write(&path, "{not json").unwrap();
        let mut memory = RetainedFile::new(&path);
        assert_eq!(memory.restore().unwrap(), None);
    }
}
