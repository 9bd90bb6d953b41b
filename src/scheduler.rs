//! # Uplink Scheduler
//!
//! Pure computations deciding when the next uplink may happen.
//!
//! Times are UNIX seconds. Nothing here mutates state: every function takes
//! the current [`Schedule`] by reference and returns the value the caller
//! should apply.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::settings::values::{Operation, ScheduleMode};

/// Smallest spacing between two uplinks in seconds.
pub const OFFSET_FLOOR_S: u32 = 30;

/// Largest fixed spacing in seconds.
pub const OFFSET_CEILING_S: u32 = 65_535;

const SECONDS_PER_DAY: u64 = 86_400;

/// Uplink timing carried across sleep cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schedule {
    /// Earliest time the next uplink is permitted.
    pub next_activation: i64,
    /// Time of the most recent uplink.
    pub previous_activation: i64,
    /// Current spacing between uplinks in seconds.
    pub activation_offset_s: u32,
}

/// Outcome of a motion event against the current schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionDecision {
    /// The next uplink is already due; nothing to change.
    AlreadyDue,
    /// Bring the next uplink forward to `next`.
    Shortened { next: i64 },
    /// Leave the schedule alone.
    Unchanged,
}

/// Spacing to the next uplink.
///
/// # Arguments
///
/// * `mode` - Fixed period or duty-cycle budget
/// * `last_airtime_ms` - Airtime of the previous uplink, 0 if none yet
///
/// # Returns
///
/// * `u32` - Offset in seconds, never below [`OFFSET_FLOOR_S`]
///
/// # Examples
///
/// ```
/// use fieldnode::scheduler::next_offset;
/// use fieldnode::settings::values::{DutyCycleBudget, ScheduleMode};
///
/// // 1% of a day is 864 s; a 1 s uplink may repeat every 100 s.
/// let mode = ScheduleMode::DutyCycle(DutyCycleBudget::OnePercent);
/// assert_eq!(next_offset(mode, 1000), 100);
/// ```
pub fn next_offset(mode: ScheduleMode, last_airtime_ms: u32) -> u32 {
    let offset = match mode {
        ScheduleMode::Fixed { period_s } => period_s.clamp(OFFSET_FLOOR_S, OFFSET_CEILING_S),
        ScheduleMode::DutyCycle(budget) => {
            let daily_ms = u64::from(budget.daily_airtime_s().max(1)) * 1000;
            let offset = u64::from(last_airtime_ms) * SECONDS_PER_DAY / daily_ms;
            u32::try_from(offset)
                .unwrap_or(u32::MAX)
                .max(OFFSET_FLOOR_S)
        }
    };
    debug!(
        "Offset for {} after {} ms airtime: {} s",
        mode, last_airtime_ms, offset
    );
    offset
}

impl Schedule {
    /// Schedule for a node that has never transmitted: first uplink at `now`.
    pub fn cold_start(now: i64) -> Self {
        Self {
            next_activation: now,
            previous_activation: now,
            activation_offset_s: OFFSET_FLOOR_S,
        }
    }

    /// `true` once the next uplink time has been reached.
    pub fn is_due(&self, now: i64) -> bool {
        now >= self.next_activation
    }

    /// `true` within `window_s` seconds of the next uplink, or past it.
    pub fn is_near(&self, now: i64, window_s: u32) -> bool {
        now >= self.next_activation - i64::from(window_s)
    }

    /// End of the regular spacing window after the previous uplink.
    pub fn motion_boundary(&self) -> i64 {
        self.previous_activation + i64::from(self.activation_offset_s)
    }

    /// Apply a motion event at `now`.
    ///
    /// Past the next uplink nothing changes. Within the regular spacing
    /// window the next uplink is pulled in to the window's end. Later motion
    /// leaves the schedule untouched.
    pub fn motion_reschedule(&self, now: i64) -> MotionDecision {
        if self.is_due(now) {
            return MotionDecision::AlreadyDue;
        }
        let boundary = self.motion_boundary();
        if now > self.previous_activation && now <= boundary && boundary < self.next_activation {
            return MotionDecision::Shortened { next: boundary };
        }
        MotionDecision::Unchanged
    }

    /// Next uplink time for an immediate request.
    ///
    /// Pending uplinks are pulled to `now`. An uplink already overdue is
    /// backdated by `timeout_s` so any position wait ends at once, but never
    /// before the previous uplink.
    pub fn asap(&self, now: i64, timeout_s: u32) -> i64 {
        if self.next_activation > now {
            now
        } else {
            (now - i64::from(timeout_s)).max(self.previous_activation)
        }
    }

    /// Schedule after an uplink at `now` that used `last_airtime_ms`.
    ///
    /// # Arguments
    ///
    /// * `mode` - Fixed period or duty-cycle budget
    /// * `operation` - Stationary or mobile with back-off
    /// * `stationary_count` - Consecutive uplinks without motion, this one included
    pub fn after_uplink(
        &self,
        now: i64,
        last_airtime_ms: u32,
        mode: ScheduleMode,
        operation: Operation,
        stationary_count: u32,
    ) -> Schedule {
        let offset = next_offset(mode, last_airtime_ms);
        let spacing = match operation {
            Operation::Mobile {
                uplinks,
                heartbeat_s,
            } if stationary_count >= u32::from(uplinks) => heartbeat_s.max(offset),
            _ => offset,
        };
        let previous = now.max(self.previous_activation);
        Schedule {
            next_activation: previous + i64::from(spacing),
            previous_activation: previous,
            activation_offset_s: offset,
        }
    }

    /// Seconds until the next uplink, 0 when due.
    pub fn seconds_until_due(&self, now: i64) -> u64 {
        u64::try_from(self.next_activation - now).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::values::DutyCycleBudget;

    fn schedule(next: i64, previous: i64, offset: u32) -> Schedule {
        Schedule {
            next_activation: next,
            previous_activation: previous,
            activation_offset_s: offset,
        }
    }

    #[test]
    fn test_fixed_offset_clamped() {
        assert_eq!(next_offset(ScheduleMode::Fixed { period_s: 10 }, 0), 30);
        assert_eq!(next_offset(ScheduleMode::Fixed { period_s: 300 }, 5000), 300);
        assert_eq!(next_offset(ScheduleMode::Fixed { period_s: 70_000 }, 0), 65_535);
    }

    #[test]
    fn test_duty_cycle_offsets() {
        let one = ScheduleMode::DutyCycle(DutyCycleBudget::OnePercent);
        assert_eq!(next_offset(one, 1000), 100);
        assert_eq!(next_offset(one, 0), OFFSET_FLOOR_S);

        let fup = ScheduleMode::DutyCycle(DutyCycleBudget::FairUse);
        // 30 s/day: a 100 ms uplink may repeat every 288 s.
        assert_eq!(next_offset(fup, 100), 288);

        let tenth = ScheduleMode::DutyCycle(DutyCycleBudget::PointOnePercent);
        assert_eq!(next_offset(tenth, 1000), 1004);
    }

    #[test]
    fn test_offset_never_below_floor() {
        let modes = [
            ScheduleMode::Fixed { period_s: 10 },
            ScheduleMode::Fixed { period_s: 65_535 },
            ScheduleMode::DutyCycle(DutyCycleBudget::FairUse),
            ScheduleMode::DutyCycle(DutyCycleBudget::OnePercent),
            ScheduleMode::DutyCycle(DutyCycleBudget::DailySeconds(8_639)),
            ScheduleMode::DutyCycle(DutyCycleBudget::DailySeconds(1)),
        ];
        for mode in modes {
            for airtime in [0, 1, 10, 61, 1_000, 5_000, u32::MAX] {
                assert!(next_offset(mode, airtime) >= OFFSET_FLOOR_S, "{mode} {airtime}");
            }
        }
    }

    #[test]
    fn test_motion_past_next_is_already_due() {
        let s = schedule(1_000, 0, 100);
        assert_eq!(s.motion_reschedule(1_000), MotionDecision::AlreadyDue);
        assert_eq!(s.motion_reschedule(5_000), MotionDecision::AlreadyDue);
    }

    #[test]
    fn test_motion_within_window_shortens() {
        // Backed off to a 1000 s heartbeat with a 100 s regular spacing.
        let s = schedule(1_000, 0, 100);
        assert_eq!(s.motion_reschedule(1), MotionDecision::Shortened { next: 100 });
        assert_eq!(s.motion_reschedule(100), MotionDecision::Shortened { next: 100 });
    }

    #[test]
    fn test_motion_after_window_unchanged() {
        let s = schedule(1_000, 0, 100);
        assert_eq!(s.motion_reschedule(101), MotionDecision::Unchanged);
        assert_eq!(s.motion_reschedule(999), MotionDecision::Unchanged);
        // At or before the previous uplink the window has not opened.
        assert_eq!(s.motion_reschedule(0), MotionDecision::Unchanged);
    }

    #[test]
    fn test_motion_without_back_off_unchanged() {
        let s = schedule(100, 0, 100);
        assert_eq!(s.motion_reschedule(50), MotionDecision::Unchanged);
    }

    #[test]
    fn test_asap() {
        let pending = schedule(500, 100, 400);
        assert_eq!(pending.asap(200, 120), 200);

        let overdue = schedule(500, 100, 400);
        assert_eq!(overdue.asap(1_000, 120), 880);
        // Never earlier than the previous uplink.
        let just_sent = schedule(1_000, 990, 30);
        assert_eq!(just_sent.asap(1_000, 120), 990);
    }

    #[test]
    fn test_after_uplink_regular_spacing() {
        let s = Schedule::cold_start(0);
        let mode = ScheduleMode::Fixed { period_s: 60 };
        let op = Operation::Mobile {
            uplinks: 3,
            heartbeat_s: 3_600,
        };
        let next = s.after_uplink(10, 500, mode, op, 2);
        assert_eq!(next, schedule(70, 10, 60));
        assert!(next.next_activation >= next.previous_activation);
    }

    #[test]
    fn test_after_uplink_stationary_back_off() {
        let s = Schedule::cold_start(0);
        let mode = ScheduleMode::Fixed { period_s: 60 };
        let op = Operation::Mobile {
            uplinks: 3,
            heartbeat_s: 3_600,
        };
        let next = s.after_uplink(10, 500, mode, op, 3);
        assert_eq!(next, schedule(3_610, 10, 60));

        // A stationary node never backs off.
        let next = s.after_uplink(10, 500, mode, Operation::Stationary, 100);
        assert_eq!(next, schedule(70, 10, 60));
    }

    #[test]
    fn test_back_off_keeps_longer_duty_cycle_offset() {
        let s = Schedule::cold_start(0);
        let mode = ScheduleMode::DutyCycle(DutyCycleBudget::FairUse);
        let op = Operation::Mobile {
            uplinks: 1,
            heartbeat_s: 3_600,
        };
        // 30 s/day: 2 s of airtime needs 5760 s spacing, longer than the heartbeat.
        let next = s.after_uplink(0, 2_000, mode, op, 1);
        assert_eq!(next.next_activation, 5_760);
    }

    #[test]
    fn test_due_and_near() {
        let s = schedule(1_000, 0, 100);
        assert!(!s.is_due(999));
        assert!(s.is_due(1_000));
        assert!(s.is_near(970, 30));
        assert!(!s.is_near(969, 30));
        assert_eq!(s.seconds_until_due(400), 600);
        assert_eq!(s.seconds_until_due(2_000), 0);
    }
}
