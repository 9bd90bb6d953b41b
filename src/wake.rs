//! # Wake Sources
//!
//! Decodes the hardware wake cause into a [`WakeEvent`] and builds the
//! [`WakePlan`] that arms the hardware before the next deep sleep.

use serde::{Deserialize, Serialize};

use crate::scheduler::Schedule;

/// GPIO of the action button.
pub const KEY_GPIO: u8 = 0;
/// GPIO of the power switch rail.
pub const POWER_GPIO: u8 = 4;
/// GPIO of the accelerometer motion interrupt.
pub const ACC_INT_GPIO: u8 = 5;

/// External pins that can wake the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WakePin {
    Key,
    Power,
    Motion,
}

impl WakePin {
    pub fn gpio(&self) -> u8 {
        match self {
            WakePin::Key => KEY_GPIO,
            WakePin::Power => POWER_GPIO,
            WakePin::Motion => ACC_INT_GPIO,
        }
    }

    pub fn from_gpio(gpio: u8) -> Option<Self> {
        match gpio {
            KEY_GPIO => Some(WakePin::Key),
            POWER_GPIO => Some(WakePin::Power),
            ACC_INT_GPIO => Some(WakePin::Motion),
            _ => None,
        }
    }

    /// Bit of this pin in an ext1 mask.
    pub fn mask(&self) -> u64 {
        1u64 << self.gpio()
    }
}

/// Wake cause as reported by the sleep controller after boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeupCause {
    /// Power-on or reset; nothing was retained.
    PowerOn,
    /// The single-pin (ext0) source fired.
    Ext0,
    /// The multi-pin (ext1) source fired; `status` holds the pins that were high.
    Ext1 { status: u64 },
    Timer,
    /// Any other source (touch, ULP, UART).
    Other,
}

/// Why the node is awake, consumed once by the lifecycle entry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeEvent {
    ColdBoot,
    TimerExpired,
    MotionPin,
    ButtonPin,
    PowerRailChanged,
}

/// GPIO number of the highest set bit, `None` for an empty mask.
pub fn highest_pin(status: u64) -> Option<u8> {
    (status != 0).then(|| (63 - status.leading_zeros()) as u8)
}

/// Classify a wake cause.
///
/// # Arguments
///
/// * `cause` - Hardware wake cause
/// * `armed_ext0` - Pin armed on ext0 before sleeping, from retained state
///
/// # Returns
///
/// * `WakeEvent` - Same inputs always give the same event. Unrecognized
///   ext1 pins and unknown causes resume as a timer wake.
pub fn classify(cause: WakeupCause, armed_ext0: Option<WakePin>) -> WakeEvent {
    match cause {
        WakeupCause::PowerOn => WakeEvent::ColdBoot,
        WakeupCause::Timer | WakeupCause::Other => WakeEvent::TimerExpired,
        WakeupCause::Ext0 => match armed_ext0 {
            Some(WakePin::Power) => WakeEvent::PowerRailChanged,
            Some(WakePin::Motion) => WakeEvent::MotionPin,
            Some(WakePin::Key) | None => WakeEvent::ButtonPin,
        },
        WakeupCause::Ext1 { status } => match highest_pin(status).and_then(WakePin::from_gpio) {
            Some(WakePin::Motion) => WakeEvent::MotionPin,
            Some(WakePin::Power) => WakeEvent::PowerRailChanged,
            Some(WakePin::Key) => WakeEvent::ButtonPin,
            None => WakeEvent::TimerExpired,
        },
    }
}

/// Inputs that decide how the hardware is armed.
#[derive(Debug, Clone, Copy)]
pub struct SleepContext {
    pub now: i64,
    pub schedule: Schedule,
    pub switched_on: bool,
    pub battery_low: bool,
    pub mobile: bool,
    pub motion_observed: bool,
    /// Seconds the timer fires ahead of the next uplink.
    pub wake_lead_s: u32,
}

/// Wake sources to arm before deep sleep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakePlan {
    /// Timer wake in seconds, `None` when the timer stays disarmed.
    pub timer_s: Option<u64>,
    /// Single pin woken on low level.
    pub ext0: WakePin,
    /// Pins woken on any high level.
    pub ext1: Vec<WakePin>,
}

impl WakePlan {
    pub fn build(ctx: &SleepContext) -> Self {
        let timer_s = (ctx.switched_on && !ctx.battery_low).then(|| {
            let lead = i64::from(ctx.wake_lead_s);
            u64::try_from(ctx.schedule.next_activation - ctx.now - lead).unwrap_or(0)
        });

        let ext0 = if ctx.switched_on {
            WakePin::Key
        } else {
            WakePin::Power
        };

        let mut ext1 = Vec::new();
        if ctx.switched_on {
            ext1.push(WakePin::Power);
            if ctx.mobile && !ctx.motion_observed && !ctx.battery_low {
                ext1.push(WakePin::Motion);
            }
        }

        Self {
            timer_s,
            ext0,
            ext1,
        }
    }

    pub fn ext1_mask(&self) -> u64 {
        self.ext1.iter().fold(0, |mask, pin| mask | pin.mask())
    }

    pub fn listens_for_motion(&self) -> bool {
        self.ext1.contains(&WakePin::Motion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SleepContext {
        SleepContext {
            now: 1_000,
            schedule: Schedule {
                next_activation: 1_100,
                previous_activation: 1_000,
                activation_offset_s: 100,
            },
            switched_on: true,
            battery_low: false,
            mobile: true,
            motion_observed: false,
            wake_lead_s: 15,
        }
    }

    #[test]
    fn test_highest_pin() {
        assert_eq!(highest_pin(0), None);
        assert_eq!(highest_pin(1), Some(0));
        assert_eq!(highest_pin(0b110000), Some(5));
        assert_eq!(highest_pin(1 << 63), Some(63));
    }

    #[test]
    fn test_classify_causes() {
        assert_eq!(classify(WakeupCause::PowerOn, None), WakeEvent::ColdBoot);
        assert_eq!(classify(WakeupCause::Timer, Some(WakePin::Key)), WakeEvent::TimerExpired);
        assert_eq!(classify(WakeupCause::Ext0, Some(WakePin::Key)), WakeEvent::ButtonPin);
        assert_eq!(
            classify(WakeupCause::Ext0, Some(WakePin::Power)),
            WakeEvent::PowerRailChanged
        );
        assert_eq!(
            classify(WakeupCause::Ext1 { status: WakePin::Motion.mask() }, None),
            WakeEvent::MotionPin
        );
        assert_eq!(
            classify(WakeupCause::Ext1 { status: WakePin::Power.mask() }, None),
            WakeEvent::PowerRailChanged
        );
    }

    #[test]
    fn test_classify_highest_pin_wins() {
        let both = WakePin::Power.mask() | WakePin::Motion.mask();
        assert_eq!(classify(WakeupCause::Ext1 { status: both }, None), WakeEvent::MotionPin);
    }

    #[test]
    fn test_classify_unknown_pin_resumes_as_timer() {
        assert_eq!(
            classify(WakeupCause::Ext1 { status: 1 << 12 }, None),
            WakeEvent::TimerExpired
        );
        assert_eq!(classify(WakeupCause::Ext1 { status: 0 }, None), WakeEvent::TimerExpired);
        assert_eq!(classify(WakeupCause::Other, None), WakeEvent::TimerExpired);
    }

    #[test]
    fn test_classify_is_deterministic() {
        for status in 0..64u64 {
            let cause = WakeupCause::Ext1 { status };
            assert_eq!(classify(cause, None), classify(cause, None));
        }
    }

    #[test]
    fn test_plan_switched_on_mobile() {
        let plan = WakePlan::build(&ctx());
        assert_eq!(plan.timer_s, Some(85));
        assert_eq!(plan.ext0, WakePin::Key);
        assert_eq!(plan.ext1, vec![WakePin::Power, WakePin::Motion]);
        assert_eq!(plan.ext1_mask(), (1 << POWER_GPIO) | (1 << ACC_INT_GPIO));
    }

    #[test]
    fn test_plan_motion_already_recorded() {
        let plan = WakePlan::build(&SleepContext {
            motion_observed: true,
            ..ctx()
        });
        assert!(!plan.listens_for_motion());
    }

    #[test]
    fn test_plan_switched_off() {
        let plan = WakePlan::build(&SleepContext {
            switched_on: false,
            ..ctx()
        });
        assert_eq!(plan.timer_s, None);
        assert_eq!(plan.ext0, WakePin::Power);
        assert!(plan.ext1.is_empty());
    }

    #[test]
    fn test_plan_low_battery() {
        let plan = WakePlan::build(&SleepContext {
            battery_low: true,
            ..ctx()
        });
        assert_eq!(plan.timer_s, None);
        assert_eq!(plan.ext1, vec![WakePin::Power]);
    }

    #[test]
    fn test_plan_overdue_timer_saturates() {
        let plan = WakePlan::build(&SleepContext {
            now: 2_000,
            ..ctx()
        });
        assert_eq!(plan.timer_s, Some(0));
    }
}
