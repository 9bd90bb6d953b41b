//! Lifecycle states and cycle outcomes.

use std::fmt;

use crate::wake::WakePlan;

/// Operational phase of the node. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    /// Configuration invalid or join failed; waits for a command.
    Idle,
    Joining,
    AcquiringMeasurements,
    AwaitingPositionFix,
    Transmitting,
    PersistingAndSleeping,
}

impl DeviceState {
    /// States in which the node is doing uplink work.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DeviceState::Joining
                | DeviceState::AcquiringMeasurements
                | DeviceState::AwaitingPositionFix
                | DeviceState::Transmitting
        )
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::Idle => "Idle",
            DeviceState::Joining => "Joining",
            DeviceState::AcquiringMeasurements => "AcquiringMeasurements",
            DeviceState::AwaitingPositionFix => "AwaitingPositionFix",
            DeviceState::Transmitting => "Transmitting",
            DeviceState::PersistingAndSleeping => "PersistingAndSleeping",
        };
        f.write_str(name)
    }
}

/// Condition that ends the cycle without any radio or sensor activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerDownReason {
    /// Power switch off and no USB supply.
    SwitchedOff,
    LowBattery,
    /// The settings backing store could not be opened.
    StoreUnavailable,
}

impl fmt::Display for PowerDownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerDownReason::SwitchedOff => f.write_str("switched off"),
            PowerDownReason::LowBattery => f.write_str("battery low"),
            PowerDownReason::StoreUnavailable => f.write_str("settings store unavailable"),
        }
    }
}

/// How a wake cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Retained state written and the hardware armed with `plan`.
    Slept(WakePlan),
    /// Sleep is disabled; run the next cycle after `resume_in_s`.
    Awake { resume_in_s: u64 },
    /// Waiting in [`DeviceState::Idle`] for a command.
    Idle,
    /// Powered down on a fatal condition.
    PoweredDown {
        reason: PowerDownReason,
        plan: WakePlan,
    },
}
