//! # Device Collaborators
//!
//! Narrow contracts for the hardware and services the lifecycle drives:
//! radio stack, sensors, positioning, power rail, sleep controller and clock.
//!
//! The lifecycle only decides *when* these are used. Implementations live
//! outside the core; [`sim`] provides host stand-ins.

pub mod sim;

use bytes::Bytes;

use crate::error::Result;
use crate::sampling::SampleSource;
use crate::settings::values::{AdrPolicy, DataRate, RelayConfig, TxPower};
use crate::wake::{WakePlan, WakeupCause};

/// One uplink handed to the radio stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uplink {
    pub port: u8,
    pub payload: Bytes,
    pub data_rate: DataRate,
    pub confirmed: bool,
    pub link: LinkParams,
}

/// Link settings the stack applies while sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkParams {
    pub tx_power: TxPower,
    /// Data rate and power adaptation.
    pub adr: AdrPolicy,
    pub relay: RelayConfig,
}

/// Outcome of a completed transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxReport {
    /// Time the uplink occupied the channel.
    pub airtime_ms: u32,
    /// A downlink arrived in one of the receive windows.
    pub downlink: bool,
}

/// Network stack: join, session and MAC are opaque here.
#[cfg_attr(test, mockall::automock)]
pub trait Radio: Send {
    /// A network session is active.
    fn is_activated(&self) -> bool;

    /// Attempt one join at `data_rate`. Bounded by the stack's own timeouts.
    fn join(&mut self, data_rate: DataRate) -> bool;

    /// Send an uplink and wait for the receive windows.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::NodeError::Radio`] on a radio-level failure.
    fn transmit(&mut self, uplink: &Uplink) -> Result<TxReport>;

    /// Forget the current session so the next cycle joins again.
    fn clear_session(&mut self);
}

/// Sensor channels that must report ready before an uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorChannel {
    /// Temperature, humidity and pressure.
    Climate,
    /// Ambient light and UV.
    Light,
    Co2,
    Particulate,
}

/// One set of environmental readings.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Measurements {
    pub battery_mv: u16,
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub pressure_hpa: f32,
    pub lux: f32,
    pub uv_index: f32,
    pub co2_ppm: f32,
    /// PM2.5 and PM10 in µg/m³, when the particulate sensor ran.
    pub particulate: Option<(f32, f32)>,
}

#[cfg_attr(test, mockall::automock)]
pub trait MeasurementProvider: Send {
    /// Channels this node must wait for.
    fn channels(&self) -> Vec<SensorChannel>;

    /// Power up sensors and start conversions.
    fn start(&mut self);

    fn is_ready(&self, channel: SensorChannel) -> bool;

    /// Collect the latest readings. Channels not ready report their last value.
    fn read(&mut self) -> Measurements;
}

/// Coarse positioning confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixQuality {
    NoFix,
    WeakFix,
    GoodFix,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub hdop: f32,
    pub satellites: u8,
}

#[cfg_attr(test, mockall::automock)]
pub trait PositionProvider: Send {
    fn power_on(&mut self);

    fn power_off(&mut self);

    /// Process pending receiver data and report the current fix quality.
    fn fix_quality(&mut self) -> FixQuality;

    /// Good fixes in a row, reset by any weaker fix.
    fn consecutive_good_fixes(&self) -> u32;

    fn position(&self) -> Option<Position>;
}

#[cfg_attr(test, mockall::automock)]
pub trait PowerMonitor: Send {
    fn battery_mv(&mut self) -> u16;

    /// Position of the power switch.
    fn switched_on(&self) -> bool;

    fn usb_connected(&self) -> bool;
}

#[cfg_attr(test, mockall::automock)]
pub trait SleepController: Send {
    /// Cause of the current wake, read once after boot.
    fn wakeup_cause(&self) -> WakeupCause;

    /// Arm the planned wake sources and power down.
    fn deep_sleep(&mut self, plan: &WakePlan);
}

/// Wall clock in UNIX seconds.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send {
    fn now(&self) -> i64;

    /// Block the calling loop for `ms` milliseconds.
    fn sleep_ms(&mut self, ms: u64);
}

/// Every collaborator the lifecycle drives.
pub struct Peripherals {
    pub radio: Box<dyn Radio>,
    pub sensors: Box<dyn MeasurementProvider>,
    pub position: Box<dyn PositionProvider>,
    pub power: Box<dyn PowerMonitor>,
    pub sleep: Box<dyn SleepController>,
    pub clock: Box<dyn Clock>,
    /// Sound level source, lent to the sampling thread while it runs.
    pub microphone: Option<Box<dyn SampleSource>>,
}

impl std::fmt::Debug for Peripherals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peripherals").finish_non_exhaustive()
    }
}
