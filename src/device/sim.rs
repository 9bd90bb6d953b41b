//! # Simulated Collaborators
//!
//! Deterministic host stand-ins for the radio, sensors, positioning, power
//! rail, sleep controller, clock and microphone.
//!
//! This module handles:
//! - Virtual time shared between the clock and the host sleep loop
//! - LoRa time-on-air for simulated uplinks
//! - Scripted join failures, sensor readiness and fix acquisition

use std::cell::Cell;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::{
    Clock, FixQuality, MeasurementProvider, Measurements, Peripherals, Position,
    PositionProvider, PowerMonitor, Radio, SensorChannel, SleepController, TxReport, Uplink,
};
use crate::config::SimulationConfig;
use crate::error::{NodeError, Result};
use crate::sampling::SampleSource;
use crate::settings::values::{AdrPolicy, DataRate, RelayConfig};
use crate::wake::{WakePlan, WakeupCause};

/// Frame header, MAC header and MIC added to every application payload.
pub const LORAWAN_OVERHEAD: usize = 13;

const PREAMBLE_SYMBOLS: f64 = 8.0;
const FSK_BITRATE_KBPS: f64 = 50.0;

/// Time on air of one uplink in milliseconds, rounded up.
///
/// # Arguments
///
/// * `data_rate` - EU868 data rate: DR0..=DR5 are SF12..=SF7 at 125 kHz,
///   DR6 is SF7 at 250 kHz, DR7 is 50 kbps FSK
/// * `payload_len` - Application payload in bytes
pub fn airtime_ms(data_rate: DataRate, payload_len: usize) -> u32 {
    let phy_len = (payload_len + LORAWAN_OVERHEAD) as f64;
    let ms = match data_rate.index() {
        7 => (5.0 + 3.0 + 1.0 + phy_len + 2.0) * 8.0 / FSK_BITRATE_KBPS,
        dr => {
            let (sf, bw_khz) = if dr == 6 {
                (7.0, 250.0)
            } else {
                (f64::from(12 - dr), 125.0)
            };
            let symbol_ms = 2f64.powf(sf) / bw_khz;
            let low_rate_opt = if sf >= 11.0 && bw_khz <= 125.0 { 1.0 } else { 0.0 };
            // Explicit header, CRC on, coding rate 4/5.
            let numerator = 8.0 * phy_len - 4.0 * sf + 28.0 + 16.0;
            let denominator = 4.0 * (sf - 2.0 * low_rate_opt);
            let payload_symbols = 8.0 + ((numerator / denominator).ceil() * 5.0).max(0.0);
            (PREAMBLE_SYMBOLS + 4.25 + payload_symbols) * symbol_ms
        }
    };
    ms.ceil() as u32
}

/// Virtual wall clock, shared by cloning.
#[derive(Debug, Clone)]
pub struct SimClock {
    now_ms: Arc<AtomicI64>,
    time_scale: u32,
}

impl SimClock {
    /// Clock starting at `start` UNIX seconds. A blocking wait of `n` ms
    /// takes `n / time_scale` real milliseconds.
    pub fn new(start: i64, time_scale: u32) -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(start.saturating_mul(1000))),
            time_scale: time_scale.max(1),
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        let ms = i64::try_from(ms).unwrap_or(i64::MAX);
        self.now_ms.fetch_add(ms, Ordering::AcqRel);
    }

    pub fn advance_s(&self, s: u64) {
        self.advance_ms(s.saturating_mul(1000));
    }

    pub fn time_scale(&self) -> u32 {
        self.time_scale
    }
}

impl Clock for SimClock {
    fn now(&self) -> i64 {
        self.now_ms.load(Ordering::Acquire).div_euclid(1000)
    }

    fn sleep_ms(&mut self, ms: u64) {
        let real = ms / u64::from(self.time_scale);
        if real > 0 {
            thread::sleep(Duration::from_millis(real));
        }
        self.advance_ms(ms);
    }
}

/// Network stack that accepts a join after a number of failures.
#[derive(Debug)]
pub struct SimRadio {
    failures_left: u32,
    activated: bool,
    frame_counter: u32,
}

impl SimRadio {
    pub fn new(join_failures: u32) -> Self {
        Self {
            failures_left: join_failures,
            activated: false,
            frame_counter: 0,
        }
    }

    pub fn frame_counter(&self) -> u32 {
        self.frame_counter
    }

    /// Data rate and power of the next frame. Explicit ADR lists are
    /// stepped through one entry per frame.
    fn link_for(&self, uplink: &Uplink) -> (DataRate, i8) {
        let step = self.frame_counter as usize;
        match &uplink.link.adr {
            AdrPolicy::DataRates(rates) if !rates.is_empty() => {
                let rate = DataRate::new(rates[step % rates.len()]).unwrap_or(uplink.data_rate);
                (rate, uplink.link.tx_power.dbm())
            }
            AdrPolicy::PowerLevels(levels) if !levels.is_empty() => {
                (uplink.data_rate, levels[step % levels.len()])
            }
            _ => (uplink.data_rate, uplink.link.tx_power.dbm()),
        }
    }
}

impl Radio for SimRadio {
    fn is_activated(&self) -> bool {
        self.activated
    }

    fn join(&mut self, data_rate: DataRate) -> bool {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            debug!("Simulated join at {} rejected", data_rate);
            return false;
        }
        self.activated = true;
        self.frame_counter = 0;
        true
    }

    fn transmit(&mut self, uplink: &Uplink) -> Result<TxReport> {
        if !self.activated {
            return Err(NodeError::Radio("no active session".to_string()));
        }
        let (data_rate, dbm) = self.link_for(uplink);
        self.frame_counter = self.frame_counter.wrapping_add(1);
        let airtime_ms = airtime_ms(data_rate, uplink.payload.len());
        debug!(
            "Simulated uplink #{} on port {}: {} bytes at DR{} {} dBm{}, {} ms",
            self.frame_counter,
            uplink.port,
            uplink.payload.len(),
            data_rate,
            dbm,
            if uplink.link.relay == RelayConfig::Off { "" } else { " via relay" },
            airtime_ms
        );
        Ok(TxReport {
            airtime_ms,
            downlink: uplink.confirmed,
        })
    }

    fn clear_session(&mut self) {
        self.activated = false;
    }
}

/// Sensors that report ready after a number of polls per channel.
#[derive(Debug)]
pub struct SimSensors {
    channels: Vec<SensorChannel>,
    ready_after: u32,
    polls: Cell<u32>,
    battery_mv: u16,
    cycle: u32,
}

impl SimSensors {
    pub fn new(ready_after: u32, battery_mv: u16) -> Self {
        Self {
            channels: vec![SensorChannel::Climate, SensorChannel::Light, SensorChannel::Co2],
            ready_after,
            polls: Cell::new(0),
            battery_mv,
            cycle: 0,
        }
    }
}

impl MeasurementProvider for SimSensors {
    fn channels(&self) -> Vec<SensorChannel> {
        self.channels.clone()
    }

    fn start(&mut self) {
        self.polls.set(0);
        self.cycle = self.cycle.wrapping_add(1);
    }

    fn is_ready(&self, _channel: SensorChannel) -> bool {
        let polls = self.polls.get().saturating_add(1);
        self.polls.set(polls);
        polls > self.ready_after
    }

    fn read(&mut self) -> Measurements {
        let step = (self.cycle % 8) as f32;
        Measurements {
            battery_mv: self.battery_mv,
            temperature_c: 18.5 + step * 0.25,
            humidity_pct: 55.0 - step,
            pressure_hpa: 1012.5,
            lux: 300.0 + step * 40.0,
            uv_index: 2.0,
            co2_ppm: 415.0 + step * 5.0,
            particulate: None,
        }
    }
}

/// Receiver that reaches good fixes after a number of polls.
#[derive(Debug)]
pub struct SimPosition {
    good_after: u32,
    powered: bool,
    polls: u32,
    consecutive: u32,
}

impl SimPosition {
    /// `good_after` of 0 never leaves weak fixes.
    pub fn new(good_after: u32) -> Self {
        Self {
            good_after,
            powered: false,
            polls: 0,
            consecutive: 0,
        }
    }
}

impl PositionProvider for SimPosition {
    fn power_on(&mut self) {
        if !self.powered {
            self.powered = true;
            self.polls = 0;
            self.consecutive = 0;
        }
    }

    fn power_off(&mut self) {
        self.powered = false;
        self.consecutive = 0;
    }

    fn fix_quality(&mut self) -> FixQuality {
        if !self.powered {
            return FixQuality::NoFix;
        }
        self.polls = self.polls.saturating_add(1);
        let quality = if self.good_after > 0 && self.polls >= self.good_after {
            FixQuality::GoodFix
        } else if self.polls * 2 >= self.good_after {
            FixQuality::WeakFix
        } else {
            FixQuality::NoFix
        };
        if quality == FixQuality::GoodFix {
            self.consecutive = self.consecutive.saturating_add(1);
        } else {
            self.consecutive = 0;
        }
        quality
    }

    fn consecutive_good_fixes(&self) -> u32 {
        self.consecutive
    }

    fn position(&self) -> Option<Position> {
        (self.consecutive > 0).then_some(Position {
            latitude: 52.520_008,
            longitude: 13.404_954,
            hdop: 1.1,
            satellites: 9,
        })
    }
}

/// Fixed power rail readings.
#[derive(Debug, Clone)]
pub struct SimPower {
    pub battery_mv: u16,
    pub switched_on: bool,
    pub usb_connected: bool,
}

impl PowerMonitor for SimPower {
    fn battery_mv(&mut self) -> u16 {
        self.battery_mv
    }

    fn switched_on(&self) -> bool {
        self.switched_on
    }

    fn usb_connected(&self) -> bool {
        self.usb_connected
    }
}

#[derive(Debug)]
struct SleepLog {
    cause: WakeupCause,
    last_plan: Option<WakePlan>,
}

/// Sleep controller whose wake cause is set by the host loop.
#[derive(Debug, Clone)]
pub struct SimSleep {
    inner: Arc<Mutex<SleepLog>>,
}

impl Default for SimSleep {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SleepLog {
                cause: WakeupCause::PowerOn,
                last_plan: None,
            })),
        }
    }
}

impl SimSleep {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cause reported by the next [`SleepController::wakeup_cause`].
    pub fn set_cause(&self, cause: WakeupCause) {
        if let Ok(mut log) = self.inner.lock() {
            log.cause = cause;
        }
    }

    /// Plan armed by the most recent deep sleep.
    pub fn last_plan(&self) -> Option<WakePlan> {
        self.inner.lock().ok().and_then(|log| log.last_plan.clone())
    }
}

impl SleepController for SimSleep {
    fn wakeup_cause(&self) -> WakeupCause {
        self.inner
            .lock()
            .map(|log| log.cause)
            .unwrap_or(WakeupCause::PowerOn)
    }

    fn deep_sleep(&mut self, plan: &WakePlan) {
        info!(
            "Deep sleep: timer {:?} s, ext0 {:?}, ext1 mask {:#x}",
            plan.timer_s,
            plan.ext0,
            plan.ext1_mask()
        );
        if let Ok(mut log) = self.inner.lock() {
            log.last_plan = Some(plan.clone());
        }
    }
}

/// Sound levels at a steady block rate from a small linear congruential generator.
#[derive(Debug)]
pub struct SimMicrophone {
    state: u32,
    block: Duration,
    last: Instant,
}

impl SimMicrophone {
    pub fn new(seed: u32) -> Self {
        Self {
            state: seed,
            block: Duration::from_millis(125),
            last: Instant::now(),
        }
    }
}

impl SampleSource for SimMicrophone {
    fn next_level(&mut self) -> Option<f32> {
        if self.last.elapsed() < self.block {
            return None;
        }
        self.last = Instant::now();
        self.state = self.state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let jitter = (self.state >> 16) as f32 / 65_535.0;
        Some(38.0 + jitter * 30.0)
    }
}

/// Wire every simulated collaborator from the host configuration.
pub fn peripherals(config: &SimulationConfig, clock: SimClock, sleep: SimSleep) -> Peripherals {
    let microphone: Option<Box<dyn SampleSource>> = config
        .microphone
        .then(|| Box::new(SimMicrophone::new(0x5eed)) as Box<dyn SampleSource>);
    Peripherals {
        radio: Box::new(SimRadio::new(config.join_failures)),
        sensors: Box::new(SimSensors::new(config.sensor_ready_polls, config.battery_mv)),
        position: Box::new(SimPosition::new(config.good_fix_after_polls)),
        power: Box::new(SimPower {
            battery_mv: config.battery_mv,
            switched_on: config.switched_on,
            usb_connected: config.usb_connected,
        }),
        sleep: Box::new(sleep),
        clock: Box::new(clock),
        microphone,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::LinkParams;
    use crate::settings::values::TxPower;
    use bytes::Bytes;

    fn dr(index: u8) -> DataRate {
        DataRate::new(index).unwrap()
    }

    fn uplink(len: usize) -> Uplink {
        Uplink {
            port: 1,
            payload: Bytes::from(vec![0u8; len]),
            data_rate: dr(5),
            confirmed: false,
            link: LinkParams {
                tx_power: TxPower::parse("16").unwrap(),
                adr: AdrPolicy::Off,
                relay: RelayConfig::Off,
            },
        }
    }

    #[test]
    fn test_airtime_reference_values() {
        // SF7BW125, 23 byte PHY payload: 48 payload symbols of 1.024 ms.
        assert_eq!(airtime_ms(dr(5), 10), 62);
        // SF12BW125 with low data rate optimisation.
        assert_eq!(airtime_ms(dr(0), 14), 1647);
    }

    #[test]
    fn test_airtime_grows_with_spreading_factor() {
        let times: Vec<u32> = (0..=5).map(|i| airtime_ms(dr(i), 14)).collect();
        assert!(times.windows(2).all(|w| w[0] > w[1]));
        assert!(airtime_ms(dr(6), 14) < airtime_ms(dr(5), 14));
        assert!(airtime_ms(dr(7), 14) < airtime_ms(dr(6), 14));
    }

    #[test]
    fn test_clock_advances_virtual_time() {
        let mut clock = SimClock::new(1_000, 3_600);
        let shared = clock.clone();
        clock.sleep_ms(2_500);
        assert_eq!(shared.now(), 1_002);
        shared.advance_s(60);
        assert_eq!(clock.now(), 1_062);
    }

    #[test]
    fn test_radio_join_after_failures() {
        let mut radio = SimRadio::new(2);
        assert!(!radio.join(dr(5)));
        assert!(!radio.join(dr(0)));
        assert!(!radio.is_activated());
        assert!(radio.join(dr(0)));
        assert!(radio.is_activated());

        radio.clear_session();
        assert!(!radio.is_activated());
    }

    #[test]
    fn test_radio_transmit_requires_session() {
        let mut radio = SimRadio::new(0);
        assert!(matches!(radio.transmit(&uplink(14)), Err(NodeError::Radio(_))));

        radio.join(dr(5));
        let report = radio.transmit(&uplink(14)).unwrap();
        assert_eq!(report.airtime_ms, airtime_ms(dr(5), 14));
        assert!(!report.downlink);
        assert_eq!(radio.frame_counter(), 1);
    }

    #[test]
    fn test_radio_steps_through_adr_rates() {
        let mut radio = SimRadio::new(0);
        radio.join(dr(5));
        let mut up = uplink(14);
        up.link.adr = AdrPolicy::DataRates(vec![0, 5]);

        let first = radio.transmit(&up).unwrap();
        let second = radio.transmit(&up).unwrap();
        assert_eq!(first.airtime_ms, airtime_ms(dr(0), 14));
        assert_eq!(second.airtime_ms, airtime_ms(dr(5), 14));
    }

    #[test]
    fn test_sensors_ready_after_polls() {
        let mut sensors = SimSensors::new(2, 3700);
        sensors.start();
        assert!(!sensors.is_ready(SensorChannel::Climate));
        assert!(!sensors.is_ready(SensorChannel::Climate));
        assert!(sensors.is_ready(SensorChannel::Climate));
        assert_eq!(sensors.read().battery_mv, 3700);

        sensors.start();
        assert!(!sensors.is_ready(SensorChannel::Light));
    }

    #[test]
    fn test_position_fix_progression() {
        let mut gnss = SimPosition::new(4);
        assert_eq!(gnss.fix_quality(), FixQuality::NoFix);

        gnss.power_on();
        assert_eq!(gnss.fix_quality(), FixQuality::NoFix);
        assert_eq!(gnss.fix_quality(), FixQuality::WeakFix);
        assert_eq!(gnss.fix_quality(), FixQuality::WeakFix);
        assert_eq!(gnss.fix_quality(), FixQuality::GoodFix);
        assert_eq!(gnss.fix_quality(), FixQuality::GoodFix);
        assert_eq!(gnss.consecutive_good_fixes(), 2);
        assert!(gnss.position().is_some());

        gnss.power_off();
        assert_eq!(gnss.consecutive_good_fixes(), 0);
        assert!(gnss.position().is_none());
    }

    #[test]
    fn test_position_never_good() {
        let mut gnss = SimPosition::new(0);
        gnss.power_on();
        for _ in 0..50 {
            assert_ne!(gnss.fix_quality(), FixQuality::GoodFix);
        }
    }

    #[test]
    fn test_sleep_records_plan() {
        let sleep = SimSleep::new();
        assert_eq!(sleep.wakeup_cause(), WakeupCause::PowerOn);

        let plan = WakePlan {
            timer_s: Some(300),
            ext0: crate::wake::WakePin::Key,
            ext1: vec![crate::wake::WakePin::Power],
        };
        let mut controller = sleep.clone();
        controller.deep_sleep(&plan);
        sleep.set_cause(WakeupCause::Timer);

        assert_eq!(sleep.last_plan(), Some(plan));
        assert_eq!(controller.wakeup_cause(), WakeupCause::Timer);
    }

    #[test]
    fn test_microphone_paces_blocks() {
        let mut mic = SimMicrophone::new(1);
        assert_eq!(mic.next_level(), None);
        thread::sleep(Duration::from_millis(130));
        let level = mic.next_level().unwrap();
        assert!((38.0..=68.0).contains(&level));
        assert_eq!(mic.next_level(), None);
    }
}
