//! # Lifecycle State Machine
//!
//! Drives one wake cycle: classify the wake, decide whether to do any work,
//! then join, measure, wait for a position, transmit, persist and sleep.
//!
//! This module handles:
//! - Wake entry and the sleep-again decision
//! - Join retries with a fallback data rate
//! - Per-step battery supervision and interrupt flags
//! - Command execution between steps
//! - Retained state update and hardware arming before sleep

use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::commands::Command;
use super::state::{CycleOutcome, DeviceState, PowerDownReason};
use crate::config::Config;
use crate::device::{FixQuality, Measurements, Peripherals, Position, Uplink};
use crate::error::ErrorKind;
use crate::payload;
use crate::retained::{RetainedMemory, RetainedState};
use crate::sampling::{AcousticSampler, SoundLevels};
use crate::scheduler::{MotionDecision, Schedule};
use crate::settings::values::DataRate;
use crate::settings::{ConfigStore, NodeSettings, RADIO_NAMESPACE};
use crate::signals::InterruptSignals;
use crate::telemetry::{UplinkLog, UplinkRecord};
use crate::wake::{classify, SleepContext, WakeEvent, WakePlan, WakeupCause};

/// Real-time poll of the sampler completion flag.
const SAMPLER_POLL: Duration = Duration::from_millis(1);

/// Console lines in, replies out.
#[derive(Debug)]
pub struct CommandPort {
    pub lines: mpsc::Receiver<String>,
    pub replies: mpsc::Sender<String>,
}

#[derive(Debug, Clone, Copy)]
struct TxRecord {
    time: i64,
    airtime_ms: u32,
}

/// The node core: owns settings, retained state and every collaborator.
pub struct Node {
    config: Config,
    store: ConfigStore,
    settings: Option<NodeSettings>,
    memory: Box<dyn RetainedMemory>,
    retained: RetainedState,
    hw: Peripherals,
    signals: InterruptSignals,
    uplink_log: Option<UplinkLog>,
    commands: Option<CommandPort>,

    state: DeviceState,
    cycle_done: bool,
    polls: u32,
    sensors_started: bool,
    position_powered: bool,
    sampler: Option<AcousticSampler>,
    readings: Option<Measurements>,
    fix: Option<Position>,
    last_tx: Option<TxRecord>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("state", &self.state)
            .field("retained", &self.retained)
            .finish_non_exhaustive()
    }
}

impl Node {
    pub fn new(
        config: Config,
        store: ConfigStore,
        memory: Box<dyn RetainedMemory>,
        hw: Peripherals,
        signals: InterruptSignals,
    ) -> Self {
        let uplink_log = config
            .telemetry
            .enabled
            .then(|| UplinkLog::new(&config.telemetry.log_dir, config.telemetry.max_files_to_keep));
        Self {
            config,
            store,
            settings: None,
            memory,
            retained: RetainedState::default(),
            hw,
            signals,
            uplink_log,
            commands: None,
            state: DeviceState::Idle,
            cycle_done: false,
            polls: 0,
            sensors_started: false,
            position_powered: false,
            sampler: None,
            readings: None,
            fix: None,
            last_tx: None,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn retained(&self) -> &RetainedState {
        &self.retained
    }

    pub fn settings(&self) -> Option<&NodeSettings> {
        self.settings.as_ref()
    }

    /// Flags for the motion and button handlers.
    pub fn interrupt_signals(&self) -> InterruptSignals {
        self.signals.clone()
    }

    /// Attach the console. Lines are handled between lifecycle steps.
    pub fn set_commands(&mut self, port: CommandPort) {
        self.commands = Some(port);
    }

    /// Detach the console, e.g. to read it while the node sleeps.
    pub fn take_commands(&mut self) -> Option<CommandPort> {
        self.commands.take()
    }

    /// The lifecycle has work left before the cycle ends.
    pub fn has_pending_work(&self) -> bool {
        !self.cycle_done && self.state != DeviceState::Idle
    }

    fn now(&self) -> i64 {
        self.hw.clock.now()
    }

    fn battery_low(&mut self) -> bool {
        let mv = self.hw.power.battery_mv();
        let low = mv < self.config.power.low_battery_mv;
        if low {
            warn!(
                "Battery at {} mV, below {} mV",
                mv, self.config.power.low_battery_mv
            );
        }
        low
    }

    fn enter(&mut self, next: DeviceState) {
        if next != self.state {
            info!("State: {} -> {}", self.state, next);
        }
        self.state = next;
        self.cycle_done = false;

        match next {
            DeviceState::AcquiringMeasurements => {
                self.polls = 0;
                self.readings = None;
                self.sensors_started = false;
            }
            DeviceState::AwaitingPositionFix => {
                self.fix = None;
                self.hw.position.power_on();
                self.position_powered = true;
            }
            _ => {}
        }
    }

    fn refresh_settings(&mut self) {
        match NodeSettings::from_store(&mut self.store) {
            Ok(settings) => self.settings = Some(settings),
            Err(e) => {
                warn!("Settings unusable: {}", e);
                self.settings = None;
            }
        }
    }

    fn start_sampling(&mut self) {
        if self.sampler.is_some() {
            return;
        }
        if let Some(source) = self.hw.microphone.take() {
            match AcousticSampler::start(source) {
                Ok(sampler) => self.sampler = Some(sampler),
                Err(e) => warn!("Acoustic sampling unavailable: {}", e),
            }
        }
    }

    /// Stop the sampler and wait for its completion flag.
    fn finish_sampling(&mut self) -> Option<SoundLevels> {
        let sampler = self.sampler.take()?;
        sampler.request_stop();
        while !sampler.is_complete() && !sampler.has_exited() {
            thread::sleep(SAMPLER_POLL);
        }
        let (levels, source) = sampler.finish()?;
        self.hw.microphone = Some(source);
        levels
    }

    fn power_off_position(&mut self) {
        if std::mem::take(&mut self.position_powered) {
            self.hw.position.power_off();
        }
    }

    /// Run one full wake cycle from the hardware wake cause.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        match self.wake() {
            Some(outcome) => outcome,
            None => self.run(),
        }
    }

    /// Start a new cycle without a hardware wake, as when sleep is disabled.
    pub fn resume(&mut self) -> CycleOutcome {
        if self.battery_low() {
            return self.power_down(PowerDownReason::LowBattery);
        }
        let now = self.now();
        if !self
            .retained
            .schedule()
            .is_near(now, self.config.schedule.near_window_s)
        {
            self.enter(DeviceState::PersistingAndSleeping);
            return self.persist_and_sleep();
        }
        self.start_activity();
        self.run()
    }

    /// Step until the cycle ends or the node waits in [`DeviceState::Idle`].
    pub fn run(&mut self) -> CycleOutcome {
        loop {
            if let Some(outcome) = self.step() {
                return outcome;
            }
        }
    }

    /// Advance the lifecycle by one step.
    ///
    /// # Returns
    ///
    /// * `Some(outcome)` - The cycle ended or the node is idle
    /// * `None` - More steps are needed
    pub fn step(&mut self) -> Option<CycleOutcome> {
        self.poll_commands();
        self.take_signals();

        if self.battery_low() {
            return Some(self.power_down(PowerDownReason::LowBattery));
        }

        match self.state {
            DeviceState::Idle => Some(CycleOutcome::Idle),
            DeviceState::Joining => {
                self.join();
                None
            }
            DeviceState::AcquiringMeasurements => {
                self.acquire();
                None
            }
            DeviceState::AwaitingPositionFix => {
                self.await_position();
                None
            }
            DeviceState::Transmitting => {
                self.transmit();
                None
            }
            DeviceState::PersistingAndSleeping => Some(self.persist_and_sleep()),
        }
    }

    /// Boot entry: restore, classify and decide whether to do any work.
    fn wake(&mut self) -> Option<CycleOutcome> {
        self.cycle_done = false;
        let cause = self.hw.sleep.wakeup_cause();
        let restored = match self.memory.restore() {
            Ok(state) => state,
            Err(e) => {
                warn!("Retained state unreadable: {}", e);
                None
            }
        };

        let event = match (cause, restored) {
            (WakeupCause::PowerOn, _) | (_, None) => {
                self.retained = RetainedState::default();
                WakeEvent::ColdBoot
            }
            (cause, Some(state)) => {
                self.retained = state;
                classify(cause, state.last_wake_pin)
            }
        };
        info!("Wake: {:?} ({:?})", event, cause);

        if !self.hw.power.switched_on() && !self.hw.power.usb_connected() {
            return Some(self.power_down(PowerDownReason::SwitchedOff));
        }
        if self.battery_low() {
            return Some(self.power_down(PowerDownReason::LowBattery));
        }
        if let Err(e) = self.store.load() {
            error!("Cannot load settings: {}", e);
            return Some(self.power_down(PowerDownReason::StoreUnavailable));
        }
        self.refresh_settings();

        let now = self.now();
        self.apply_wake_event(event, now);

        if self.settings.is_none() {
            self.enter(DeviceState::Idle);
            return None;
        }

        let schedule = self.retained.schedule();
        if !schedule.is_near(now, self.config.schedule.near_window_s) {
            debug!(
                "Next uplink in {} s, nothing to do",
                schedule.seconds_until_due(now)
            );
            self.enter(DeviceState::PersistingAndSleeping);
            return Some(self.persist_and_sleep());
        }

        self.start_activity();
        None
    }

    fn apply_wake_event(&mut self, event: WakeEvent, now: i64) {
        match event {
            WakeEvent::ColdBoot => self.retained.apply_schedule(Schedule::cold_start(now)),
            WakeEvent::TimerExpired => {}
            WakeEvent::MotionPin => {
                self.retained.motion_observed = true;
                if self.is_mobile() {
                    self.apply_motion_rule(now);
                }
            }
            WakeEvent::ButtonPin => self.uplink_asap(now),
            WakeEvent::PowerRailChanged => {
                if self.retained.next_activation() < now {
                    let next = now + i64::from(self.config.schedule.power_on_delay_s);
                    self.retained.set_next_activation(next);
                }
            }
        }
    }

    fn is_mobile(&self) -> bool {
        self.settings
            .as_ref()
            .map_or(false, |s| s.operation.is_mobile())
    }

    fn apply_motion_rule(&mut self, now: i64) {
        match self.retained.schedule().motion_reschedule(now) {
            MotionDecision::Shortened { next } => {
                debug!("Motion: uplink moved to {}", next);
                self.retained.set_next_activation(next);
            }
            MotionDecision::AlreadyDue => debug!("Motion: uplink already due"),
            MotionDecision::Unchanged => debug!("Motion: schedule unchanged"),
        }
    }

    fn uplink_asap(&mut self, now: i64) {
        let timeout = self.settings.as_ref().map_or(0, |s| s.position_timeout_s);
        let next = self.retained.schedule().asap(now, timeout);
        self.retained.set_next_activation(next);
    }

    fn start_activity(&mut self) {
        let complete = self
            .settings
            .as_ref()
            .map_or(false, |s| s.credentials_complete());
        if !complete {
            warn!("Network credentials incomplete");
            self.enter(DeviceState::Idle);
        } else if self.hw.radio.is_activated() {
            self.begin_acquisition();
        } else {
            self.enter(DeviceState::Joining);
        }
    }

    /// Measure for an uplink that is near, otherwise sleep until it is.
    fn begin_acquisition(&mut self) {
        let now = self.now();
        let schedule = self.retained.schedule();
        if schedule.is_near(now, self.config.schedule.near_window_s) {
            self.enter(DeviceState::AcquiringMeasurements);
        } else {
            info!(
                "Next uplink in {} s, sleeping until then",
                schedule.seconds_until_due(now)
            );
            self.enter(DeviceState::PersistingAndSleeping);
        }
    }

    fn take_signals(&mut self) {
        if self.signals.motion.take() && !self.retained.motion_observed {
            self.retained.motion_observed = true;
            if self.is_mobile() {
                let now = self.now();
                self.apply_motion_rule(now);
            }
        }
        if self.signals.button.take() && self.state == DeviceState::Idle {
            info!("Button pressed, retrying");
            let now = self.now();
            self.uplink_asap(now);
            self.enter(DeviceState::Joining);
        }
    }

    fn join(&mut self) {
        let configured = match self.settings.as_ref() {
            Some(settings) if settings.credentials_complete() => settings.data_rate,
            _ => {
                warn!("Cannot join without complete credentials");
                self.enter(DeviceState::Idle);
                return;
            }
        };
        let fallback =
            DataRate::new(self.config.join.fallback_data_rate).unwrap_or(DataRate::MOST_ROBUST);

        let mut rates = vec![configured];
        if fallback != configured {
            rates.push(fallback);
        }

        for rate in rates {
            for attempt in 1..=self.config.join.attempts_per_rate {
                info!("Joining at {} (attempt {})", rate, attempt);
                if self.hw.radio.join(rate) {
                    info!("Joined at {}", rate);
                    self.begin_acquisition();
                    return;
                }
                warn!("Join at {} failed", rate);
            }
        }

        warn!("Join failed at every data rate");
        self.enter(DeviceState::Idle);
    }

    fn acquire(&mut self) {
        if !self.sensors_started {
            // Sensors and sampler stay off until the uplink is due.
            let now = self.now();
            let schedule = self.retained.schedule();
            if !schedule.is_near(now, self.config.schedule.near_window_s) {
                self.enter(DeviceState::PersistingAndSleeping);
                return;
            }
            if !schedule.is_due(now) {
                self.hw.clock.sleep_ms(self.config.acquisition.poll_interval_ms);
                return;
            }
            self.hw.sensors.start();
            self.start_sampling();
            self.sensors_started = true;
        }

        let channels = self.hw.sensors.channels();
        let ready = channels.iter().all(|ch| self.hw.sensors.is_ready(*ch));
        if !ready && self.polls < self.config.acquisition.max_polls {
            self.polls += 1;
            self.hw.clock.sleep_ms(self.config.acquisition.poll_interval_ms);
            return;
        }
        if !ready {
            warn!("Sensors not ready after {} polls, reading anyway", self.polls);
        }

        self.readings = Some(self.hw.sensors.read());
        let wants_position = self
            .settings
            .as_ref()
            .map_or(false, |s| s.position_enabled);
        if wants_position {
            self.enter(DeviceState::AwaitingPositionFix);
        } else {
            self.enter(DeviceState::Transmitting);
        }
    }

    fn await_position(&mut self) {
        let timeout = self.settings.as_ref().map_or(0, |s| s.position_timeout_s);
        let deadline = self.retained.next_activation() + i64::from(timeout);

        let quality = self.hw.position.fix_quality();
        let good = self.hw.position.consecutive_good_fixes();
        if quality == FixQuality::GoodFix && good >= self.config.acquisition.required_good_fixes {
            self.fix = self.hw.position.position();
            info!("Position fix after {} good readings", good);
            self.enter(DeviceState::Transmitting);
            return;
        }

        if self.now() >= deadline {
            info!("No qualifying fix before timeout, sending without position");
            self.enter(DeviceState::Transmitting);
            return;
        }
        self.hw.clock.sleep_ms(self.config.acquisition.poll_interval_ms);
    }

    fn transmit(&mut self) {
        let now = self.now();
        let Some(settings) = self.settings.clone() else {
            self.enter(DeviceState::Idle);
            return;
        };

        let sound = self.finish_sampling();
        self.power_off_position();
        let readings = self.readings.take().unwrap_or_default();
        let (port, frame) = payload::encode(&readings, sound, self.fix.take());
        let uplink = Uplink {
            port,
            payload: frame,
            data_rate: settings.data_rate,
            confirmed: settings.confirmed,
            link: settings.link_params(),
        };

        let airtime_ms = match self.hw.radio.transmit(&uplink) {
            Ok(report) => {
                info!(
                    "Uplink on port {} sent, {} bytes, {} ms airtime{}",
                    port,
                    uplink.payload.len(),
                    report.airtime_ms,
                    if report.downlink { ", downlink received" } else { "" }
                );
                if let Some(log) = self.uplink_log.as_mut() {
                    let record = UplinkRecord {
                        time: now,
                        utc_offset_min: settings.utc_offset_min(),
                        dev_eui: settings.dev_eui,
                        port,
                        payload: &uplink.payload,
                    };
                    if let Err(e) = log.append(&record) {
                        warn!("Uplink log write failed: {}", e);
                    }
                }
                report.airtime_ms
            }
            Err(e) => {
                warn!("Uplink failed: {}", e);
                0
            }
        };

        self.last_tx = Some(TxRecord {
            time: now,
            airtime_ms,
        });
        self.enter(DeviceState::PersistingAndSleeping);
    }

    fn sleep_plan(&mut self, now: i64, battery_low: bool) -> WakePlan {
        let ctx = SleepContext {
            now,
            schedule: self.retained.schedule(),
            switched_on: self.hw.power.switched_on(),
            battery_low,
            mobile: self.is_mobile(),
            motion_observed: self.retained.motion_observed,
            wake_lead_s: self.config.schedule.wake_lead_s,
        };
        WakePlan::build(&ctx)
    }

    fn persist(&mut self) {
        if let Err(e) = self.memory.persist(&self.retained) {
            error!("Cannot persist retained state: {}", e);
        }
    }

    fn persist_and_sleep(&mut self) -> CycleOutcome {
        self.finish_sampling();
        self.power_off_position();

        if let Some(tx) = self.last_tx.take() {
            if let Some(settings) = self.settings.as_ref() {
                let (mode, operation) = (settings.schedule, settings.operation);
                let count = self.retained.close_uplink_cycle();
                let schedule = self.retained.schedule().after_uplink(
                    tx.time,
                    tx.airtime_ms,
                    mode,
                    operation,
                    count,
                );
                self.retained.apply_schedule(schedule);
                info!(
                    "Next uplink at {} ({} s), {} stationary",
                    schedule.next_activation,
                    schedule.next_activation - tx.time,
                    count
                );
            }
        }

        let now = self.now();
        let battery_low = self.battery_low();
        let plan = self.sleep_plan(now, battery_low);
        self.retained.last_wake_pin = Some(plan.ext0);
        self.persist();
        self.cycle_done = true;

        let sleep_enabled = self.settings.as_ref().map_or(true, |s| s.sleep_enabled);
        if sleep_enabled {
            self.hw.sleep.deep_sleep(&plan);
            CycleOutcome::Slept(plan)
        } else {
            let resume_in_s = self
                .retained
                .schedule()
                .seconds_until_due(now)
                .saturating_sub(u64::from(self.config.schedule.wake_lead_s));
            debug!("Sleep disabled, resuming in {} s", resume_in_s);
            CycleOutcome::Awake { resume_in_s }
        }
    }

    fn power_down(&mut self, reason: PowerDownReason) -> CycleOutcome {
        error!("Powering down: {}", reason);
        self.finish_sampling();
        self.power_off_position();
        self.last_tx = None;

        let now = self.now();
        let plan = self.sleep_plan(now, reason == PowerDownReason::LowBattery);
        self.retained.last_wake_pin = Some(plan.ext0);
        self.persist();

        self.state = DeviceState::PersistingAndSleeping;
        self.cycle_done = true;
        self.hw.sleep.deep_sleep(&plan);
        CycleOutcome::PoweredDown { reason, plan }
    }

    fn poll_commands(&mut self) {
        let Some(mut port) = self.commands.take() else {
            return;
        };
        while let Ok(line) = port.lines.try_recv() {
            let reply = self.handle_command(&line);
            if port.replies.try_send(reply).is_err() {
                warn!("Console reply dropped");
            }
        }
        self.commands = Some(port);
    }

    /// Execute one console line.
    ///
    /// # Returns
    ///
    /// * `String` - Reply text: a query result, the configuration listing,
    ///   or the description of the resulting [`ErrorKind`]
    pub fn handle_command(&mut self, line: &str) -> String {
        let command = match Command::parse(line, self.store.registry()) {
            Ok(command) => command,
            Err(kind) => {
                warn!("Rejected command '{}': {}", line.trim(), kind);
                return kind.description().to_string();
            }
        };

        if command.mutates() && self.state == DeviceState::Transmitting {
            warn!("Command '{}' rejected during uplink", line.trim());
            return ErrorKind::BusyError.description().to_string();
        }

        let kind = match command {
            Command::Query(key) => {
                let value = self.store.get(&key).unwrap_or_default();
                return format!("{}={}", key, value);
            }
            Command::PrintAll => return self.store.print_all(),
            Command::Set { key, value } => {
                let kind = self.store.set(&key, &value);
                if kind.is_ok() {
                    self.refresh_settings();
                } else {
                    warn!("Setting {}='{}' rejected: {}", key, value, kind);
                }
                kind
            }
            Command::Load => match self.store.load() {
                Ok(()) => {
                    self.refresh_settings();
                    ErrorKind::NoError
                }
                Err(e) => {
                    error!("Reload failed: {}", e);
                    ErrorKind::BusyError
                }
            },
            Command::Join => {
                self.hw.radio.clear_session();
                self.enter(DeviceState::Joining);
                ErrorKind::NoError
            }
            Command::WipeConfig => match self.store.reset_to_defaults_and_save() {
                Ok(written) => {
                    info!("Settings reset to defaults ({} written)", written);
                    self.refresh_settings();
                    self.hw.radio.clear_session();
                    self.enter(DeviceState::Joining);
                    ErrorKind::NoError
                }
                Err(e) => {
                    error!("Settings reset failed: {}", e);
                    ErrorKind::BusyError
                }
            },
            Command::WipeSession => match self.store.erase_namespace(RADIO_NAMESPACE) {
                Ok(()) => {
                    self.hw.radio.clear_session();
                    self.enter(DeviceState::Joining);
                    ErrorKind::NoError
                }
                Err(e) => {
                    error!("Session wipe failed: {}", e);
                    ErrorKind::BusyError
                }
            },
            Command::Uplink => {
                let now = self.now();
                self.uplink_asap(now);
                if !self.state.is_active() {
                    self.start_activity();
                }
                ErrorKind::NoError
            }
            Command::Sleep => {
                self.enter(DeviceState::PersistingAndSleeping);
                ErrorKind::NoError
            }
        };
        kind.description().to_string()
    }
}
