//! # Configuration Module
//!
//! Handles loading and validating the host configuration from TOML files.
//!
//! This is the configuration of the process running the node core: file
//! locations, power thresholds, timing margins, the command console and the
//! simulated collaborators. Device settings edited over the command protocol
//! live in [`crate::settings::ConfigStore`] instead.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{NodeError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub power: PowerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub join: JoinConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Persistent file locations
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Namespaced settings file backing the configuration store.
    #[serde(default = "default_settings_path")]
    pub settings_path: String,

    /// File standing in for retained memory.
    #[serde(default = "default_retained_path")]
    pub retained_path: String,
}

/// Power supervision
#[derive(Debug, Deserialize, Clone)]
pub struct PowerConfig {
    /// Below this battery voltage the node powers down without activity.
    #[serde(default = "default_low_battery_mv")]
    pub low_battery_mv: u16,
}

/// Timing margins around the uplink schedule
#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    /// The wake timer fires this many seconds before the uplink.
    #[serde(default = "default_wake_lead_s")]
    pub wake_lead_s: u32,

    /// A wake this close to the uplink proceeds with activity.
    #[serde(default = "default_near_window_s")]
    pub near_window_s: u32,

    /// Delay applied to an overdue uplink when the power switch is turned on.
    #[serde(default = "default_power_on_delay_s")]
    pub power_on_delay_s: u32,
}

/// Sensor and position polling
#[derive(Debug, Deserialize, Clone)]
pub struct AcquisitionConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consecutive good fixes that make a position qualify.
    #[serde(default = "default_required_good_fixes")]
    pub required_good_fixes: u32,

    /// Readiness polls before sensors are read regardless.
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

/// Network join retries
#[derive(Debug, Deserialize, Clone)]
pub struct JoinConfig {
    /// Data rate tried after the configured one fails.
    #[serde(default = "default_fallback_data_rate")]
    pub fallback_data_rate: u8,

    #[serde(default = "default_attempts_per_rate")]
    pub attempts_per_rate: u8,
}

/// Uplink log configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,
}

/// Command console
#[derive(Debug, Deserialize, Clone)]
pub struct ConsoleConfig {
    /// Serial device for commands, empty reads stdin.
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Stand-in collaborators for running on a host
#[derive(Debug, Deserialize, Clone)]
pub struct SimulationConfig {
    #[serde(default = "default_sim_battery_mv")]
    pub battery_mv: u16,

    #[serde(default = "default_sim_switched_on")]
    pub switched_on: bool,

    #[serde(default)]
    pub usb_connected: bool,

    /// Simulated seconds per real second.
    #[serde(default = "default_time_scale")]
    pub time_scale: u32,

    /// Join attempts that fail before the network accepts the node.
    #[serde(default)]
    pub join_failures: u32,

    #[serde(default = "default_sensor_ready_polls")]
    pub sensor_ready_polls: u32,

    /// Position polls before fixes turn good, 0 = never.
    #[serde(default = "default_good_fix_after_polls")]
    pub good_fix_after_polls: u32,

    /// Simulated seconds between motion pulses, 0 = no motion.
    #[serde(default)]
    pub motion_interval_s: u64,

    #[serde(default = "default_microphone")]
    pub microphone: bool,
}

// Default value functions
fn default_settings_path() -> String { "./data/settings.toml".to_string() }
fn default_retained_path() -> String { "./data/retained.json".to_string() }

fn default_low_battery_mv() -> u16 { 2750 }

fn default_wake_lead_s() -> u32 { 15 }
fn default_near_window_s() -> u32 { 30 }
fn default_power_on_delay_s() -> u32 { 15 }

fn default_poll_interval_ms() -> u64 { 100 }
fn default_required_good_fixes() -> u32 { 5 }
fn default_max_polls() -> u32 { 600 }

fn default_fallback_data_rate() -> u8 { 0 }
fn default_attempts_per_rate() -> u8 { 1 }

fn default_telemetry_enabled() -> bool { true }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_files_to_keep() -> usize { 10 }

fn default_baud_rate() -> u32 { 115200 }

fn default_sim_battery_mv() -> u16 { 3900 }
fn default_sim_switched_on() -> bool { true }
fn default_time_scale() -> u32 { 60 }
fn default_sensor_ready_polls() -> u32 { 3 }
fn default_good_fix_after_polls() -> u32 { 20 }
fn default_microphone() -> bool { true }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            settings_path: default_settings_path(),
            retained_path: default_retained_path(),
        }
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            low_battery_mv: default_low_battery_mv(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            wake_lead_s: default_wake_lead_s(),
            near_window_s: default_near_window_s(),
            power_on_delay_s: default_power_on_delay_s(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            required_good_fixes: default_required_good_fixes(),
            max_polls: default_max_polls(),
        }
    }
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            fallback_data_rate: default_fallback_data_rate(),
            attempts_per_rate: default_attempts_per_rate(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_log_dir(),
            max_files_to_keep: default_max_files_to_keep(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            battery_mv: default_sim_battery_mv(),
            switched_on: default_sim_switched_on(),
            usb_connected: false,
            time_scale: default_time_scale(),
            join_failures: 0,
            sensor_ready_polls: default_sensor_ready_polls(),
            good_fix_after_polls: default_good_fix_after_polls(),
            motion_interval_s: 0,
            microphone: default_microphone(),
        }
    }
}

fn invalid(msg: impl std::fmt::Display) -> NodeError {
    NodeError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use fieldnode::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.storage.settings_path.is_empty() {
            return Err(invalid("settings_path cannot be empty"));
        }

        if self.storage.retained_path.is_empty() {
            return Err(invalid("retained_path cannot be empty"));
        }

        if !(2000..=4200).contains(&self.power.low_battery_mv) {
            return Err(invalid("low_battery_mv must be between 2000 and 4200"));
        }

        for (name, value) in [
            ("wake_lead_s", self.schedule.wake_lead_s),
            ("near_window_s", self.schedule.near_window_s),
            ("power_on_delay_s", self.schedule.power_on_delay_s),
        ] {
            if value > 3600 {
                return Err(invalid(format!("{} must be at most 3600", name)));
            }
        }

        if self.acquisition.poll_interval_ms == 0 || self.acquisition.poll_interval_ms > 10000 {
            return Err(invalid("poll_interval_ms must be between 1 and 10000"));
        }

        if self.acquisition.required_good_fixes == 0 {
            return Err(invalid("required_good_fixes must be greater than 0"));
        }

        if self.acquisition.max_polls == 0 || self.acquisition.max_polls > 100_000 {
            return Err(invalid("max_polls must be between 1 and 100000"));
        }

        if self.join.fallback_data_rate > crate::settings::values::MAX_DATA_RATE {
            return Err(invalid(format!(
                "fallback_data_rate must be between 0 and {}",
                crate::settings::values::MAX_DATA_RATE
            )));
        }

        if !(1..=8).contains(&self.join.attempts_per_rate) {
            return Err(invalid("attempts_per_rate must be between 1 and 8"));
        }

        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        if ![9600, 57600, 115200, 921600].contains(&self.console.baud_rate) {
            return Err(invalid("baud_rate must be one of: 9600, 57600, 115200, 921600"));
        }

        if self.simulation.time_scale == 0 || self.simulation.time_scale > 3600 {
            return Err(invalid("time_scale must be between 1 and 3600"));
        }

        Ok(())
    }
}
