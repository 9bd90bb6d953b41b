//! # Setting Table
//!
//! The static definition of every device setting and the registry that
//! resolves keys to table entries.

use std::collections::HashMap;
use std::fmt;

use super::validators::*;

/// Subsystem a setting belongs to. Groups are reported together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SettingGroup {
    LoRaWan,
    Uplink,
    Otaa,
    Abp,
    Wifi2G4,
    Time,
}

impl SettingGroup {
    /// All groups in reporting order.
    pub const ALL: [SettingGroup; 6] = [
        SettingGroup::LoRaWan,
        SettingGroup::Uplink,
        SettingGroup::Otaa,
        SettingGroup::Abp,
        SettingGroup::Wifi2G4,
        SettingGroup::Time,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SettingGroup::LoRaWan => "LoRaWAN",
            SettingGroup::Uplink => "Uplink",
            SettingGroup::Otaa => "OTAA",
            SettingGroup::Abp => "ABP",
            SettingGroup::Wifi2G4 => "WiFi 2.4GHz",
            SettingGroup::Time => "Time",
        }
    }
}

impl fmt::Display for SettingGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One configurable parameter.
#[derive(Clone, Copy)]
pub struct Setting {
    /// Stable lowercase key, also the persisted key.
    pub key: &'static str,
    /// Human-readable label.
    pub label: &'static str,
    pub group: SettingGroup,
    /// Canonical default value.
    pub default: &'static str,
    pub validator: Validator,
    /// Maximum raw length in characters, 0 = unlimited.
    pub max_length: usize,
}

impl fmt::Debug for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setting")
            .field("key", &self.key)
            .field("group", &self.group)
            .field("default", &self.default)
            .field("max_length", &self.max_length)
            .finish_non_exhaustive()
    }
}

/// Stable setting keys.
pub mod keys {
    pub const VERSION: &str = "version";
    pub const METHOD: &str = "method";
    pub const RELAY: &str = "relay";
    pub const ADR: &str = "adr";
    pub const DATA_RATE: &str = "dr";
    pub const DBM: &str = "dbm";
    pub const CONFIRMED: &str = "confirmed";
    pub const INTERVAL: &str = "interval";
    pub const SLEEP: &str = "sleep";
    pub const OPERATION: &str = "operation";
    pub const TIMEOUT: &str = "timeout";
    pub const GNSS: &str = "gnss";
    pub const DEV_EUI: &str = "deveui";
    pub const JOIN_EUI: &str = "joineui";
    pub const APP_KEY: &str = "appkey";
    pub const NWK_KEY: &str = "nwkkey";
    pub const DEV_ADDR: &str = "devaddr";
    pub const APP_S_KEY: &str = "appskey";
    pub const NWK_S_ENC_KEY: &str = "nwksenckey";
    pub const F_NWK_S_INT_KEY: &str = "fnwksintkey";
    pub const S_NWK_S_INT_KEY: &str = "snwksintkey";
    pub const NAME: &str = "name";
    pub const SSID: &str = "ssid";
    pub const PASS: &str = "pass";
    pub const USER: &str = "user";
    pub const TIMEZONE: &str = "timezone";
    pub const DST: &str = "dst";
}

const fn setting(
    key: &'static str,
    label: &'static str,
    group: SettingGroup,
    default: &'static str,
    validator: Validator,
    max_length: usize,
) -> Setting {
    Setting {
        key,
        label,
        group,
        default,
        validator,
        max_length,
    }
}

use SettingGroup::*;

/// Every setting known to the device.
pub static SETTINGS: [Setting; 27] = [
    setting(keys::VERSION, "Version", LoRaWan, "1.1", validate_version, 0),
    setting(keys::METHOD, "Method", LoRaWan, "OTAA", validate_method, 0),
    setting(keys::RELAY, "Relay", LoRaWan, "off", validate_relay, 0),
    setting(keys::ADR, "ADR", LoRaWan, "off", validate_adr, 64),
    setting(keys::DATA_RATE, "DR", LoRaWan, "5", validate_data_rate, 0),
    setting(keys::DBM, "dBm", LoRaWan, "16", validate_dbm, 0),
    setting(keys::CONFIRMED, "Confirmed", LoRaWan, "off", validate_switch, 0),
    setting(keys::INTERVAL, "Interval", Uplink, "fixed,30", validate_interval, 0),
    setting(keys::SLEEP, "Sleep", Uplink, "on", validate_switch, 0),
    setting(keys::OPERATION, "Operation", Uplink, "mobile,5", validate_operation, 0),
    setting(keys::TIMEOUT, "Timeout", Uplink, "120", validate_timeout, 0),
    setting(keys::GNSS, "GNSS", Uplink, "off", validate_switch, 0),
    setting(keys::DEV_EUI, "DevEUI", Otaa, "", validate_hex16, 16),
    setting(keys::JOIN_EUI, "JoinEUI", Otaa, "", validate_hex16, 16),
    setting(keys::APP_KEY, "AppKey", Otaa, "", validate_hex32, 32),
    setting(keys::NWK_KEY, "NwkKey", Otaa, "", validate_hex32, 32),
    setting(keys::DEV_ADDR, "DevAddr", Abp, "", validate_hex8, 8),
    setting(keys::APP_S_KEY, "AppSKey", Abp, "", validate_hex32, 32),
    setting(keys::NWK_S_ENC_KEY, "NwkSEncKey", Abp, "", validate_hex32, 32),
    setting(keys::F_NWK_S_INT_KEY, "FNwkSIntKey", Abp, "", validate_hex32, 32),
    setting(keys::S_NWK_S_INT_KEY, "SNwkSIntKey", Abp, "", validate_hex32, 32),
    setting(keys::NAME, "Name", Wifi2G4, "LRF-1", validate_name, 16),
    setting(keys::SSID, "SSID", Wifi2G4, "LoRangeFinder-1", validate_ssid, 32),
    setting(keys::PASS, "Pass", Wifi2G4, "L0R4ngeF1nder", validate_password, 64),
    setting(keys::USER, "User", Wifi2G4, "", validate_user, 64),
    setting(keys::TIMEZONE, "Timezone", Time, "60", validate_timezone, 0),
    setting(keys::DST, "DST", Time, "0", validate_dst, 0),
];

/// Key-indexed view over a setting table.
#[derive(Debug, Clone)]
pub struct SettingRegistry {
    settings: &'static [Setting],
    index: HashMap<&'static str, usize>,
}

impl SettingRegistry {
    /// Build the registry over `settings`. Later duplicates of a key are ignored.
    pub fn new(settings: &'static [Setting]) -> Self {
        let mut index = HashMap::with_capacity(settings.len());
        for (idx, setting) in settings.iter().enumerate() {
            index.entry(setting.key).or_insert(idx);
        }
        Self { settings, index }
    }

    /// Registry over the device's [`SETTINGS`] table.
    pub fn device() -> Self {
        Self::new(&SETTINGS)
    }

    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn by_key(&self, key: &str) -> Option<&'static Setting> {
        self.index_of(key).map(|idx| &self.settings[idx])
    }

    pub fn by_index(&self, idx: usize) -> Option<&'static Setting> {
        self.settings.get(idx)
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static Setting> {
        self.settings.iter()
    }
}
