//! # Typed Settings
//!
//! A snapshot of the configuration store parsed into explicit types.

use super::store::ConfigStore;
use super::table::keys;
use super::values::{
    hex_bytes, parse_dst, parse_hex, parse_switch, parse_timeout, parse_timezone,
    ActivationMethod, ActivationVersion, AdrPolicy, DataRate, Operation, RelayConfig,
    ScheduleMode, TxPower,
};
use crate::device::LinkParams;
use crate::error::{ErrorKind, NodeError, Result};

/// Settings consumed by the lifecycle, read once per wake cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSettings {
    pub version: ActivationVersion,
    pub method: ActivationMethod,
    pub relay: RelayConfig,
    pub adr: AdrPolicy,
    pub data_rate: DataRate,
    pub tx_power: TxPower,
    pub confirmed: bool,

    pub schedule: ScheduleMode,
    pub sleep_enabled: bool,
    pub operation: Operation,
    /// Seconds to wait for a position fix, 0 = do not wait.
    pub position_timeout_s: u32,
    pub position_enabled: bool,

    pub dev_eui: Option<[u8; 8]>,
    pub join_eui: Option<[u8; 8]>,
    pub app_key: Option<[u8; 16]>,
    pub nwk_key: Option<[u8; 16]>,

    pub dev_addr: Option<[u8; 4]>,
    pub app_s_key: Option<[u8; 16]>,
    pub nwk_s_enc_key: Option<[u8; 16]>,
    pub f_nwk_s_int_key: Option<[u8; 16]>,
    pub s_nwk_s_int_key: Option<[u8; 16]>,

    pub device_name: String,
    pub ssid: String,
    pub password: String,
    pub user: String,

    /// Offset from UTC in minutes.
    pub timezone_min: i32,
    /// Daylight saving adjustment in minutes.
    pub dst_min: i32,
}

fn field<T>(
    store: &mut ConfigStore,
    key: &'static str,
    parse: impl Fn(&str) -> std::result::Result<T, ErrorKind>,
) -> Result<T> {
    let raw = store.get(key).unwrap_or_default();
    parse(&raw).map_err(|kind| NodeError::InvalidSetting {
        key: key.to_string(),
        kind,
    })
}

fn key_field<const N: usize>(store: &mut ConfigStore, key: &'static str) -> Result<Option<[u8; N]>> {
    let hex = field(store, key, |raw| parse_hex(raw, N * 2))?;
    Ok(hex_bytes::<N>(&hex))
}

impl NodeSettings {
    /// Parse every setting from the store.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidSetting`] naming the first persisted value
    /// that no longer parses.
    pub fn from_store(store: &mut ConfigStore) -> Result<Self> {
        Ok(Self {
            version: field(store, keys::VERSION, ActivationVersion::parse)?,
            method: field(store, keys::METHOD, ActivationMethod::parse)?,
            relay: field(store, keys::RELAY, RelayConfig::parse)?,
            adr: field(store, keys::ADR, AdrPolicy::parse)?,
            data_rate: field(store, keys::DATA_RATE, DataRate::parse)?,
            tx_power: field(store, keys::DBM, TxPower::parse)?,
            confirmed: field(store, keys::CONFIRMED, parse_switch)?,

            schedule: field(store, keys::INTERVAL, ScheduleMode::parse)?,
            sleep_enabled: field(store, keys::SLEEP, parse_switch)?,
            operation: field(store, keys::OPERATION, Operation::parse)?,
            position_timeout_s: field(store, keys::TIMEOUT, parse_timeout)?,
            position_enabled: field(store, keys::GNSS, parse_switch)?,

            dev_eui: key_field(store, keys::DEV_EUI)?,
            join_eui: key_field(store, keys::JOIN_EUI)?,
            app_key: key_field(store, keys::APP_KEY)?,
            nwk_key: key_field(store, keys::NWK_KEY)?,

            dev_addr: key_field(store, keys::DEV_ADDR)?,
            app_s_key: key_field(store, keys::APP_S_KEY)?,
            nwk_s_enc_key: key_field(store, keys::NWK_S_ENC_KEY)?,
            f_nwk_s_int_key: key_field(store, keys::F_NWK_S_INT_KEY)?,
            s_nwk_s_int_key: key_field(store, keys::S_NWK_S_INT_KEY)?,

            device_name: store.get(keys::NAME).unwrap_or_default(),
            ssid: store.get(keys::SSID).unwrap_or_default(),
            password: store.get(keys::PASS).unwrap_or_default(),
            user: store.get(keys::USER).unwrap_or_default(),

            timezone_min: field(store, keys::TIMEZONE, parse_timezone)?,
            dst_min: field(store, keys::DST, parse_dst)?,
        })
    }

    /// OTAA needs DevEUI, JoinEUI and AppKey; 1.1 also needs NwkKey.
    pub fn otaa_complete(&self) -> bool {
        self.dev_eui.is_some()
            && self.join_eui.is_some()
            && self.app_key.is_some()
            && (!self.version.is_v11() || self.nwk_key.is_some())
    }

    /// ABP needs DevAddr, AppSKey and NwkSEncKey; 1.1 also needs both integrity keys.
    pub fn abp_complete(&self) -> bool {
        self.dev_addr.is_some()
            && self.app_s_key.is_some()
            && self.nwk_s_enc_key.is_some()
            && (!self.version.is_v11()
                || (self.f_nwk_s_int_key.is_some() && self.s_nwk_s_int_key.is_some()))
    }

    /// Credentials for the configured activation method are all present.
    pub fn credentials_complete(&self) -> bool {
        match self.method {
            ActivationMethod::Otaa => self.otaa_complete(),
            ActivationMethod::Abp => self.abp_complete(),
        }
    }

    /// Link settings handed to the radio with every uplink.
    pub fn link_params(&self) -> LinkParams {
        LinkParams {
            tx_power: self.tx_power,
            adr: self.adr.clone(),
            relay: self.relay,
        }
    }

    /// Local time offset from UTC, daylight saving included.
    pub fn utc_offset_min(&self) -> i32 {
        self.timezone_min + self.dst_min
    }
}

#[cfg(test)]
mod tests {
    use super::super::backend::mocks::MemoryBackend;
    use super::super::backend::CONFIG_NAMESPACE;
    use super::super::values::DutyCycleBudget;
    use super::*;

    fn store(entries: &[(&str, &str)]) -> ConfigStore {
        let mut store = ConfigStore::new(Box::new(MemoryBackend::with_entries(
            CONFIG_NAMESPACE,
            entries,
        )));
        store.load().unwrap();
        store
    }

    #[test]
    fn test_defaults_parse() {
        let settings = NodeSettings::from_store(&mut store(&[])).unwrap();
        assert_eq!(settings.version, ActivationVersion::V11);
        assert_eq!(settings.method, ActivationMethod::Otaa);
        assert_eq!(settings.data_rate.index(), 5);
        assert_eq!(settings.schedule, ScheduleMode::Fixed { period_s: 30 });
        assert_eq!(
            settings.operation,
            Operation::Mobile {
                uplinks: 5,
                heartbeat_s: 3_600
            }
        );
        assert_eq!(settings.position_timeout_s, 120);
        assert!(!settings.position_enabled);
        assert!(settings.sleep_enabled);
        assert_eq!(settings.utc_offset_min(), 60);
        assert!(!settings.credentials_complete());
    }

    #[test]
    fn test_otaa_credentials() {
        let mut s = store(&[
            ("deveui", "70B3D57ED0000001"),
            ("joineui", "0000000000000001"),
            ("appkey", "00112233445566778899AABBCCDDEEFF"),
        ]);
        let settings = NodeSettings::from_store(&mut s).unwrap();
        assert_eq!(
            settings.dev_eui,
            Some([0x70, 0xB3, 0xD5, 0x7E, 0xD0, 0x00, 0x00, 0x01])
        );
        // 1.1 additionally needs the network key.
        assert!(!settings.otaa_complete());

        assert_eq!(s.set("version", "1.0.4"), ErrorKind::NoError);
        let settings = NodeSettings::from_store(&mut s).unwrap();
        assert!(settings.otaa_complete());
        assert!(settings.credentials_complete());
    }

    #[test]
    fn test_abp_credentials() {
        let key = "000102030405060708090A0B0C0D0E0F";
        let mut s = store(&[
            ("method", "ABP"),
            ("version", "1.0.4"),
            ("devaddr", "260B1234"),
            ("appskey", key),
            ("nwksenckey", key),
        ]);
        let settings = NodeSettings::from_store(&mut s).unwrap();
        assert!(settings.credentials_complete());
        assert_eq!(settings.dev_addr, Some([0x26, 0x0B, 0x12, 0x34]));

        assert_eq!(s.set("version", "1.1"), ErrorKind::NoError);
        let settings = NodeSettings::from_store(&mut s).unwrap();
        assert!(!settings.abp_complete());
    }

    #[test]
    fn test_invalid_persisted_value_is_reported() {
        let mut s = store(&[("interval", "hourly")]);
        match NodeSettings::from_store(&mut s) {
            Err(NodeError::InvalidSetting { key, kind }) => {
                assert_eq!(key, "interval");
                assert_eq!(kind, ErrorKind::ValueError);
            }
            other => panic!("Expected InvalidSetting, got: {:?}", other),
        }
    }

    #[test]
    fn test_duty_cycle_and_time_settings() {
        let mut s = store(&[("interval", "dc,fup"), ("timezone", "-3:30"), ("dst", "1")]);
        let settings = NodeSettings::from_store(&mut s).unwrap();
        assert_eq!(
            settings.schedule,
            ScheduleMode::DutyCycle(DutyCycleBudget::FairUse)
        );
        assert_eq!(settings.utc_offset_min(), -150);
    }
}
