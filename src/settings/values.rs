//! # Setting Values
//!
//! Typed forms of the string-encoded settings. Every type parses from the
//! accepted input spellings and renders (`Display`) its canonical spelling;
//! parsing a canonical spelling yields the same value again.

use std::fmt;

use crate::error::ErrorKind;

type Parse<T> = std::result::Result<T, ErrorKind>;

/// Highest data rate index of the EU868 band plan.
pub const MAX_DATA_RATE: u8 = 7;

/// Transmit power bounds in dBm (EU868 caps at +16 dBm EIRP).
pub const MIN_TX_POWER_DBM: i8 = -16;
pub const MAX_TX_POWER_DBM: i8 = 16;

/// Heartbeat used by `mobile` without an explicit uplink count.
pub const MOBILE_DEFAULT_HEARTBEAT_S: u32 = 86_400;
/// Heartbeat used by `mobile,<n>`.
pub const MOBILE_COUNTED_HEARTBEAT_S: u32 = 3_600;

/// Longest accepted ADR range list.
pub const MAX_RANGE_LEN: usize = 16;

fn parse_int(raw: &str) -> Parse<i64> {
    raw.trim().parse::<i64>().map_err(|_| ErrorKind::ValueError)
}

/// Parse an on/off token (`N`, `NO`, `OFF`, `0`, `Y`, `YES`, `ON`, `1`).
pub fn parse_switch(raw: &str) -> Parse<bool> {
    match raw.to_ascii_uppercase().as_str() {
        "N" | "NO" | "OFF" | "0" => Ok(false),
        "Y" | "YES" | "ON" | "1" => Ok(true),
        _ => Err(ErrorKind::ValueError),
    }
}

/// Canonical spelling of a switch value.
pub fn switch_str(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

/// LoRaWAN specification version used for activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationVersion {
    /// LoRaWAN 1.0.4
    V104,
    /// LoRaWAN 1.0.4 with relay support
    V104Relay,
    /// LoRaWAN 1.1
    V11,
}

impl ActivationVersion {
    pub fn parse(raw: &str) -> Parse<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "1.0.4" | "0" => Ok(Self::V104),
            "1.0.4r" | "0r" => Ok(Self::V104Relay),
            "1.1" | "1" => Ok(Self::V11),
            _ => Err(ErrorKind::ValueError),
        }
    }

    /// 1.1 sessions need the additional network keys.
    pub fn is_v11(&self) -> bool {
        matches!(self, Self::V11)
    }

    pub fn relay_enabled(&self) -> bool {
        matches!(self, Self::V104Relay)
    }
}

impl fmt::Display for ActivationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V104 => "1.0.4",
            Self::V104Relay => "1.0.4r",
            Self::V11 => "1.1",
        })
    }
}

/// Network activation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationMethod {
    Abp,
    Otaa,
}

impl ActivationMethod {
    pub fn parse(raw: &str) -> Parse<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "ABP" | "0" => Ok(Self::Abp),
            "OTAA" | "1" => Ok(Self::Otaa),
            _ => Err(ErrorKind::ValueError),
        }
    }
}

impl fmt::Display for ActivationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Abp => "ABP",
            Self::Otaa => "OTAA",
        })
    }
}

/// Relay parameters (`off` or `<mode>,<smart level>,<back-off>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayConfig {
    Off,
    On { mode: u8, smart_level: u8, back_off: u8 },
}

impl RelayConfig {
    pub fn parse(raw: &str) -> Parse<Self> {
        let upper = raw.to_ascii_uppercase();
        if upper == "OFF" || upper == "0" {
            return Ok(Self::Off);
        }

        let parts: Vec<&str> = raw.split(',').collect();
        if parts.len() != 3 {
            return Err(ErrorKind::ValueError);
        }
        let mut fields = [0u8; 3];
        for (slot, part) in fields.iter_mut().zip(&parts) {
            *slot = part.trim().parse::<u8>().map_err(|_| ErrorKind::ValueError)?;
        }

        Ok(Self::On {
            mode: fields[0],
            smart_level: fields[1],
            back_off: fields[2],
        })
    }
}

impl fmt::Display for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => f.write_str("off"),
            Self::On {
                mode,
                smart_level,
                back_off,
            } => write!(f, "{},{},{}", mode, smart_level, back_off),
        }
    }
}

/// Uplink data rate index (0 = SF12BW125 ... 5 = SF7BW125, 6 = SF7BW250, 7 = FSK).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DataRate(u8);

const DATA_RATE_ALIASES: [&[&str]; 8] = [
    &["0", "SF12", "SF12BW125"],
    &["1", "SF11", "SF11BW125"],
    &["2", "SF10", "SF10BW125"],
    &["3", "SF9", "SF9BW125"],
    &["4", "SF8", "SF8BW125"],
    &["5", "SF7", "SF7BW125"],
    &["6", "SF7BW250"],
    &["7", "FSK"],
];

impl DataRate {
    /// Most robust (longest range) rate, used as the join fallback.
    pub const MOST_ROBUST: DataRate = DataRate(0);

    /// Build from a raw index, rejecting indices outside the band plan.
    pub fn new(index: u8) -> Option<Self> {
        (index <= MAX_DATA_RATE).then_some(Self(index))
    }

    pub fn parse(raw: &str) -> Parse<Self> {
        let upper = raw.to_ascii_uppercase();
        DATA_RATE_ALIASES
            .iter()
            .position(|aliases| aliases.contains(&upper.as_str()))
            .map(|idx| Self(idx as u8))
            .ok_or(ErrorKind::ValueError)
    }

    pub fn index(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transmit power in dBm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxPower(i8);

impl TxPower {
    pub fn parse(raw: &str) -> Parse<Self> {
        let value = parse_int(raw)?;
        if (MIN_TX_POWER_DBM as i64..=MAX_TX_POWER_DBM as i64).contains(&value) {
            Ok(Self(value as i8))
        } else {
            Err(ErrorKind::ValueError)
        }
    }

    pub fn dbm(&self) -> i8 {
        self.0
    }
}

impl fmt::Display for TxPower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Adaptive data rate policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdrPolicy {
    Off,
    On,
    /// Cycle through an explicit list of data rates.
    DataRates(Vec<u8>),
    /// Cycle through an explicit list of transmit powers.
    PowerLevels(Vec<i8>),
}

impl AdrPolicy {
    pub fn parse(raw: &str) -> Parse<Self> {
        if let Ok(on) = parse_switch(raw) {
            return Ok(if on { Self::On } else { Self::Off });
        }

        let upper = raw.to_ascii_uppercase();
        if let Some(list) = upper.strip_prefix("DR,") {
            return match list {
                "ODD" => Ok(Self::DataRates(vec![5, 3, 1])),
                "EVEN" => Ok(Self::DataRates(vec![4, 2, 0])),
                _ => {
                    let rates = parse_range(list, |v| (0..=MAX_DATA_RATE as i64).contains(&v))?;
                    Ok(Self::DataRates(rates.into_iter().map(|v| v as u8).collect()))
                }
            };
        }
        if let Some(list) = upper.strip_prefix("DBM,") {
            let levels = parse_range(list, |v| {
                (MIN_TX_POWER_DBM as i64..=MAX_TX_POWER_DBM as i64).contains(&v)
            })?;
            return Ok(Self::PowerLevels(levels.into_iter().map(|v| v as i8).collect()));
        }

        Err(ErrorKind::ValueError)
    }
}

fn parse_range(list: &str, in_range: impl Fn(i64) -> bool) -> Parse<Vec<i64>> {
    let values = list
        .split(',')
        .map(parse_int)
        .collect::<Parse<Vec<i64>>>()?;
    if values.len() < 2 || values.len() > MAX_RANGE_LEN || !values.iter().all(|&v| in_range(v)) {
        return Err(ErrorKind::ValueError);
    }
    Ok(values)
}

fn join_list<T: fmt::Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl fmt::Display for AdrPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => f.write_str("off"),
            Self::On => f.write_str("on"),
            Self::DataRates(rates) => write!(f, "dr,{}", join_list(rates)),
            Self::PowerLevels(levels) => write!(f, "dbm,{}", join_list(levels)),
        }
    }
}

/// Regulatory airtime budget, expressed as seconds of airtime per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DutyCycleBudget {
    /// The Things Network fair use policy (30 s/day).
    FairUse,
    /// 0.1% duty cycle (86 s/day).
    PointOnePercent,
    /// 1% duty cycle (864 s/day).
    OnePercent,
    /// Explicit daily airtime in seconds (1..8640).
    DailySeconds(u32),
}

impl DutyCycleBudget {
    pub fn parse(raw: &str) -> Parse<Self> {
        match raw {
            "fup" => Ok(Self::FairUse),
            "0.1%" => Ok(Self::PointOnePercent),
            "1%" => Ok(Self::OnePercent),
            _ => {
                let secs = parse_int(raw)?;
                if secs > 0 && secs < 8_640 {
                    Ok(Self::DailySeconds(secs as u32))
                } else {
                    Err(ErrorKind::ValueError)
                }
            }
        }
    }

    /// Airtime the node may spend transmitting per day.
    pub fn daily_airtime_s(&self) -> u32 {
        match self {
            Self::FairUse => 30,
            Self::PointOnePercent => 86,
            Self::OnePercent => 864,
            Self::DailySeconds(secs) => *secs,
        }
    }
}

impl fmt::Display for DutyCycleBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FairUse => f.write_str("fup"),
            Self::PointOnePercent => f.write_str("0.1%"),
            Self::OnePercent => f.write_str("1%"),
            Self::DailySeconds(secs) => write!(f, "{}", secs),
        }
    }
}

/// How the spacing between uplinks is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Fixed period in seconds (10..=65535).
    Fixed { period_s: u32 },
    /// Spacing derived from the previous uplink's airtime.
    DutyCycle(DutyCycleBudget),
}

impl ScheduleMode {
    pub fn parse(raw: &str) -> Parse<Self> {
        let lower = raw.to_ascii_lowercase();
        if let Some(budget) = lower.strip_prefix("dc,") {
            return DutyCycleBudget::parse(budget).map(Self::DutyCycle);
        }
        if let Some(period) = lower.strip_prefix("fixed,") {
            let period = parse_int(period)?;
            if (10..=65_535).contains(&period) {
                return Ok(Self::Fixed {
                    period_s: period as u32,
                });
            }
        }
        Err(ErrorKind::ValueError)
    }
}

impl fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed { period_s } => write!(f, "fixed,{}", period_s),
            Self::DutyCycle(budget) => write!(f, "dc,{}", budget),
        }
    }
}

/// Whether the node is expected to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// No motion sensing; uplinks at the scheduled cadence.
    Stationary,
    /// Motion-aware: after `uplinks` stationary uplinks, back off to `heartbeat_s`.
    Mobile { uplinks: u8, heartbeat_s: u32 },
}

impl Operation {
    pub fn parse(raw: &str) -> Parse<Self> {
        let lower = raw.to_ascii_lowercase();
        match lower.as_str() {
            "stationary" | "0" => return Ok(Self::Stationary),
            "mobile" | "1" => {
                return Ok(Self::Mobile {
                    uplinks: 1,
                    heartbeat_s: MOBILE_DEFAULT_HEARTBEAT_S,
                })
            }
            _ => {}
        }

        let count = lower
            .strip_prefix("mobile,")
            .or_else(|| lower.strip_prefix("1,"))
            .ok_or(ErrorKind::ValueError)?;
        let uplinks = parse_int(count)?;
        if uplinks > 0 && uplinks < 256 {
            Ok(Self::Mobile {
                uplinks: uplinks as u8,
                heartbeat_s: MOBILE_COUNTED_HEARTBEAT_S,
            })
        } else {
            Err(ErrorKind::ValueError)
        }
    }

    pub fn is_mobile(&self) -> bool {
        matches!(self, Self::Mobile { .. })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stationary => f.write_str("stationary"),
            Self::Mobile {
                uplinks: 1,
                heartbeat_s: MOBILE_DEFAULT_HEARTBEAT_S,
            } => f.write_str("mobile"),
            Self::Mobile { uplinks, .. } => write!(f, "mobile,{}", uplinks),
        }
    }
}

/// Position-fix wait in seconds (0..=3600). Empty means no wait.
pub fn parse_timeout(raw: &str) -> Parse<u32> {
    if raw.is_empty() {
        return Ok(0);
    }
    let secs = parse_int(raw)?;
    if (0..=3_600).contains(&secs) {
        Ok(secs as u32)
    } else {
        Err(ErrorKind::ValueError)
    }
}

/// Hex identifier of exactly `len` characters, or empty for "unset".
///
/// Returns the upper-cased identifier.
pub fn parse_hex(raw: &str, len: usize) -> Parse<String> {
    if raw.is_empty() {
        return Ok(String::new());
    }
    if raw.len() != len || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ErrorKind::ValueError);
    }
    Ok(raw.to_ascii_uppercase())
}

/// Decode a validated hex identifier into bytes. `None` when unset.
pub fn hex_bytes<const N: usize>(hex: &str) -> Option<[u8; N]> {
    if hex.len() != N * 2 || !hex.is_ascii() {
        return None;
    }
    let mut out = [0u8; N];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

/// Timezone offset in minutes: small values are hours, `[-]HH:MM` is accepted.
pub fn parse_timezone(raw: &str) -> Parse<i32> {
    let v = raw.trim();
    if v.is_empty() {
        return Err(ErrorKind::ValueError);
    }

    let minutes = if let Some((hours, mins)) = v.split_once(':') {
        let hours = parse_int(hours)?;
        let mut mins = parse_int(mins)?
            .checked_abs()
            .ok_or(ErrorKind::ValueError)?;
        if hours < 0 || v.starts_with('-') {
            mins = -mins;
        }
        hours
            .checked_mul(60)
            .and_then(|h| h.checked_add(mins))
            .ok_or(ErrorKind::ValueError)?
    } else {
        let value = parse_int(v)?;
        if value.unsigned_abs() <= 14 {
            value * 60
        } else {
            value
        }
    };

    if (-720..=840).contains(&minutes) {
        Ok(minutes as i32)
    } else {
        Err(ErrorKind::ValueError)
    }
}

/// Daylight saving offset in minutes: values up to 12 are hours.
pub fn parse_dst(raw: &str) -> Parse<i32> {
    let v = raw.trim();
    if v.is_empty() {
        return Err(ErrorKind::ValueError);
    }
    let mut value = parse_int(v)?;
    if value.unsigned_abs() <= 12 {
        value *= 60;
    }
    if (0..=720).contains(&value) {
        Ok(value as i32)
    } else {
        Err(ErrorKind::ValueError)
    }
}
