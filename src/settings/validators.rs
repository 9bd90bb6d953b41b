//! # Setting Validators
//!
//! One pure, total function per rule class. Each maps a raw input string to
//! its canonical stored spelling, or to the [`ErrorKind`] that rejects it.

use super::values::{
    parse_dst, parse_hex, parse_switch, parse_timeout, parse_timezone, switch_str,
    ActivationMethod, ActivationVersion, AdrPolicy, DataRate, Operation, RelayConfig,
    ScheduleMode, TxPower,
};
use crate::error::ErrorKind;

/// Raw value in, canonical value (or rejection) out.
pub type Validator = fn(&str) -> Result<String, ErrorKind>;

pub fn validate_version(raw: &str) -> Result<String, ErrorKind> {
    ActivationVersion::parse(raw).map(|v| v.to_string())
}

pub fn validate_method(raw: &str) -> Result<String, ErrorKind> {
    ActivationMethod::parse(raw).map(|v| v.to_string())
}

pub fn validate_relay(raw: &str) -> Result<String, ErrorKind> {
    RelayConfig::parse(raw).map(|v| v.to_string())
}

pub fn validate_adr(raw: &str) -> Result<String, ErrorKind> {
    AdrPolicy::parse(raw).map(|v| v.to_string())
}

pub fn validate_data_rate(raw: &str) -> Result<String, ErrorKind> {
    DataRate::parse(raw).map(|v| v.to_string())
}

pub fn validate_dbm(raw: &str) -> Result<String, ErrorKind> {
    TxPower::parse(raw).map(|v| v.to_string())
}

pub fn validate_switch(raw: &str) -> Result<String, ErrorKind> {
    parse_switch(raw).map(|on| switch_str(on).to_string())
}

pub fn validate_interval(raw: &str) -> Result<String, ErrorKind> {
    ScheduleMode::parse(raw).map(|v| v.to_string())
}

pub fn validate_operation(raw: &str) -> Result<String, ErrorKind> {
    Operation::parse(raw).map(|v| v.to_string())
}

pub fn validate_timeout(raw: &str) -> Result<String, ErrorKind> {
    if raw.is_empty() {
        return Ok(String::new());
    }
    parse_timeout(raw).map(|secs| secs.to_string())
}

pub fn validate_hex8(raw: &str) -> Result<String, ErrorKind> {
    parse_hex(raw, 8)
}

pub fn validate_hex16(raw: &str) -> Result<String, ErrorKind> {
    parse_hex(raw, 16)
}

pub fn validate_hex32(raw: &str) -> Result<String, ErrorKind> {
    parse_hex(raw, 32)
}

fn text_between(raw: &str, min: usize, max: usize) -> Result<String, ErrorKind> {
    let len = raw.chars().count();
    if (min..=max).contains(&len) {
        Ok(raw.to_string())
    } else {
        Err(ErrorKind::ValueError)
    }
}

pub fn validate_name(raw: &str) -> Result<String, ErrorKind> {
    text_between(raw, 4, 16)
}

pub fn validate_ssid(raw: &str) -> Result<String, ErrorKind> {
    text_between(raw, 1, 32)
}

pub fn validate_password(raw: &str) -> Result<String, ErrorKind> {
    text_between(raw, 8, 64)
}

pub fn validate_user(raw: &str) -> Result<String, ErrorKind> {
    text_between(raw, 0, 64)
}

// Timezone and DST keep the spelling the user gave; the typed view converts.
pub fn validate_timezone(raw: &str) -> Result<String, ErrorKind> {
    parse_timezone(raw).map(|_| raw.trim().to_string())
}

pub fn validate_dst(raw: &str) -> Result<String, ErrorKind> {
    parse_dst(raw).map(|_| raw.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical_is_fixed_point(validator: Validator, raw: &str) {
        let canonical = validator(raw).expect("raw value should be accepted");
        assert_eq!(
            validator(&canonical),
            Ok(canonical.clone()),
            "canonical form of {raw:?} must validate to itself"
        );
    }

    #[test]
    fn test_data_rate_normalizes_to_code() {
        assert_eq!(validate_data_rate("SF9BW125"), Ok("3".to_string()));
        assert_eq!(validate_data_rate("SF99"), Err(ErrorKind::ValueError));
    }

    #[test]
    fn test_switch_normalizes_to_on_off() {
        assert_eq!(validate_switch("YES"), Ok("on".to_string()));
        assert_eq!(validate_switch("0"), Ok("off".to_string()));
    }

    #[test]
    fn test_canonical_forms_are_stable() {
        canonical_is_fixed_point(validate_version, "0r");
        canonical_is_fixed_point(validate_method, "abp");
        canonical_is_fixed_point(validate_relay, "0");
        canonical_is_fixed_point(validate_adr, "dr,even");
        canonical_is_fixed_point(validate_adr, "DBM,10,5,0");
        canonical_is_fixed_point(validate_data_rate, "sf7bw250");
        canonical_is_fixed_point(validate_dbm, "14");
        canonical_is_fixed_point(validate_interval, "DC,FUP");
        canonical_is_fixed_point(validate_interval, "Fixed,300");
        canonical_is_fixed_point(validate_operation, "1,5");
        canonical_is_fixed_point(validate_operation, "1");
        canonical_is_fixed_point(validate_timeout, "120");
        canonical_is_fixed_point(validate_hex16, "70b3d57ed0000000");
        canonical_is_fixed_point(validate_timezone, " 1 ");
        canonical_is_fixed_point(validate_dst, "1");
    }

    #[test]
    fn test_text_lengths() {
        assert!(validate_name("abc").is_err());
        assert!(validate_name("abcd").is_ok());
        assert!(validate_ssid("").is_err());
        assert!(validate_password("short").is_err());
        assert!(validate_user("").is_ok());
        assert!(validate_user(&"u".repeat(65)).is_err());
    }

    #[test]
    fn test_validators_are_total() {
        let validators: [Validator; 8] = [
            validate_version,
            validate_adr,
            validate_interval,
            validate_operation,
            validate_timezone,
            validate_dst,
            validate_relay,
            validate_hex32,
        ];
        for validator in validators {
            for raw in ["", ",", "dc,", "fixed,", "::", "-", "\u{00e9}\u{00e9}", "99999999999999999999"] {
                // Must return, never panic.
                let _ = validator(raw);
            }
        }
    }
}
