//! # Uplink Payload
//!
//! Little-endian binary frame for one uplink.
//!
//! The port number flags the optional sections: bit 1 adds particulate
//! matter, bit 3 adds a position. A missing position fix leaves bit 3
//! clear.

use bytes::{BufMut, Bytes, BytesMut};

use crate::device::{Measurements, Position};
use crate::sampling::SoundLevels;

/// Port of a frame carrying only the base readings.
pub const BASE_PORT: u8 = 1;
/// Port bit marking the particulate section.
pub const PARTICULATE_BIT: u8 = 1 << 1;
/// Port bit marking the position section.
pub const POSITION_BIT: u8 = 1 << 3;

/// Size of the base readings section.
pub const BASE_LEN: usize = 14;

fn clamp_u8(value: f32) -> u8 {
    value.clamp(0.0, 255.0) as u8
}

fn clamp_u16(value: f32) -> u16 {
    value.clamp(0.0, 65_535.0) as u16
}

/// Magnitude with the sign carried in the top bit.
fn signed_magnitude_u16(value: f32, scale: f32) -> u16 {
    let magnitude = (value.abs() * scale).clamp(0.0, 32_767.0) as u16;
    if value < 0.0 {
        magnitude | 0x8000
    } else {
        magnitude
    }
}

fn signed_magnitude_u32(value: f64, scale: f64) -> u32 {
    let magnitude = (value.abs() * scale).clamp(0.0, f64::from(0x7FFF_FFFFu32)) as u32;
    if value < 0.0 {
        magnitude | 0x8000_0000
    } else {
        magnitude
    }
}

fn sound_code(db: f32) -> u8 {
    clamp_u8((db - 32.0) * 4.0)
}

/// Encode one uplink.
///
/// # Arguments
///
/// * `readings` - Environmental readings
/// * `sound` - Sound levels, zeros when sampling produced nothing
/// * `position` - Qualifying fix, `None` sends the no-fix marker
///
/// # Returns
///
/// * `(u8, Bytes)` - Port and frame
pub fn encode(
    readings: &Measurements,
    sound: Option<SoundLevels>,
    position: Option<Position>,
) -> (u8, Bytes) {
    let mut port = BASE_PORT;
    let mut buf = BytesMut::with_capacity(BASE_LEN + 3 + 9);

    buf.put_u8(clamp_u8((f32::from(readings.battery_mv) - 2500.0) / 10.0));
    buf.put_u16_le(signed_magnitude_u16(readings.temperature_c, 100.0));
    buf.put_u8(clamp_u8(readings.humidity_pct * 2.0));
    buf.put_u16_le(clamp_u16(readings.pressure_hpa * 10.0));
    buf.put_u16_le(clamp_u16(readings.lux));
    buf.put_u8(clamp_u8(readings.uv_index));

    let levels = sound.map_or([0; 3], |s| {
        [sound_code(s.min_db), sound_code(s.avg_db), sound_code(s.max_db)]
    });
    buf.put_slice(&levels);

    buf.put_u16_le(clamp_u16(readings.co2_ppm));

    if let Some((pm2_5, pm10)) = readings.particulate {
        port |= PARTICULATE_BIT;
        let pm2_5 = (pm2_5 * 10.0).clamp(0.0, 1023.0) as u16;
        let pm10 = (pm10 * 10.0).clamp(0.0, 1023.0) as u16;
        buf.put_u8(pm2_5 as u8);
        buf.put_u8(pm10 as u8);
        buf.put_u8((((pm2_5 >> 8) << 4) | (pm10 >> 8)) as u8);
    }

    if let Some(fix) = position {
        port |= POSITION_BIT;
        buf.put_u32_le(signed_magnitude_u32(fix.latitude, 1e7));
        buf.put_u32_le(signed_magnitude_u32(fix.longitude, 1e7));
        let hdop = (fix.hdop * 5.0).clamp(0.0, 15.0) as u8;
        let sats = fix.satellites.min(15);
        buf.put_u8((hdop << 4) | sats);
    }

    (port, buf.freeze())
}

/// Upper-case hex rendering used by the uplink log.
pub fn to_hex(payload: &[u8]) -> String {
    payload.iter().map(|b| format!("{:02X}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings() -> Measurements {
        Measurements {
            battery_mv: 3700,
            temperature_c: -5.25,
            humidity_pct: 45.5,
            pressure_hpa: 1013.2,
            lux: 1234.0,
            uv_index: 3.0,
            co2_ppm: 420.0,
            particulate: None,
        }
    }

    #[test]
    fn test_base_frame_layout() {
        let sound = SoundLevels {
            min_db: 40.0,
            avg_db: 50.0,
            max_db: 100.0,
        };
        let (port, frame) = encode(&readings(), Some(sound), None);

        assert_eq!(port, BASE_PORT);
        assert_eq!(frame.len(), BASE_LEN);
        assert_eq!(frame[0], 120);
        // 525 with the sign bit set.
        assert_eq!(u16::from_le_bytes([frame[1], frame[2]]), 0x8000 | 525);
        assert_eq!(frame[3], 91);
        assert_eq!(u16::from_le_bytes([frame[4], frame[5]]), 10_132);
        assert_eq!(u16::from_le_bytes([frame[6], frame[7]]), 1_234);
        assert_eq!(frame[8], 3);
        assert_eq!(&frame[9..12], &[32, 72, 255]);
        assert_eq!(u16::from_le_bytes([frame[12], frame[13]]), 420);
    }

    #[test]
    fn test_values_clamped() {
        let extreme = Measurements {
            battery_mv: 2000,
            humidity_pct: 200.0,
            pressure_hpa: -1.0,
            lux: 1e9,
            ..readings()
        };
        let (_, frame) = encode(&extreme, None, None);
        assert_eq!(frame[0], 0);
        assert_eq!(frame[3], 255);
        assert_eq!(u16::from_le_bytes([frame[4], frame[5]]), 0);
        assert_eq!(u16::from_le_bytes([frame[6], frame[7]]), 65_535);
        assert_eq!(&frame[9..12], &[0, 0, 0]);
    }

    #[test]
    fn test_particulate_section() {
        let with_pm = Measurements {
            particulate: Some((30.0, 65.5)),
            ..readings()
        };
        let (port, frame) = encode(&with_pm, None, None);
        assert_eq!(port, BASE_PORT | PARTICULATE_BIT);
        assert_eq!(frame.len(), BASE_LEN + 3);
        // 300 = 0x12C, 655 = 0x28F
        assert_eq!(&frame[14..17], &[0x2C, 0x8F, 0x12]);
    }

    #[test]
    fn test_position_section() {
        let fix = Position {
            latitude: 52.5,
            longitude: -13.25,
            hdop: 1.2,
            satellites: 20,
        };
        let (port, frame) = encode(&readings(), None, Some(fix));
        assert_eq!(port, BASE_PORT | POSITION_BIT);
        assert_eq!(frame.len(), BASE_LEN + 9);
        assert_eq!(
            u32::from_le_bytes([frame[14], frame[15], frame[16], frame[17]]),
            525_000_000
        );
        assert_eq!(
            u32::from_le_bytes([frame[18], frame[19], frame[20], frame[21]]),
            0x8000_0000 | 132_500_000
        );
        assert_eq!(frame[22], (6 << 4) | 15);
    }

    #[test]
    fn test_hex_rendering() {
        assert_eq!(to_hex(&[0x01, 0xAB, 0x00]), "01AB00");
    }
}
