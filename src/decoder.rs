//! Heart Rate Measurement characteristic (0x2A37) decoder.
//!
//! Layout, all multi-byte fields little-endian:
//!
//! | bytes | field                                   | present when |
//! |-------|-----------------------------------------|--------------|
//! | 1     | flags                                   | always       |
//! | 1 / 2 | heart rate (uint8 / uint16)             | always       |
//! | 2     | energy expended, kJ                     | flags bit 3  |
//! | 2 * n | RR-intervals, 1/1024 s                  | flags bit 4  |

use crate::measurement::HeartRateMeasurement;
use thiserror::Error;

/// Heart rate value is a uint16 instead of a uint8.
pub const FLAG_HR_FORMAT_U16: u8 = 0x01;
/// The sensor supports skin contact detection.
pub const FLAG_SENSOR_CONTACT_SUPPORTED: u8 = 0x02;
/// Skin contact is detected.
pub const FLAG_SENSOR_CONTACT_DETECTED: u8 = 0x04;
/// An energy expended field follows the heart rate.
pub const FLAG_ENERGY_EXPENDED: u8 = 0x08;
/// RR-interval fields fill the rest of the payload.
pub const FLAG_RR_INTERVALS: u8 = 0x10;

/// Error types for decoding a Heart Rate Measurement payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload ends before a field its flags announce
    #[error("Payload too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
    /// The payload is long enough but its contents do not fit the format
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

/// Decode a raw Heart Rate Measurement characteristic value.
///
/// Never reads out of bounds: a payload that ends early is `TooShort`, and an
/// odd number of RR-interval bytes is `Malformed`. Trailing bytes are ignored
/// when the RR-interval flag is clear.
pub fn decode(raw: &[u8]) -> Result<HeartRateMeasurement, DecodeError> {
    let too_short = |expected: usize| DecodeError::TooShort {
        expected,
        actual: raw.len(),
    };

    let (&flags, rest) = raw.split_first().ok_or_else(|| too_short(1))?;

    let bpm_width = if flags & FLAG_HR_FORMAT_U16 != 0 { 2 } else { 1 };
    let mut expected = 1 + bpm_width;
    let (bpm_bytes, rest) = rest
        .split_at_checked(bpm_width)
        .ok_or_else(|| too_short(expected))?;
    let beats_per_minute = match *bpm_bytes {
        [lo, hi] => u16::from_le_bytes([lo, hi]),
        [value] => u16::from(value),
        _ => return Err(too_short(expected)),
    };

    let (energy_expended_kj, rest) = if flags & FLAG_ENERGY_EXPENDED != 0 {
        expected += 2;
        let (energy, rest) = read_u16_le(rest).ok_or_else(|| too_short(expected))?;
        (Some(energy), rest)
    } else {
        (None, rest)
    };

    let rr_intervals = if flags & FLAG_RR_INTERVALS != 0 {
        if rest.len() % 2 != 0 {
            return Err(DecodeError::Malformed(format!(
                "{} RR-interval bytes is not a whole number of intervals",
                rest.len()
            )));
        }
        Some(
            rest.chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect(),
        )
    } else {
        None
    };

    Ok(HeartRateMeasurement {
        beats_per_minute,
        sensor_contact_supported: flags & FLAG_SENSOR_CONTACT_SUPPORTED != 0,
        sensor_contact_detected: flags & FLAG_SENSOR_CONTACT_DETECTED != 0,
        energy_expended_kj,
        rr_intervals,
    })
}

fn read_u16_le(bytes: &[u8]) -> Option<(u16, &[u8])> {
    let (value, rest) = bytes.split_first_chunk::<2>()?;
    Some((u16::from_le_bytes(*value), rest))
}
