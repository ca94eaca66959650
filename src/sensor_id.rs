//! Stable identity of a heart-rate peripheral.
//!
//! The identity is assigned by the radio adapter (on BlueZ it is the device
//! address) and is independent of the advertised name, which may be missing or
//! shared by several sensors of the same model.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identity of a physical peripheral, stored as a compact 6-byte address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SensorId(pub [u8; 6]);

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Errors returned when parsing a sensor identity string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseSensorIdError {
    #[error("invalid sensor id: expected 6 parts, got {0}")]
    InvalidLength(usize),
    #[error("invalid sensor id: part {0} has wrong length")]
    InvalidPartLength(usize),
    #[error("invalid sensor id: '{0}' is not valid hex")]
    InvalidHex(String),
}

impl FromStr for SensorId {
    type Err = ParseSensorIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(ParseSensorIdError::InvalidLength(parts.len()));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(ParseSensorIdError::InvalidPartLength(i));
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseSensorIdError::InvalidHex(part.to_string()))?;
        }

        Ok(SensorId(bytes))
    }
}

impl From<[u8; 6]> for SensorId {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for SensorId {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

#[cfg(feature = "bluer")]
impl From<SensorId> for bluer::Address {
    fn from(id: SensorId) -> Self {
        bluer::Address(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let id = SensorId([0xC8, 0x1E, 0x4A, 0x00, 0x9B, 0x01]);
        assert_eq!(format!("{}", id), "C8:1E:4A:00:9B:01");
    }

    #[test]
    fn test_from_str_round_trips_display() {
        let id: SensorId = "c8:1e:4a:00:9b:01".parse().unwrap();
        assert_eq!(id.0, [0xC8, 0x1E, 0x4A, 0x00, 0x9B, 0x01]);
        assert_eq!(id.to_string().parse::<SensorId>().unwrap(), id);
    }

    #[test]
    fn test_from_str_invalid() {
        assert!(matches!(
            "polar".parse::<SensorId>(),
            Err(ParseSensorIdError::InvalidLength(1))
        ));
        assert!(matches!(
            "C8:1E:4A:0:9B:01".parse::<SensorId>(),
            Err(ParseSensorIdError::InvalidPartLength(3))
        ));
        assert!(matches!(
            "C8:1E:4A:00:9B:ZZ".parse::<SensorId>(),
            Err(ParseSensorIdError::InvalidHex(_))
        ));
    }

    #[cfg(feature = "bluer")]
    #[test]
    fn test_bluer_address_conversion() {
        let addr = bluer::Address([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let id: SensorId = addr.into();
        assert_eq!(id, SensorId([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]));
        assert_eq!(bluer::Address::from(id), addr);
    }
}
