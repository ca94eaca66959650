//! Registry of heart-rate sensors discovered during a scan.

use crate::sensor_id::SensorId;
use thiserror::Error;

/// Display name used when a sensor does not advertise one.
pub const DEFAULT_SENSOR_NAME: &str = "HRV_SENSOR";

/// A sensor seen during scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorRecord {
    pub id: SensorId,
    pub name: Option<String>,
    /// Signal strength in dBm
    pub rssi: Option<i16>,
}

impl SensorRecord {
    pub fn new(id: SensorId, name: Option<String>, rssi: Option<i16>) -> Self {
        Self { id, name, rssi }
    }

    /// Advertised name, or [`DEFAULT_SENSOR_NAME`].
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_SENSOR_NAME)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("sensor index {index} out of range ({len} sensors discovered)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Sensors in discovery order, at most one record per identity.
#[derive(Debug, Clone, Default)]
pub struct SensorRegistry {
    sensors: Vec<SensorRecord>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.sensors.clear();
    }

    /// Append a record for an unseen identity, or replace the existing record
    /// in place. Returns `true` when the identity was new.
    pub fn upsert(&mut self, record: SensorRecord) -> bool {
        match self.sensors.iter_mut().find(|s| s.id == record.id) {
            Some(existing) => {
                *existing = record;
                false
            }
            None => {
                self.sensors.push(record);
                true
            }
        }
    }

    pub fn list(&self) -> &[SensorRecord] {
        &self.sensors
    }

    pub fn get(&self, index: usize) -> Result<&SensorRecord, RegistryError> {
        self.sensors.get(index).ok_or(RegistryError::IndexOutOfRange {
            index,
            len: self.sensors.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}
