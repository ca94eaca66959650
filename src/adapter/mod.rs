//! Radio adapter contract.
//!
//! The core never talks to a Bluetooth stack directly. It issues
//! fire-and-forget [`AdapterCommand`]s through a [`RadioAdapter`] and learns
//! about their outcome only through [`AdapterEvent`]s delivered on a channel.
//! An adapter must eventually answer every command with either a success or a
//! failure event. Events for one sensor arrive in the order their commands
//! were submitted: the `Disconnected` answering a `Disconnect` is delivered
//! before anything answering a later `Connect` to the same sensor.

#[cfg(feature = "bluer")]
pub mod bluer;

pub mod mock;

use crate::sensor_id::SensorId;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Expand a 16-bit SIG-assigned number onto the Bluetooth base UUID
/// `0000XXXX-0000-1000-8000-00805F9B34FB`.
pub const fn bluetooth_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5F9B_34FB)
}

/// Heart Rate service (0x180D).
pub const HEART_RATE_SERVICE_UUID: Uuid = bluetooth_uuid(0x180D);

/// Heart Rate Measurement characteristic (0x2A37).
pub const HEART_RATE_MEASUREMENT_UUID: Uuid = bluetooth_uuid(0x2A37);

/// Channel buffer size for adapter events.
pub const EVENT_CHANNEL_BUFFER_SIZE: usize = 100;

pub type EventSender = mpsc::Sender<AdapterEvent>;
pub type EventReceiver = mpsc::Receiver<AdapterEvent>;

/// Create the channel an adapter delivers its events on.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE)
}

/// Errors raised while bringing up an adapter backend.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Bluetooth stack related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

/// Power / availability state of the local radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdapterState::Unknown => "unknown",
            AdapterState::Resetting => "resetting",
            AdapterState::Unsupported => "unsupported",
            AdapterState::Unauthorized => "unauthorized",
            AdapterState::PoweredOff => "powered off",
            AdapterState::PoweredOn => "powered on",
        };
        f.write_str(name)
    }
}

/// Adapter-assigned handle of a remote GATT service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceHandle(pub u16);

/// Adapter-assigned handle of a remote GATT characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    pub service: ServiceHandle,
    pub id: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub handle: ServiceHandle,
    pub uuid: Uuid,
}

/// Capability flags of a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub handle: CharacteristicHandle,
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

/// Commands accepted by a radio adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCommand {
    StartScan {
        service_filter: Uuid,
    },
    StopScan,
    Connect(SensorId),
    Disconnect(SensorId),
    DiscoverServices {
        sensor: SensorId,
        service_filter: Uuid,
    },
    DiscoverCharacteristics {
        sensor: SensorId,
        service: ServiceHandle,
    },
    SetNotify {
        sensor: SensorId,
        characteristic: CharacteristicHandle,
        enabled: bool,
    },
}

/// Events emitted by a radio adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    StateChanged(AdapterState),
    PeripheralDiscovered {
        sensor: SensorId,
        name: Option<String>,
        rssi: Option<i16>,
    },
    Connected(SensorId),
    ConnectFailed {
        sensor: SensorId,
        reason: String,
    },
    ServicesDiscovered {
        sensor: SensorId,
        services: Vec<GattService>,
    },
    DiscoveryFailed {
        sensor: SensorId,
        reason: String,
    },
    CharacteristicsDiscovered {
        sensor: SensorId,
        service: ServiceHandle,
        characteristics: Vec<GattCharacteristic>,
    },
    NotifyStateChanged {
        sensor: SensorId,
        characteristic: CharacteristicHandle,
        enabled: bool,
    },
    ValueUpdated {
        sensor: SensorId,
        characteristic: CharacteristicHandle,
        uuid: Uuid,
        value: Vec<u8>,
    },
    Disconnected {
        sensor: SensorId,
        reason: String,
    },
}

/// Command side of a radio adapter.
///
/// Implementations must not block: `submit` queues the command and returns.
pub trait RadioAdapter: Send + Sync {
    fn submit(&self, command: AdapterCommand);

    fn start_scan(&self, service_filter: Uuid) {
        self.submit(AdapterCommand::StartScan { service_filter });
    }

    fn stop_scan(&self) {
        self.submit(AdapterCommand::StopScan);
    }

    fn connect(&self, sensor: SensorId) {
        self.submit(AdapterCommand::Connect(sensor));
    }

    fn disconnect(&self, sensor: SensorId) {
        self.submit(AdapterCommand::Disconnect(sensor));
    }

    fn discover_services(&self, sensor: SensorId, service_filter: Uuid) {
        self.submit(AdapterCommand::DiscoverServices {
            sensor,
            service_filter,
        });
    }

    fn discover_characteristics(&self, sensor: SensorId, service: ServiceHandle) {
        self.submit(AdapterCommand::DiscoverCharacteristics { sensor, service });
    }

    fn set_notify(&self, sensor: SensorId, characteristic: CharacteristicHandle, enabled: bool) {
        self.submit(AdapterCommand::SetNotify {
            sensor,
            characteristic,
            enabled,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_uuids() {
        assert_eq!(
            HEART_RATE_SERVICE_UUID.to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            HEART_RATE_MEASUREMENT_UUID.to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_adapter_state_display() {
        assert_eq!(AdapterState::PoweredOn.to_string(), "powered on");
        assert_eq!(AdapterState::default().to_string(), "unknown");
    }

    #[test]
    fn test_adapter_error_display() {
        let err = AdapterError::Bluetooth("no adapter".to_string());
        assert_eq!(err.to_string(), "Bluetooth error: no adapter");
    }
}
