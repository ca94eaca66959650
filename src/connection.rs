//! Connection state machine for a single heart-rate sensor.
//!
//! Drives the GATT handshake one adapter event at a time:
//!
//! ```text
//! Idle -> Connecting -> DiscoveringServices -> DiscoveringCharacteristics
//!      -> Subscribing -> Streaming
//! ```
//!
//! Any failure, and any link loss, ends in `Disconnected(reason)`, from which
//! a new `connect` starts over. Event handling never fails outward: events
//! that do not fit the current state are logged and dropped.

use crate::adapter::{
    AdapterEvent, CharacteristicHandle, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID,
    RadioAdapter, ServiceHandle,
};
use crate::decoder;
use crate::measurement::HeartRateMeasurement;
use crate::sensor_id::SensorId;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    NoHeartRateService,
    NoNotifiableCharacteristic,
    ConnectFailed(String),
    DiscoveryFailed(String),
    /// The link dropped after it was established
    LinkLost(String),
    /// The host closed the connection
    Requested,
}

impl DisconnectReason {
    /// The handshake error behind this disconnect, if the handshake failed.
    pub fn handshake_error(&self) -> Option<ConnectionError> {
        match self {
            DisconnectReason::NoHeartRateService => Some(ConnectionError::NoHeartRateService),
            DisconnectReason::NoNotifiableCharacteristic => {
                Some(ConnectionError::NoNotifiableCharacteristic)
            }
            DisconnectReason::ConnectFailed(reason) => {
                Some(ConnectionError::ConnectFailed(reason.clone()))
            }
            DisconnectReason::DiscoveryFailed(reason) => {
                Some(ConnectionError::DiscoveryFailed(reason.clone()))
            }
            DisconnectReason::LinkLost(_) | DisconnectReason::Requested => None,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::NoHeartRateService => f.write_str("no heart rate service"),
            DisconnectReason::NoNotifiableCharacteristic => {
                f.write_str("no notifiable characteristic")
            }
            DisconnectReason::ConnectFailed(reason) => write!(f, "connect failed: {reason}"),
            DisconnectReason::DiscoveryFailed(reason) => write!(f, "discovery failed: {reason}"),
            DisconnectReason::LinkLost(reason) => write!(f, "link lost: {reason}"),
            DisconnectReason::Requested => f.write_str("closed by host"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Subscribing,
    Streaming,
    Disconnected(DisconnectReason),
}

impl ConnectionState {
    /// `connect` is only accepted from these states.
    pub fn accepts_connect(&self) -> bool {
        matches!(self, ConnectionState::Idle | ConnectionState::Disconnected(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => f.write_str("idle"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::DiscoveringServices => f.write_str("discovering services"),
            ConnectionState::DiscoveringCharacteristics => {
                f.write_str("discovering characteristics")
            }
            ConnectionState::Subscribing => f.write_str("subscribing"),
            ConnectionState::Streaming => f.write_str("streaming"),
            ConnectionState::Disconnected(reason) => write!(f, "disconnected ({reason})"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("sensor does not expose the heart rate service")]
    NoHeartRateService,
    #[error("sensor has no characteristic that supports notifications")]
    NoNotifiableCharacteristic,
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("service discovery failed: {0}")]
    DiscoveryFailed(String),
    #[error("cannot connect while {0}")]
    InvalidState(String),
}

/// What a handled event means for the published reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Published {
    /// A new measurement replaces the previous one
    Measurement(HeartRateMeasurement),
    /// The connection ended; there is no current measurement
    Cleared,
}

/// Lifecycle of one sensor connection.
///
/// Holds only the identity of the sensor it drives, never the registry it
/// came from.
#[derive(Debug, Default)]
pub struct ConnectionMachine {
    state: ConnectionState,
    sensor: Option<SensorId>,
    pending_services: HashSet<ServiceHandle>,
    pending_notify: HashSet<CharacteristicHandle>,
    subscribed: HashSet<CharacteristicHandle>,
    /// Sensor whose host-initiated disconnect has not been confirmed yet
    awaiting_release: Option<SensorId>,
}

impl ConnectionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Sensor of the current or most recent connection attempt.
    pub fn sensor(&self) -> Option<SensorId> {
        self.sensor
    }

    /// A disconnect issued by this machine is still waiting for the adapter
    /// to confirm it.
    pub fn awaiting_release(&self) -> bool {
        self.awaiting_release.is_some()
    }

    /// Start a connection attempt. Rejected unless idle or disconnected; a
    /// rejected call leaves the current connection untouched.
    pub fn connect(
        &mut self,
        sensor: SensorId,
        adapter: &dyn RadioAdapter,
    ) -> Result<(), ConnectionError> {
        if !self.state.accepts_connect() {
            return Err(ConnectionError::InvalidState(self.state.to_string()));
        }

        self.pending_services.clear();
        self.pending_notify.clear();
        self.subscribed.clear();
        self.sensor = Some(sensor);
        self.transition(ConnectionState::Connecting);
        adapter.connect(sensor);
        Ok(())
    }

    /// Close the current connection or abandon an attempt in progress.
    /// Returns `false` if there was nothing to close.
    pub fn disconnect(&mut self, adapter: &dyn RadioAdapter) -> bool {
        if self.state.accepts_connect() {
            return false;
        }
        self.abandon(DisconnectReason::Requested, adapter);
        true
    }

    /// Apply one adapter event.
    pub fn handle_event(
        &mut self,
        event: &AdapterEvent,
        adapter: &dyn RadioAdapter,
    ) -> Option<Published> {
        let sensor = match event {
            AdapterEvent::StateChanged(_) | AdapterEvent::PeripheralDiscovered { .. } => {
                return None;
            }
            AdapterEvent::Connected(sensor)
            | AdapterEvent::ConnectFailed { sensor, .. }
            | AdapterEvent::ServicesDiscovered { sensor, .. }
            | AdapterEvent::DiscoveryFailed { sensor, .. }
            | AdapterEvent::CharacteristicsDiscovered { sensor, .. }
            | AdapterEvent::NotifyStateChanged { sensor, .. }
            | AdapterEvent::ValueUpdated { sensor, .. }
            | AdapterEvent::Disconnected { sensor, .. } => *sensor,
        };

        if let AdapterEvent::Disconnected { reason, .. } = event
            && self.awaiting_release == Some(sensor)
        {
            debug!("{sensor}: release confirmed ({reason})");
            self.awaiting_release = None;
            return None;
        }

        if self.sensor != Some(sensor) {
            debug!("Ignoring event for {sensor}, not the connected sensor");
            return None;
        }

        let state = self.state.clone();
        match (&state, event) {
            (ConnectionState::Connecting, AdapterEvent::Connected(_)) => {
                self.transition(ConnectionState::DiscoveringServices);
                adapter.discover_services(sensor, HEART_RATE_SERVICE_UUID);
                None
            }
            (ConnectionState::Connecting, AdapterEvent::ConnectFailed { reason, .. }) => {
                self.transition(ConnectionState::Disconnected(
                    DisconnectReason::ConnectFailed(reason.clone()),
                ));
                None
            }
            (ConnectionState::DiscoveringServices, AdapterEvent::ServicesDiscovered { services, .. }) => {
                self.pending_services = services
                    .iter()
                    .filter(|s| s.uuid == HEART_RATE_SERVICE_UUID)
                    .map(|s| s.handle)
                    .collect();

                if self.pending_services.is_empty() {
                    self.abandon(DisconnectReason::NoHeartRateService, adapter);
                    return None;
                }

                self.transition(ConnectionState::DiscoveringCharacteristics);
                for service in self.pending_services.iter().copied() {
                    adapter.discover_characteristics(sensor, service);
                }
                None
            }
            (
                ConnectionState::DiscoveringServices | ConnectionState::DiscoveringCharacteristics,
                AdapterEvent::DiscoveryFailed { reason, .. },
            ) => {
                self.abandon(DisconnectReason::DiscoveryFailed(reason.clone()), adapter);
                None
            }
            (
                ConnectionState::DiscoveringCharacteristics,
                AdapterEvent::CharacteristicsDiscovered {
                    service,
                    characteristics,
                    ..
                },
            ) => {
                if !self.pending_services.remove(service) {
                    warn!("Ignoring characteristics of unrequested service {:#06x}", service.0);
                    return None;
                }

                for chr in characteristics
                    .iter()
                    .filter(|c| c.properties.notify || c.properties.indicate)
                {
                    if self.pending_notify.insert(chr.handle) {
                        debug!("{}: characteristic {} supports notify", sensor, chr.uuid);
                        adapter.set_notify(sensor, chr.handle, true);
                    }
                }

                if self.pending_services.is_empty() {
                    if self.pending_notify.is_empty() {
                        self.finish_subscribing(adapter);
                    } else {
                        self.transition(ConnectionState::Subscribing);
                    }
                }
                None
            }
            (
                ConnectionState::DiscoveringCharacteristics | ConnectionState::Subscribing,
                AdapterEvent::NotifyStateChanged {
                    characteristic,
                    enabled,
                    ..
                },
            ) => {
                if !self.pending_notify.remove(characteristic) {
                    warn!("Ignoring notify state of unrequested characteristic {characteristic:?}");
                    return None;
                }
                if *enabled {
                    self.subscribed.insert(*characteristic);
                } else {
                    warn!("{sensor}: sensor refused notifications on {characteristic:?}");
                }

                if self.state == ConnectionState::Subscribing && self.pending_notify.is_empty() {
                    self.finish_subscribing(adapter);
                }
                None
            }
            (ConnectionState::Streaming, AdapterEvent::ValueUpdated { uuid, value, .. }) => {
                if *uuid != HEART_RATE_MEASUREMENT_UUID {
                    debug!("Unhandled characteristic {uuid}");
                    return None;
                }
                match decoder::decode(value) {
                    Ok(measurement) => {
                        debug!("{sensor}: {} bpm", measurement.beats_per_minute);
                        Some(Published::Measurement(measurement))
                    }
                    Err(e) => {
                        warn!("{sensor}: discarding notification {value:02x?}: {e}");
                        None
                    }
                }
            }
            (
                ConnectionState::Streaming,
                AdapterEvent::NotifyStateChanged {
                    characteristic,
                    enabled: false,
                    ..
                },
            ) => {
                self.subscribed.remove(characteristic);
                warn!("{sensor}: notifications stopped on {characteristic:?}");
                if self.subscribed.is_empty() {
                    self.abandon(DisconnectReason::NoNotifiableCharacteristic, adapter);
                    return Some(Published::Cleared);
                }
                None
            }
            (ConnectionState::Idle | ConnectionState::Disconnected(_), AdapterEvent::Disconnected { .. }) => {
                debug!("{sensor}: already disconnected");
                None
            }
            (_, AdapterEvent::Disconnected { reason, .. }) => {
                self.transition(ConnectionState::Disconnected(DisconnectReason::LinkLost(
                    reason.clone(),
                )));
                Some(Published::Cleared)
            }
            (state, event) => {
                warn!("Ignoring {event:?} while {state}");
                None
            }
        }
    }

    fn finish_subscribing(&mut self, adapter: &dyn RadioAdapter) {
        if self.subscribed.is_empty() {
            self.abandon(DisconnectReason::NoNotifiableCharacteristic, adapter);
        } else {
            self.transition(ConnectionState::Streaming);
        }
    }

    /// End a handshake that cannot succeed and release the link.
    fn abandon(&mut self, reason: DisconnectReason, adapter: &dyn RadioAdapter) {
        if let Some(sensor) = self.sensor {
            self.awaiting_release = Some(sensor);
            adapter.disconnect(sensor);
        }
        self.transition(ConnectionState::Disconnected(reason));
    }

    fn transition(&mut self, next: ConnectionState) {
        match self.sensor {
            Some(sensor) => info!("{sensor}: {} -> {next}", self.state),
            None => info!("{} -> {next}", self.state),
        }
        self.state = next;
    }
}
