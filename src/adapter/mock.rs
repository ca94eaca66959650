//! In-process adapter that records commands and plays back scripted
//! peripherals. Used by tests and benchmarks in place of a radio.

use super::{
    AdapterCommand, AdapterEvent, CharacteristicHandle, CharacteristicProperties, EventSender,
    GattCharacteristic, GattService, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID,
    RadioAdapter, ServiceHandle, bluetooth_uuid,
};
use crate::sensor_id::SensorId;
use log::warn;
use std::sync::{Mutex, PoisonError};

/// Body Sensor Location characteristic (0x2A38), read-only.
pub const BODY_SENSOR_LOCATION_UUID: uuid::Uuid = bluetooth_uuid(0x2A38);

#[derive(Clone, Debug)]
pub struct MockService {
    pub service: GattService,
    pub characteristics: Vec<GattCharacteristic>,
}

/// A scripted peripheral.
#[derive(Clone, Debug)]
pub struct MockPeripheral {
    pub id: SensorId,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub connectable: bool,
    pub services: Vec<MockService>,
    /// Measurement payloads delivered once notifications are enabled
    pub notifications: Vec<Vec<u8>>,
    /// Drop the link with this reason after the last notification
    pub link_loss: Option<String>,
}

impl MockPeripheral {
    /// A sensor exposing the standard Heart Rate service: a notifying
    /// measurement characteristic and a readable body sensor location.
    pub fn heart_rate_sensor(id: SensorId, name: Option<&str>, rssi: Option<i16>) -> Self {
        let service = ServiceHandle(0x000b);
        Self {
            id,
            name: name.map(str::to_string),
            rssi,
            connectable: true,
            services: vec![MockService {
                service: GattService {
                    handle: service,
                    uuid: HEART_RATE_SERVICE_UUID,
                },
                characteristics: vec![
                    GattCharacteristic {
                        handle: CharacteristicHandle {
                            service,
                            id: 0x000c,
                        },
                        uuid: HEART_RATE_MEASUREMENT_UUID,
                        properties: CharacteristicProperties {
                            notify: true,
                            ..Default::default()
                        },
                    },
                    GattCharacteristic {
                        handle: CharacteristicHandle {
                            service,
                            id: 0x000f,
                        },
                        uuid: BODY_SENSOR_LOCATION_UUID,
                        properties: CharacteristicProperties {
                            read: true,
                            ..Default::default()
                        },
                    },
                ],
            }],
            notifications: Vec::new(),
            link_loss: None,
        }
    }

    pub fn with_notifications(mut self, notifications: Vec<Vec<u8>>) -> Self {
        self.notifications = notifications;
        self
    }

    pub fn with_link_loss(mut self, reason: &str) -> Self {
        self.link_loss = Some(reason.to_string());
        self
    }

    pub fn with_services(mut self, services: Vec<MockService>) -> Self {
        self.services = services;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.connectable = false;
        self
    }

    fn find_characteristic(&self, handle: CharacteristicHandle) -> Option<&GattCharacteristic> {
        self.services
            .iter()
            .flat_map(|s| &s.characteristics)
            .find(|c| c.handle == handle)
    }
}

/// Adapter double. Without peripherals it only records commands; with
/// peripherals it also answers each command the way a radio would.
#[derive(Debug)]
pub struct MockAdapter {
    events: EventSender,
    peripherals: Vec<MockPeripheral>,
    commands: Mutex<Vec<AdapterCommand>>,
}

impl MockAdapter {
    pub fn new(events: EventSender) -> Self {
        Self::with_peripherals(events, Vec::new())
    }

    pub fn with_peripherals(events: EventSender, peripherals: Vec<MockPeripheral>) -> Self {
        Self {
            events,
            peripherals,
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Commands submitted so far, oldest first.
    pub fn commands(&self) -> Vec<AdapterCommand> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain the recorded commands.
    pub fn take_commands(&self) -> Vec<AdapterCommand> {
        std::mem::take(&mut *self.commands.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn emit(&self, event: AdapterEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!("mock adapter dropped event: {e}");
        }
    }

    fn peripheral(&self, id: SensorId) -> Option<&MockPeripheral> {
        self.peripherals.iter().find(|p| p.id == id)
    }

    fn respond(&self, command: &AdapterCommand) {
        if self.peripherals.is_empty() {
            return;
        }

        match *command {
            AdapterCommand::StartScan { service_filter } => {
                for p in &self.peripherals {
                    if p.services.iter().any(|s| s.service.uuid == service_filter) {
                        self.emit(AdapterEvent::PeripheralDiscovered {
                            sensor: p.id,
                            name: p.name.clone(),
                            rssi: p.rssi,
                        });
                    }
                }
            }
            AdapterCommand::StopScan => {}
            AdapterCommand::Connect(sensor) => match self.peripheral(sensor) {
                Some(p) if p.connectable => self.emit(AdapterEvent::Connected(sensor)),
                Some(_) => self.emit(AdapterEvent::ConnectFailed {
                    sensor,
                    reason: "connection timed out".to_string(),
                }),
                None => self.emit(AdapterEvent::ConnectFailed {
                    sensor,
                    reason: "device not found".to_string(),
                }),
            },
            AdapterCommand::Disconnect(sensor) => self.emit(AdapterEvent::Disconnected {
                sensor,
                reason: "disconnected by host".to_string(),
            }),
            AdapterCommand::DiscoverServices {
                sensor,
                service_filter,
            } => match self.peripheral(sensor) {
                Some(p) => self.emit(AdapterEvent::ServicesDiscovered {
                    sensor,
                    services: p
                        .services
                        .iter()
                        .filter(|s| s.service.uuid == service_filter)
                        .map(|s| s.service.clone())
                        .collect(),
                }),
                None => self.emit(AdapterEvent::DiscoveryFailed {
                    sensor,
                    reason: "device not found".to_string(),
                }),
            },
            AdapterCommand::DiscoverCharacteristics { sensor, service } => {
                let found = self
                    .peripheral(sensor)
                    .and_then(|p| p.services.iter().find(|s| s.service.handle == service));
                match found {
                    Some(s) => self.emit(AdapterEvent::CharacteristicsDiscovered {
                        sensor,
                        service,
                        characteristics: s.characteristics.clone(),
                    }),
                    None => self.emit(AdapterEvent::DiscoveryFailed {
                        sensor,
                        reason: format!("service {:#06x} not found", service.0),
                    }),
                }
            }
            AdapterCommand::SetNotify {
                sensor,
                characteristic,
                enabled,
            } => {
                let Some(p) = self.peripheral(sensor) else {
                    self.emit(AdapterEvent::NotifyStateChanged {
                        sensor,
                        characteristic,
                        enabled: false,
                    });
                    return;
                };
                let chr = p.find_characteristic(characteristic);
                let supported = chr.is_some_and(|c| c.properties.notify || c.properties.indicate);
                self.emit(AdapterEvent::NotifyStateChanged {
                    sensor,
                    characteristic,
                    enabled: enabled && supported,
                });
                if let Some(chr) = chr.filter(|_| enabled && supported) {
                    for value in &p.notifications {
                        self.emit(AdapterEvent::ValueUpdated {
                            sensor,
                            characteristic,
                            uuid: chr.uuid,
                            value: value.clone(),
                        });
                    }
                    if let Some(reason) = &p.link_loss {
                        self.emit(AdapterEvent::Disconnected {
                            sensor,
                            reason: reason.clone(),
                        });
                    }
                }
            }
        }
    }
}

impl RadioAdapter for MockAdapter {
    fn submit(&self, command: AdapterCommand) {
        self.respond(&command);
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::event_channel;
    use crate::test_utils::{SENSOR_A, SENSOR_B};

    #[test]
    fn test_records_commands_without_script() {
        let (tx, mut rx) = event_channel();
        let adapter = MockAdapter::new(tx);

        adapter.start_scan(HEART_RATE_SERVICE_UUID);
        adapter.connect(SENSOR_A);

        assert_eq!(
            adapter.take_commands(),
            vec![
                AdapterCommand::StartScan {
                    service_filter: HEART_RATE_SERVICE_UUID
                },
                AdapterCommand::Connect(SENSOR_A),
            ]
        );
        assert!(adapter.commands().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_scripted_scan_and_connect() {
        let (tx, mut rx) = event_channel();
        let adapter = MockAdapter::with_peripherals(
            tx,
            vec![
                MockPeripheral::heart_rate_sensor(SENSOR_A, Some("A"), Some(-40)),
                MockPeripheral::heart_rate_sensor(SENSOR_B, None, None).unreachable(),
            ],
        );

        adapter.start_scan(HEART_RATE_SERVICE_UUID);
        assert!(matches!(
            rx.try_recv(),
            Ok(AdapterEvent::PeripheralDiscovered { sensor, .. }) if sensor == SENSOR_A
        ));
        assert!(matches!(
            rx.try_recv(),
            Ok(AdapterEvent::PeripheralDiscovered { sensor, .. }) if sensor == SENSOR_B
        ));

        adapter.connect(SENSOR_B);
        assert!(matches!(
            rx.try_recv(),
            Ok(AdapterEvent::ConnectFailed { sensor, .. }) if sensor == SENSOR_B
        ));
    }

    #[test]
    fn test_notify_on_read_only_characteristic_is_refused() {
        let (tx, mut rx) = event_channel();
        let peripheral = MockPeripheral::heart_rate_sensor(SENSOR_A, None, None)
            .with_notifications(vec![vec![0x00, 60]]);
        let location = peripheral.services[0].characteristics[1].handle;
        let adapter = MockAdapter::with_peripherals(tx, vec![peripheral]);

        adapter.set_notify(SENSOR_A, location, true);
        assert_eq!(
            rx.try_recv().unwrap(),
            AdapterEvent::NotifyStateChanged {
                sensor: SENSOR_A,
                characteristic: location,
                enabled: false,
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_notify_on_unknown_peripheral_is_answered() {
        let (tx, mut rx) = event_channel();
        let peripheral = MockPeripheral::heart_rate_sensor(SENSOR_A, None, None);
        let characteristic = peripheral.services[0].characteristics[0].handle;
        let adapter = MockAdapter::with_peripherals(tx, vec![peripheral]);

        adapter.set_notify(SENSOR_B, characteristic, true);
        assert_eq!(
            rx.try_recv().unwrap(),
            AdapterEvent::NotifyStateChanged {
                sensor: SENSOR_B,
                characteristic,
                enabled: false,
            }
        );
        assert!(rx.try_recv().is_err());
    }
}
