//! BlueZ D-Bus backend for heart-rate sensors.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! One driver task owns the BlueZ adapter and receives [`AdapterCommand`]s.
//! Every GATT operation runs in its own task so a slow connect never blocks a
//! stop-scan. Scanning, link supervision and notification streams are
//! long-lived tasks that are aborted when the matching command arrives.

use super::{
    AdapterCommand, AdapterError, AdapterEvent, AdapterState, CharacteristicHandle,
    CharacteristicProperties, EventSender, GattCharacteristic, GattService, RadioAdapter,
    ServiceHandle,
};
use crate::sensor_id::SensorId;
use bluer::gatt::CharacteristicFlags;
use bluer::{
    Adapter, AdapterProperty, Device, DeviceEvent, DeviceProperty, DiscoveryFilter,
    DiscoveryTransport, Session,
};
use futures::StreamExt;
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Services are polled this many times before discovery gives up
const SERVICES_RESOLVED_ATTEMPTS: u32 = 20;
const SERVICES_RESOLVED_INTERVAL: Duration = Duration::from_millis(250);

impl From<bluer::Error> for AdapterError {
    fn from(err: bluer::Error) -> Self {
        AdapterError::Bluetooth(err.to_string())
    }
}

/// Radio adapter backed by the default BlueZ controller.
#[derive(Debug, Clone)]
pub struct BluerAdapter {
    commands: mpsc::UnboundedSender<AdapterCommand>,
}

impl BluerAdapter {
    /// Power on the default controller and start the driver task. Events are
    /// delivered on `events` until the adapter is dropped.
    pub async fn new(events: EventSender) -> Result<Self, AdapterError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        info!("Using Bluetooth adapter {}", adapter.name());

        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Driver {
            _session: session,
            power: spawn_power_watch(adapter.clone(), events.clone()),
            adapter,
            events,
            scan: None,
            links: HashMap::new(),
            notifications: HashMap::new(),
            releases: HashMap::new(),
        };
        tokio::spawn(driver.run(rx));

        Ok(Self { commands: tx })
    }
}

impl RadioAdapter for BluerAdapter {
    fn submit(&self, command: AdapterCommand) {
        if let Err(e) = self.commands.send(command) {
            warn!("Bluetooth driver has stopped, dropping {:?}", e.0);
        }
    }
}

async fn emit(events: &EventSender, event: AdapterEvent) {
    if events.send(event).await.is_err() {
        debug!("Event receiver closed");
    }
}

fn properties(flags: &CharacteristicFlags) -> CharacteristicProperties {
    CharacteristicProperties {
        read: flags.read,
        write: flags.write || flags.write_without_response,
        notify: flags.notify,
        indicate: flags.indicate,
    }
}

/// Report powered on/off transitions of the controller.
fn spawn_power_watch(adapter: Adapter, events: EventSender) -> JoinHandle<()> {
    tokio::spawn(async move {
        emit(&events, AdapterEvent::StateChanged(AdapterState::PoweredOn)).await;

        let changes = match adapter.events().await {
            Ok(changes) => changes,
            Err(e) => {
                warn!("Cannot watch adapter {}: {e}", adapter.name());
                return;
            }
        };
        let mut changes = Box::pin(changes);
        while let Some(event) = changes.next().await {
            if let bluer::AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
                let state = if powered {
                    AdapterState::PoweredOn
                } else {
                    AdapterState::PoweredOff
                };
                emit(&events, AdapterEvent::StateChanged(state)).await;
            }
        }
    })
}

struct Driver {
    // Keep the D-Bus connection alive for as long as the driver runs
    _session: Session,
    adapter: Adapter,
    events: EventSender,
    power: JoinHandle<()>,
    scan: Option<JoinHandle<()>>,
    /// Link supervision per connected sensor
    links: HashMap<SensorId, JoinHandle<()>>,
    notifications: HashMap<(SensorId, CharacteristicHandle), JoinHandle<()>>,
    /// Disconnects in flight; the next connect or disconnect of the same
    /// sensor waits for them so events keep command order
    releases: HashMap<SensorId, JoinHandle<()>>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<AdapterCommand>) {
        while let Some(command) = commands.recv().await {
            debug!("Bluetooth command {command:?}");
            self.handle(command);
        }

        debug!("Command channel closed, stopping Bluetooth driver");
        self.stop_scan();
        self.power.abort();
        let sensors: Vec<SensorId> = self.links.keys().copied().collect();
        for sensor in sensors {
            self.release(sensor);
        }
    }

    fn handle(&mut self, command: AdapterCommand) {
        match command {
            AdapterCommand::StartScan { service_filter } => {
                self.stop_scan();
                self.scan = Some(tokio::spawn(scan(
                    self.adapter.clone(),
                    service_filter,
                    self.events.clone(),
                )));
            }
            AdapterCommand::StopScan => self.stop_scan(),
            AdapterCommand::Connect(sensor) => {
                self.release(sensor);
                let link = tokio::spawn(connect(
                    self.adapter.clone(),
                    sensor,
                    self.releases.remove(&sensor),
                    self.events.clone(),
                ));
                self.links.insert(sensor, link);
            }
            AdapterCommand::Disconnect(sensor) => {
                self.release(sensor);
                let previous = self.releases.remove(&sensor);
                let release = tokio::spawn(disconnect(
                    self.adapter.clone(),
                    sensor,
                    previous,
                    self.events.clone(),
                ));
                self.releases.insert(sensor, release);
            }
            AdapterCommand::DiscoverServices {
                sensor,
                service_filter,
            } => {
                let (adapter, events) = (self.adapter.clone(), self.events.clone());
                tokio::spawn(async move {
                    let event = match discover_services(&adapter, sensor, service_filter).await {
                        Ok(services) => AdapterEvent::ServicesDiscovered { sensor, services },
                        Err(e) => AdapterEvent::DiscoveryFailed {
                            sensor,
                            reason: e.to_string(),
                        },
                    };
                    emit(&events, event).await;
                });
            }
            AdapterCommand::DiscoverCharacteristics { sensor, service } => {
                let (adapter, events) = (self.adapter.clone(), self.events.clone());
                tokio::spawn(async move {
                    let event = match discover_characteristics(&adapter, sensor, service).await {
                        Ok(characteristics) => AdapterEvent::CharacteristicsDiscovered {
                            sensor,
                            service,
                            characteristics,
                        },
                        Err(e) => AdapterEvent::DiscoveryFailed {
                            sensor,
                            reason: e.to_string(),
                        },
                    };
                    emit(&events, event).await;
                });
            }
            AdapterCommand::SetNotify {
                sensor,
                characteristic,
                enabled,
            } => {
                if let Some(stream) = self.notifications.remove(&(sensor, characteristic)) {
                    stream.abort();
                }
                if enabled {
                    let stream = tokio::spawn(stream_notifications(
                        self.adapter.clone(),
                        sensor,
                        characteristic,
                        self.events.clone(),
                    ));
                    self.notifications.insert((sensor, characteristic), stream);
                } else {
                    let events = self.events.clone();
                    tokio::spawn(async move {
                        emit(
                            &events,
                            AdapterEvent::NotifyStateChanged {
                                sensor,
                                characteristic,
                                enabled: false,
                            },
                        )
                        .await;
                    });
                }
            }
        }
    }

    /// Dropping the discovery stream ends the BlueZ discovery session.
    fn stop_scan(&mut self) {
        if let Some(scan) = self.scan.take() {
            scan.abort();
        }
    }

    /// Stop supervising `sensor` and close its notification streams.
    fn release(&mut self, sensor: SensorId) {
        if let Some(link) = self.links.remove(&sensor) {
            link.abort();
        }
        self.notifications.retain(|(owner, _), stream| {
            if *owner == sensor {
                stream.abort();
            }
            *owner != sensor
        });
    }
}

async fn scan(adapter: Adapter, service_filter: Uuid, events: EventSender) {
    let filter = DiscoveryFilter {
        uuids: HashSet::from([service_filter]),
        transport: DiscoveryTransport::Le,
        ..Default::default()
    };
    if let Err(e) = adapter.set_discovery_filter(filter).await {
        warn!("Cannot set discovery filter: {e}");
    }

    let discovered = match adapter.discover_devices().await {
        Ok(discovered) => discovered,
        Err(e) => {
            error!("Failed to start discovery: {e}");
            return;
        }
    };
    let mut discovered = Box::pin(discovered);

    while let Some(event) = discovered.next().await {
        let bluer::AdapterEvent::DeviceAdded(address) = event else {
            continue;
        };
        let Ok(device) = adapter.device(address) else {
            continue;
        };
        // Devices cached by BlueZ are reported regardless of the filter
        let advertises_service = device
            .uuids()
            .await
            .ok()
            .flatten()
            .is_some_and(|uuids| uuids.contains(&service_filter));
        if !advertises_service {
            debug!("Skipping {address}, no matching service advertised");
            continue;
        }

        let name = device.name().await.ok().flatten();
        let rssi = device.rssi().await.ok().flatten();
        emit(
            &events,
            AdapterEvent::PeripheralDiscovered {
                sensor: address.into(),
                name,
                rssi,
            },
        )
        .await;
    }
}

/// Wait for an earlier disconnect of the same sensor to report first.
async fn settle(previous: Option<JoinHandle<()>>) {
    if let Some(previous) = previous
        && let Err(e) = previous.await
    {
        debug!("Earlier disconnect did not finish: {e}");
    }
}

/// Connect, then watch the link until it drops.
async fn connect(
    adapter: Adapter,
    sensor: SensorId,
    previous: Option<JoinHandle<()>>,
    events: EventSender,
) {
    settle(previous).await;
    let device = match open_link(&adapter, sensor).await {
        Ok(device) => device,
        Err(e) => {
            emit(
                &events,
                AdapterEvent::ConnectFailed {
                    sensor,
                    reason: e.to_string(),
                },
            )
            .await;
            return;
        }
    };
    let changes = match device.events().await {
        Ok(changes) => changes,
        Err(e) => {
            warn!("{sensor}: cannot watch connection: {e}");
            emit(&events, AdapterEvent::Connected(sensor)).await;
            return;
        }
    };
    emit(&events, AdapterEvent::Connected(sensor)).await;

    let mut changes = Box::pin(changes);
    while let Some(event) = changes.next().await {
        if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
            emit(
                &events,
                AdapterEvent::Disconnected {
                    sensor,
                    reason: "connection lost".to_string(),
                },
            )
            .await;
            return;
        }
    }
}

async fn open_link(adapter: &Adapter, sensor: SensorId) -> bluer::Result<Device> {
    let device = adapter.device(sensor.into())?;
    if !device.is_connected().await? {
        info!("Connecting to {sensor}...");
        device.connect().await?;
    }
    Ok(device)
}

async fn disconnect(
    adapter: Adapter,
    sensor: SensorId,
    previous: Option<JoinHandle<()>>,
    events: EventSender,
) {
    settle(previous).await;
    let result = match adapter.device(sensor.into()) {
        Ok(device) => device.disconnect().await,
        Err(e) => Err(e),
    };
    let reason = match result {
        Ok(()) => "disconnected by host".to_string(),
        Err(e) => format!("disconnect failed: {e}"),
    };
    emit(&events, AdapterEvent::Disconnected { sensor, reason }).await;
}

async fn discover_services(
    adapter: &Adapter,
    sensor: SensorId,
    service_filter: Uuid,
) -> Result<Vec<GattService>, AdapterError> {
    let device = adapter.device(sensor.into())?;

    let mut resolved = false;
    for _ in 0..SERVICES_RESOLVED_ATTEMPTS {
        if device.is_services_resolved().await? {
            resolved = true;
            break;
        }
        tokio::time::sleep(SERVICES_RESOLVED_INTERVAL).await;
    }
    if !resolved {
        return Err(AdapterError::Bluetooth(
            "timed out waiting for services to resolve".to_string(),
        ));
    }

    let mut services = Vec::new();
    for service in device.services().await? {
        let uuid = service.uuid().await?;
        if uuid == service_filter {
            services.push(GattService {
                handle: ServiceHandle(service.id()),
                uuid,
            });
        }
    }
    Ok(services)
}

async fn discover_characteristics(
    adapter: &Adapter,
    sensor: SensorId,
    service: ServiceHandle,
) -> Result<Vec<GattCharacteristic>, AdapterError> {
    let device = adapter.device(sensor.into())?;
    let remote = device.service(service.0).await?;

    let mut characteristics = Vec::new();
    for chr in remote.characteristics().await? {
        characteristics.push(GattCharacteristic {
            handle: CharacteristicHandle {
                service,
                id: chr.id(),
            },
            uuid: chr.uuid().await?,
            properties: properties(&chr.flags().await?),
        });
    }
    Ok(characteristics)
}

/// Enable notifications and forward every value until the task is aborted.
async fn stream_notifications(
    adapter: Adapter,
    sensor: SensorId,
    characteristic: CharacteristicHandle,
    events: EventSender,
) {
    let subscribed = async {
        let device = adapter.device(sensor.into())?;
        let chr = device
            .service(characteristic.service.0)
            .await?
            .characteristic(characteristic.id)
            .await?;
        let uuid = chr.uuid().await?;
        let values = chr.notify().await?;
        Ok::<_, bluer::Error>((uuid, values))
    };

    let (uuid, values) = match subscribed.await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!("{sensor}: cannot enable notifications on {characteristic:?}: {e}");
            emit(
                &events,
                AdapterEvent::NotifyStateChanged {
                    sensor,
                    characteristic,
                    enabled: false,
                },
            )
            .await;
            return;
        }
    };
    emit(
        &events,
        AdapterEvent::NotifyStateChanged {
            sensor,
            characteristic,
            enabled: true,
        },
    )
    .await;

    let mut values = Box::pin(values);
    while let Some(value) = values.next().await {
        emit(
            &events,
            AdapterEvent::ValueUpdated {
                sensor,
                characteristic,
                uuid,
                value,
            },
        )
        .await;
    }
    debug!("{sensor}: notification stream on {characteristic:?} ended");
}
