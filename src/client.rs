//! Client facade: the single coordination point for scanning, sensor
//! selection, and the live heart-rate reading.
//!
//! The client owns the sensor registry, the connection state machine, and the
//! receiving end of the adapter's event channel. Every mutation goes through
//! `&mut self`, so events are applied one at a time in arrival order.

use crate::adapter::{AdapterEvent, AdapterState, EventReceiver, HEART_RATE_SERVICE_UUID, RadioAdapter};
use crate::connection::{ConnectionError, ConnectionMachine, ConnectionState, Published};
use crate::measurement::HeartRateMeasurement;
use crate::registry::{RegistryError, SensorRecord, SensorRegistry};
use crate::sensor_id::SensorId;
use log::{debug, info};
use thiserror::Error;
use tokio::sync::watch;

/// Errors returned synchronously to callers of the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

pub struct HeartRateClient<A: RadioAdapter> {
    adapter: A,
    events: EventReceiver,
    registry: SensorRegistry,
    connection: ConnectionMachine,
    adapter_state: AdapterState,
    scanning: bool,
    latest: watch::Sender<Option<HeartRateMeasurement>>,
}

impl<A: RadioAdapter> HeartRateClient<A> {
    /// Create a client driving `adapter`, whose events arrive on `events`.
    pub fn new(adapter: A, events: EventReceiver) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            adapter,
            events,
            registry: SensorRegistry::new(),
            connection: ConnectionMachine::new(),
            adapter_state: AdapterState::Unknown,
            scanning: false,
            latest,
        }
    }

    /// Forget previously discovered sensors and scan for heart-rate sensors.
    pub fn scan(&mut self) {
        self.registry.clear();
        self.scanning = true;
        info!("Scanning for heart rate sensors");
        self.adapter.start_scan(HEART_RATE_SERVICE_UUID);
    }

    /// Stop scanning. Discovered sensors stay in the registry.
    pub fn stop_scan(&mut self) {
        self.scanning = false;
        info!("Scan stopped, {} sensors found", self.registry.len());
        self.adapter.stop_scan();
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Connect to the sensor at `index` in the registry.
    pub fn connect(&mut self, index: usize) -> Result<(), ClientError> {
        let sensor = self.registry.get(index)?.id;
        self.connection.connect(sensor, &self.adapter)?;
        self.latest.send_replace(None);
        Ok(())
    }

    /// Close the current connection. Returns `false` if nothing was connected
    /// or connecting.
    pub fn disconnect(&mut self) -> bool {
        if !self.connection.disconnect(&self.adapter) {
            return false;
        }
        self.latest.send_replace(None);
        true
    }

    /// A disconnect is still waiting for the adapter's confirmation.
    pub fn is_releasing(&self) -> bool {
        self.connection.awaiting_release()
    }

    /// The most recent decoded measurement of the current connection.
    pub fn latest_measurement(&self) -> Option<HeartRateMeasurement> {
        self.latest.borrow().clone()
    }

    /// Receive every published measurement; `None` after a disconnect.
    pub fn subscribe(&self) -> watch::Receiver<Option<HeartRateMeasurement>> {
        self.latest.subscribe()
    }

    pub fn current_state(&self) -> &ConnectionState {
        self.connection.state()
    }

    /// Sensor of the current or most recent connection attempt.
    pub fn sensor(&self) -> Option<SensorId> {
        self.connection.sensor()
    }

    pub fn sensors(&self) -> &[SensorRecord] {
        self.registry.list()
    }

    pub fn registry(&self) -> &SensorRegistry {
        &self.registry
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.adapter_state
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Wait for the next adapter event and apply it. Returns `false` once the
    /// adapter has closed its event channel.
    pub async fn process_next(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    /// Apply events until the adapter confirms a pending disconnect. Returns
    /// `false` if the event channel closed first.
    pub async fn wait_released(&mut self) -> bool {
        while self.is_releasing() {
            if !self.process_next().await {
                return false;
            }
        }
        true
    }

    /// Apply every event that has already arrived, without waiting.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Apply a single adapter event.
    pub fn handle_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::StateChanged(state) => {
                info!("Bluetooth adapter is {state}");
                self.adapter_state = state;
            }
            AdapterEvent::PeripheralDiscovered { sensor, name, rssi } => {
                if !self.scanning {
                    debug!("Ignoring discovery of {sensor} outside a scan");
                    return;
                }
                let record = SensorRecord::new(sensor, name, rssi);
                let label = record.display_name().to_string();
                if self.registry.upsert(record) {
                    info!("Found sensor {label} ({sensor}) RSSI={rssi:?}");
                } else {
                    debug!("Updated sensor {label} ({sensor}) RSSI={rssi:?}");
                }
            }
            event => match self.connection.handle_event(&event, &self.adapter) {
                Some(Published::Measurement(measurement)) => {
                    self.latest.send_replace(Some(measurement));
                }
                Some(Published::Cleared) => {
                    self.latest.send_replace(None);
                }
                None => {}
            },
        }
    }
}
