//! `hrm-listener` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. Scanning, the connection handshake and measurement
//! decoding live in [`crate::client`] and [`crate::connection`], driven through
//! the [`adapter::RadioAdapter`] contract so they can be tested with the
//! scripted [`adapter::mock::MockAdapter`].

pub mod adapter;
pub mod app;
pub mod client;
pub mod connection;
pub mod decoder;
pub mod duration;
pub mod measurement;
pub mod output;
pub mod registry;
pub mod sensor_id;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use adapter::{AdapterCommand, AdapterError, AdapterEvent, AdapterState, RadioAdapter};
pub use client::{ClientError, HeartRateClient};
pub use connection::{ConnectionError, ConnectionState, DisconnectReason};
pub use decoder::{DecodeError, decode};
pub use duration::parse_duration;
pub use measurement::HeartRateMeasurement;
pub use output::influxdb::InfluxDbFormatter;
pub use output::{OutputFormat, OutputFormatter};
pub use registry::{RegistryError, SensorRecord, SensorRegistry};
pub use sensor_id::SensorId;
