//! Output formatters for heart-rate measurements.
//!
//! This module provides a trait for formatting measurements and
//! implementations for InfluxDB line protocol and a plain human-readable line.

pub mod influxdb;
pub mod plain;

use crate::measurement::HeartRateMeasurement;
use crate::registry::SensorRecord;
use std::fmt;
use std::time::SystemTime;

/// Trait for formatting measurements into output lines.
pub trait OutputFormatter: Send + Sync {
    /// Format a measurement received from `sensor` at `timestamp`.
    fn format(
        &self,
        sensor: &SensorRecord,
        measurement: &HeartRateMeasurement,
        timestamp: SystemTime,
    ) -> String;
}

/// Available output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// InfluxDB line protocol (Telegraf compatible)
    #[default]
    Influxdb,
    /// One human-readable line per measurement
    Plain,
}

impl OutputFormat {
    pub fn formatter(self, influxdb_measurement: String) -> Box<dyn OutputFormatter> {
        match self {
            OutputFormat::Influxdb => {
                Box::new(influxdb::InfluxDbFormatter::new(influxdb_measurement))
            }
            OutputFormat::Plain => Box::new(plain::PlainFormatter),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Influxdb => write!(f, "influxdb"),
            OutputFormat::Plain => write!(f, "plain"),
        }
    }
}
