//! Core application runner for `hrm-listener`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit codes
//! so it can be tested deterministically with a scripted adapter.

use crate::adapter::{AdapterError, RadioAdapter};
use crate::client::{ClientError, HeartRateClient};
use crate::connection::{ConnectionError, ConnectionState};
use crate::duration::parse_duration;
use crate::output::OutputFormat;
use clap::Parser;
use log::info;
use std::io;
use std::io::Write;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// How long to scan for heart rate sensors before connecting.
    /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, default_value = "3s", value_parser = parse_duration)]
    pub scan_duration: Duration,

    /// Index of the sensor to connect to, in discovery order
    #[arg(long, default_value_t = 0)]
    pub sensor: usize,

    /// Print the discovered sensors and exit without connecting
    #[arg(long)]
    pub list: bool,

    /// Exit after printing this many measurements
    #[arg(long)]
    pub count: Option<usize>,

    /// Output format for measurements
    #[arg(long, default_value_t, value_enum)]
    pub format: OutputFormat,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "heart_rate")]
    pub influxdb_measurement: String,

    /// Verbose output, log handshake steps and discarded notifications
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("no heart rate sensors found")]
    NoSensors,
    #[error("Bluetooth adapter stopped delivering events")]
    AdapterClosed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn write_sensor_list<A: RadioAdapter>(
    client: &HeartRateClient<A>,
    out: &mut dyn Write,
) -> io::Result<()> {
    for (index, sensor) in client.sensors().iter().enumerate() {
        let rssi = sensor
            .rssi
            .map_or_else(|| "?".to_string(), |rssi| rssi.to_string());
        writeln!(
            out,
            "{index}\t{}\t{}\trssi={rssi}",
            sensor.id,
            sensor.display_name()
        )?;
    }
    Ok(())
}

/// Scan for the configured window while applying adapter events.
async fn scan<A: RadioAdapter>(
    options: &Options,
    client: &mut HeartRateClient<A>,
) -> Result<(), RunError> {
    client.scan();

    let deadline = tokio::time::sleep(options.scan_duration);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            open = client.process_next() => {
                if !open {
                    return Err(RunError::AdapterClosed);
                }
            }
        }
    }

    client.stop_scan();
    Ok(())
}

/// Run the core processing loop, writing formatted output to `out`.
///
/// - Scans for `options.scan_duration` and stops the scan.
/// - With `options.list`, writes the discovered sensors and returns.
/// - Otherwise connects to `options.sensor` and writes one line per decoded
///   measurement until `options.count` is reached or the link drops.
pub async fn run_with_io<A: RadioAdapter>(
    options: &Options,
    client: &mut HeartRateClient<A>,
    out: &mut dyn Write,
) -> Result<(), RunError> {
    let formatter = options
        .format
        .formatter(options.influxdb_measurement.clone());

    scan(options, client).await?;

    if options.list {
        write_sensor_list(client, out)?;
        return Ok(());
    }
    if client.sensors().is_empty() {
        return Err(RunError::NoSensors);
    }

    let sensor = client
        .registry()
        .get(options.sensor)
        .cloned()
        .map_err(ClientError::from)?;
    info!("Connecting to {} ({})", sensor.display_name(), sensor.id);
    client.connect(options.sensor)?;

    let mut readings = client.subscribe();
    let mut written = 0;

    while options.count.is_none_or(|count| written < count) {
        if !client.process_next().await {
            return Err(RunError::AdapterClosed);
        }

        if let ConnectionState::Disconnected(reason) = client.current_state() {
            return match reason.handshake_error() {
                Some(error) => Err(error.into()),
                None => {
                    info!("{} disconnected: {reason}", sensor.display_name());
                    Ok(())
                }
            };
        }

        if readings.has_changed().unwrap_or(false) {
            let latest = readings.borrow_and_update().clone();
            if let Some(measurement) = latest {
                writeln!(
                    out,
                    "{}",
                    formatter.format(&sensor, &measurement, SystemTime::now())
                )?;
                written += 1;
            }
        }
    }

    Ok(())
}
