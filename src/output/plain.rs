//! Human-readable output, one line per measurement.

use crate::measurement::HeartRateMeasurement;
use crate::output::OutputFormatter;
use crate::registry::SensorRecord;
use std::fmt::Write;
use std::time::SystemTime;

pub struct PlainFormatter;

impl OutputFormatter for PlainFormatter {
    fn format(
        &self,
        sensor: &SensorRecord,
        measurement: &HeartRateMeasurement,
        _timestamp: SystemTime,
    ) -> String {
        let mut line = format!(
            "{}: {} bpm",
            sensor.display_name(),
            measurement.beats_per_minute
        );

        match measurement.contact() {
            Some(true) => line.push_str(", contact"),
            Some(false) => line.push_str(", no contact"),
            None => {}
        }
        if let Some(energy) = measurement.energy_expended_kj {
            let _ = write!(line, ", {energy} kJ");
        }
        let rr_ms = measurement.rr_intervals_ms();
        if !rr_ms.is_empty() {
            let joined = rr_ms
                .iter()
                .map(|ms| format!("{ms:.0}"))
                .collect::<Vec<_>>()
                .join("/");
            let _ = write!(line, ", RR {joined} ms");
        }
        line
    }
}
