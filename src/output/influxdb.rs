//! InfluxDB line protocol output formatter.

use crate::measurement::HeartRateMeasurement;
use crate::output::OutputFormatter;
use crate::registry::SensorRecord;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Integer(num) => write!(f, "{num}i"),
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Boolean(b) => write!(f, "{b}"),
            FieldValue::String(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

/// Escape commas, spaces and equals signs in tag values.
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | ' ' | '=') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", key, escape_tag(value))?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", key, value)?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    if let Some(since_epoch) = data_point
        .timestamp
        .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
    {
        write!(fmt, " {}", since_epoch.as_nanos())?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement)?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// InfluxDB line protocol formatter.
///
/// Tags carry the sensor identity and display name; fields carry the heart
/// rate and whichever optional values the sensor reported.
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl InfluxDbFormatter {
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn tag_set(&self, sensor: &SensorRecord) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("sensor".to_string(), sensor.id.to_string());
        tags.insert("name".to_string(), sensor.display_name().to_string());
        tags
    }

    /// Optional values are omitted when the sensor did not report them.
    fn field_set(&self, m: &HeartRateMeasurement) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        fields.insert(
            "bpm".to_string(),
            FieldValue::Integer(i64::from(m.beats_per_minute)),
        );

        if let Some(contact) = m.contact() {
            fields.insert("contact_detected".to_string(), FieldValue::Boolean(contact));
        }
        if let Some(energy) = m.energy_expended_kj {
            fields.insert(
                "energy_expended".to_string(),
                FieldValue::Integer(i64::from(energy)),
            );
        }

        let rr_ms = m.rr_intervals_ms();
        if !rr_ms.is_empty() {
            let joined = rr_ms
                .iter()
                .map(|ms| ms.to_string())
                .collect::<Vec<_>>()
                .join(",");
            fields.insert("rr_interval_ms".to_string(), FieldValue::String(joined));
        }

        fields
    }

    fn to_data_point(
        &self,
        sensor: &SensorRecord,
        measurement: &HeartRateMeasurement,
        timestamp: SystemTime,
    ) -> DataPoint {
        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: self.tag_set(sensor),
            field_set: self.field_set(measurement),
            timestamp: Some(timestamp),
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(
        &self,
        sensor: &SensorRecord,
        measurement: &HeartRateMeasurement,
        timestamp: SystemTime,
    ) -> String {
        self.to_data_point(sensor, measurement, timestamp).to_string()
    }
}
