//! Benchmark suite for the measurement formatters.
//!
//! Isolates formatter performance from async runtime overhead to enable
//! precise measurement and optimization of the formatting logic.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use hrm_listener::output::plain::PlainFormatter;
use hrm_listener::{
    HeartRateMeasurement, InfluxDbFormatter, OutputFormatter, SensorId, SensorRecord,
};
use std::time::SystemTime;

const TEST_SENSOR: SensorId = SensorId([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Heart rate only
fn basic_measurement() -> HeartRateMeasurement {
    HeartRateMeasurement {
        beats_per_minute: 72,
        ..Default::default()
    }
}

/// Every optional field present
fn full_measurement() -> HeartRateMeasurement {
    HeartRateMeasurement {
        beats_per_minute: 148,
        sensor_contact_supported: true,
        sensor_contact_detected: true,
        energy_expended_kj: Some(212),
        rr_intervals: Some(vec![412, 418, 409, 415]),
    }
}

fn bench_formatters(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_measurement");
    group.throughput(Throughput::Elements(1));

    let sensor = SensorRecord::new(TEST_SENSOR, Some("Polar H10 A1B2C3".to_string()), Some(-58));
    let influxdb = InfluxDbFormatter::new("heart_rate".to_string());
    let plain = PlainFormatter;

    for (name, measurement) in [("basic", basic_measurement()), ("full", full_measurement())] {
        group.bench_function(format!("influxdb_{name}"), |b| {
            b.iter(|| {
                let output = influxdb.format(
                    black_box(&sensor),
                    black_box(&measurement),
                    SystemTime::UNIX_EPOCH,
                );
                black_box(output)
            })
        });

        group.bench_function(format!("plain_{name}"), |b| {
            b.iter(|| {
                let output = plain.format(
                    black_box(&sensor),
                    black_box(&measurement),
                    SystemTime::UNIX_EPOCH,
                );
                black_box(output)
            })
        });
    }

    group.finish();
}

/// Escaping cost for names with spaces, commas and equals signs
fn bench_tag_escaping(c: &mut Criterion) {
    let mut group = c.benchmark_group("tag_escaping");
    group.throughput(Throughput::Elements(1));

    let formatter = InfluxDbFormatter::new("heart_rate".to_string());
    let measurement = basic_measurement();

    for (name, sensor_name) in [
        ("plain_name", Some("HRV_SENSOR")),
        ("escaped_name", Some("Chest strap, left=1")),
        ("unnamed", None),
    ] {
        let sensor = SensorRecord::new(TEST_SENSOR, sensor_name.map(str::to_string), None);
        group.bench_function(name, |b| {
            b.iter(|| {
                black_box(formatter.format(
                    black_box(&sensor),
                    black_box(&measurement),
                    SystemTime::UNIX_EPOCH,
                ))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_formatters, bench_tag_escaping);
criterion_main!(benches);
