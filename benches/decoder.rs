//! Benchmarks for the Heart Rate Measurement decoder and for the path a
//! notification takes through the client while streaming.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use hrm_listener::adapter::mock::{MockAdapter, MockPeripheral};
use hrm_listener::adapter::{
    AdapterEvent, CharacteristicHandle, HEART_RATE_MEASUREMENT_UUID, ServiceHandle, event_channel,
};
use hrm_listener::{ConnectionState, HeartRateClient, SensorId, decode};

const TEST_SENSOR: SensorId = SensorId([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Flags only, 8-bit heart rate
fn minimal_payload() -> Vec<u8> {
    vec![0x00, 0x48]
}

/// 16-bit heart rate with contact, energy and two RR intervals
fn full_payload() -> Vec<u8> {
    vec![
        0x1F, // u16 format, contact supported + detected, energy, RR
        0x2C, 0x01, // 300 bpm
        0x10, 0x00, // 16 kJ
        0x00, 0x04, // RR 1024
        0x1A, 0x04, // RR 1050
    ]
}

/// RR intervals filling a 23-byte ATT payload
fn rr_heavy_payload() -> Vec<u8> {
    let mut payload = vec![0x10, 0x3C];
    for _ in 0..10 {
        payload.extend_from_slice(&[0x00, 0x04]);
    }
    payload
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));

    for (name, payload) in [
        ("minimal", minimal_payload()),
        ("full", full_payload()),
        ("rr_heavy", rr_heavy_payload()),
        ("truncated", vec![0x01, 0x2C]),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &payload, |b, payload| {
            b.iter(|| black_box(decode(black_box(payload))))
        });
    }

    group.finish();
}

/// A client that has completed the handshake against a scripted sensor.
fn streaming_client() -> HeartRateClient<MockAdapter> {
    let (tx, rx) = event_channel();
    let adapter = MockAdapter::with_peripherals(
        tx,
        vec![MockPeripheral::heart_rate_sensor(TEST_SENSOR, Some("bench"), None)],
    );
    let mut client = HeartRateClient::new(adapter, rx);
    client.scan();
    client.process_pending();
    client.stop_scan();
    let _ = client.connect(0);
    client.process_pending();
    assert_eq!(client.current_state(), &ConnectionState::Streaming);
    client
}

fn bench_streaming(c: &mut Criterion) {
    let mut group = c.benchmark_group("streaming");
    group.throughput(Throughput::Elements(1));

    let mut client = streaming_client();
    let characteristic = CharacteristicHandle {
        service: ServiceHandle(0x000b),
        id: 0x000c,
    };
    let payload = full_payload();

    group.bench_function("handle_notification", |b| {
        b.iter(|| {
            client.handle_event(AdapterEvent::ValueUpdated {
                sensor: TEST_SENSOR,
                characteristic,
                uuid: HEART_RATE_MEASUREMENT_UUID,
                value: black_box(payload.clone()),
            });
            black_box(client.latest_measurement())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_decode, bench_streaming);
criterion_main!(benches);
