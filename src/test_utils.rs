use crate::adapter::{
    CharacteristicHandle, CharacteristicProperties, GattCharacteristic,
    HEART_RATE_MEASUREMENT_UUID, ServiceHandle,
};
use crate::decoder::{
    FLAG_ENERGY_EXPENDED, FLAG_HR_FORMAT_U16, FLAG_RR_INTERVALS, FLAG_SENSOR_CONTACT_DETECTED,
    FLAG_SENSOR_CONTACT_SUPPORTED,
};
use crate::measurement::HeartRateMeasurement;
use crate::sensor_id::SensorId;

/// Stable sensor identities for unit tests.
pub const SENSOR_A: SensorId = SensorId([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01]);
pub const SENSOR_B: SensorId = SensorId([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x02]);
pub const SENSOR_C: SensorId = SensorId([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x03]);

/// A notifying Heart Rate Measurement characteristic.
pub fn heart_rate_characteristic(service: ServiceHandle, id: u16) -> GattCharacteristic {
    GattCharacteristic {
        handle: CharacteristicHandle { service, id },
        uuid: HEART_RATE_MEASUREMENT_UUID,
        properties: CharacteristicProperties {
            notify: true,
            ..Default::default()
        },
    }
}

/// Encode a measurement the way a sensor would. The heart rate uses the
/// uint16 format only when it does not fit in a byte.
pub fn encode_measurement(m: &HeartRateMeasurement) -> Vec<u8> {
    let mut flags = 0u8;
    let mut body = Vec::new();

    match u8::try_from(m.beats_per_minute) {
        Ok(bpm) => body.push(bpm),
        Err(_) => {
            flags |= FLAG_HR_FORMAT_U16;
            body.extend_from_slice(&m.beats_per_minute.to_le_bytes());
        }
    }
    if m.sensor_contact_supported {
        flags |= FLAG_SENSOR_CONTACT_SUPPORTED;
    }
    if m.sensor_contact_detected {
        flags |= FLAG_SENSOR_CONTACT_DETECTED;
    }
    if let Some(energy) = m.energy_expended_kj {
        flags |= FLAG_ENERGY_EXPENDED;
        body.extend_from_slice(&energy.to_le_bytes());
    }
    if let Some(rr_intervals) = &m.rr_intervals {
        flags |= FLAG_RR_INTERVALS;
        for rr in rr_intervals {
            body.extend_from_slice(&rr.to_le_bytes());
        }
    }

    let mut payload = vec![flags];
    payload.extend(body);
    payload
}
