//! Heart Rate Measurement data structure.

/// RR-interval resolution: one unit is 1/1024 of a second.
pub const RR_INTERVAL_UNITS_PER_SECOND: f64 = 1024.0;

/// A decoded Heart Rate Measurement notification.
///
/// Each successful decode produces a fresh value; the next notification
/// replaces it rather than being merged into it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeartRateMeasurement {
    /// Heart rate in beats per minute
    pub beats_per_minute: u16,
    /// The sensor reports whether it has skin contact
    pub sensor_contact_supported: bool,
    /// Skin contact detected (only meaningful when contact is supported)
    pub sensor_contact_detected: bool,
    /// Cumulative energy expended in kilojoules
    pub energy_expended_kj: Option<u16>,
    /// Beat-to-beat intervals in 1/1024 second units, oldest first
    pub rr_intervals: Option<Vec<u16>>,
}

impl HeartRateMeasurement {
    /// Skin contact state, or `None` when the sensor does not report it.
    pub fn contact(&self) -> Option<bool> {
        self.sensor_contact_supported
            .then_some(self.sensor_contact_detected)
    }

    /// RR-intervals converted to milliseconds.
    pub fn rr_intervals_ms(&self) -> Vec<f64> {
        self.rr_intervals
            .iter()
            .flatten()
            .map(|&rr| f64::from(rr) * 1000.0 / RR_INTERVAL_UNITS_PER_SECOND)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_requires_support() {
        let mut m = HeartRateMeasurement {
            beats_per_minute: 60,
            sensor_contact_detected: true,
            ..Default::default()
        };
        assert_eq!(m.contact(), None);

        m.sensor_contact_supported = true;
        assert_eq!(m.contact(), Some(true));
    }

    #[test]
    fn test_rr_intervals_ms() {
        let m = HeartRateMeasurement {
            beats_per_minute: 60,
            rr_intervals: Some(vec![1024, 512]),
            ..Default::default()
        };
        assert_eq!(m.rr_intervals_ms(), vec![1000.0, 500.0]);

        let none = HeartRateMeasurement::default();
        assert!(none.rr_intervals_ms().is_empty());
    }
}
