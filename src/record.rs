use crate::error::RecordError;
use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Maximum number of bytes an identifier may occupy.
pub const SENSOR_ID_LEN: usize = 32;

/// Fixed-width, zero padded identifier of a measured entity.
///
/// Identifiers travel through journals, so they must be `Pod`. Anything longer
/// than [`SENSOR_ID_LEN`] bytes is rejected at construction.
#[repr(C)]
#[derive(Clone, Copy, Default, Pod, Zeroable, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SensorId([u8; SENSOR_ID_LEN]);

impl SensorId {
    pub fn new(identifier: &str) -> Result<Self, RecordError> {
        let bytes = identifier.as_bytes();
        if bytes.len() > SENSOR_ID_LEN {
            return Err(RecordError::IdentifierTooLong {
                identifier: identifier.to_string(),
                max: SENSOR_ID_LEN,
            });
        }
        if bytes.contains(&0) {
            return Err(RecordError::IdentifierContainsNul(identifier.to_string()));
        }
        let mut buf = [0u8; SENSOR_ID_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8] {
        let len = self.0.iter().position(|b| *b == 0).unwrap_or(SENSOR_ID_LEN);
        &self.0[..len]
    }

    /// Returns the identifier as text. Bytes are only ever written from a `&str`,
    /// so the lossy path is unreachable for ids built through [`SensorId::new`].
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }
}

impl TryFrom<&str> for SensorId {
    type Error = RecordError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Debug for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensorId({:?})", self.as_str())
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// A single active power observation in watts.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable, PartialEq)]
pub struct MeasurementRecord {
    pub identifier: SensorId,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub value: f64,
}

impl MeasurementRecord {
    pub fn new(identifier: SensorId, timestamp: i64, value: f64) -> Self {
        Self {
            identifier,
            timestamp,
            value,
        }
    }
}

/// A previous rollup over a group of sensors, re-aggregated as if it were a
/// single measurement.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable, PartialEq)]
pub struct AggregatedMeasurementRecord {
    pub identifier: SensorId,
    pub timestamp: i64,
    pub sum: f64,
}

impl AggregatedMeasurementRecord {
    pub fn new(identifier: SensorId, timestamp: i64, sum: f64) -> Self {
        Self {
            identifier,
            timestamp,
            sum,
        }
    }
}

impl From<&AggregatedMeasurementRecord> for MeasurementRecord {
    #[inline(always)]
    fn from(aggregated: &AggregatedMeasurementRecord) -> Self {
        Self {
            identifier: aggregated.identifier,
            timestamp: aggregated.timestamp,
            value: aggregated.sum,
        }
    }
}

/// Records that can be published to an output topic.
///
/// `Pod` is the encode/decode capability: a record is its own byte image.
pub trait StatsRecord: Pod + Send + 'static {}

impl<T: Pod + Send + 'static> StatsRecord for T {}

/// An output record together with the identifier it is keyed by on the topic.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Keyed<R: StatsRecord> {
    pub key: SensorId,
    pub value: R,
}

// `key` is 32 bytes with alignment 1, so `value` starts at an offset that is a
// multiple of any primitive alignment and the struct carries no padding.
unsafe impl<R: StatsRecord> Zeroable for Keyed<R> {}
unsafe impl<R: StatsRecord> Pod for Keyed<R> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_id_round_trip() {
        let id = SensorId::new("machine-42").unwrap();
        assert_eq!(id.as_str(), "machine-42");
        assert_eq!(id.to_string(), "machine-42");
        assert_eq!(id.as_bytes().len(), 10);
    }

    #[test]
    fn test_sensor_id_rejects_long_identifiers() {
        let long = "x".repeat(SENSOR_ID_LEN + 1);
        assert!(matches!(
            SensorId::new(&long),
            Err(RecordError::IdentifierTooLong { max: SENSOR_ID_LEN, .. })
        ));
        assert!(SensorId::new(&"x".repeat(SENSOR_ID_LEN)).is_ok());
    }

    #[test]
    fn test_sensor_id_rejects_nul() {
        assert!(SensorId::new("a\0b").is_err());
    }

    #[test]
    fn test_aggregated_projection() {
        let id = SensorId::new("root").unwrap();
        let aggregated = AggregatedMeasurementRecord::new(id, 1_000, 12.5);
        let projected = MeasurementRecord::from(&aggregated);
        assert_eq!(projected, MeasurementRecord::new(id, 1_000, 12.5));
    }

    #[test]
    fn test_keyed_layout_has_no_padding() {
        assert_eq!(size_of::<Keyed<f64>>(), SENSOR_ID_LEN + 8);
        assert_eq!(size_of::<Keyed<MeasurementRecord>>(), SENSOR_ID_LEN + 48);
    }
}
