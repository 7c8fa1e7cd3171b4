use crate::record::MeasurementRecord;
use bytemuck::{Pod, Zeroable};

/// Running count, sum, min and max of the values absorbed for one window.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq)]
pub struct SummaryStatistics {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    /// Largest record timestamp absorbed so far.
    pub last_timestamp: i64,
}

impl SummaryStatistics {
    /// The identity element: absorbing into it yields the record itself.
    pub const fn empty() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            last_timestamp: i64::MIN,
        }
    }

    #[inline(always)]
    pub fn absorb(&mut self, record: &MeasurementRecord) {
        self.count += 1;
        self.sum += record.value;
        self.min = self.min.min(record.value);
        self.max = self.max.max(record.value);
        self.last_timestamp = self.last_timestamp.max(record.timestamp);
    }

    /// `None` until at least one value has been absorbed.
    #[inline(always)]
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.sum / self.count as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for SummaryStatistics {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SensorId;

    fn record(ts: i64, value: f64) -> MeasurementRecord {
        MeasurementRecord::new(SensorId::new("s").unwrap(), ts, value)
    }

    #[test]
    fn test_empty_identity() {
        let stats = SummaryStatistics::default();
        assert!(stats.is_empty());
        assert_eq!(stats.mean(), None);
        assert_eq!(stats.min, f64::INFINITY);
        assert_eq!(stats.max, f64::NEG_INFINITY);
    }

    #[test]
    fn test_absorb_updates_all_fields() {
        let mut stats = SummaryStatistics::empty();
        stats.absorb(&record(300, 4.0));
        stats.absorb(&record(100, -2.0));
        stats.absorb(&record(200, 10.0));

        assert_eq!(stats.count, 3);
        assert_eq!(stats.sum, 12.0);
        assert_eq!(stats.min, -2.0);
        assert_eq!(stats.max, 10.0);
        assert_eq!(stats.last_timestamp, 300);
        assert_eq!(stats.mean(), Some(4.0));
    }

    #[test]
    fn test_sum_follows_arrival_order() {
        let values = [0.1, 0.2, 0.3, 1e16, -1e16];
        let mut stats = SummaryStatistics::empty();
        for (i, v) in values.iter().enumerate() {
            stats.absorb(&record(i as i64, *v));
        }
        let expected = values.iter().fold(0.0, |acc, v| acc + v);
        assert_eq!(stats.sum.to_bits(), expected.to_bits());
    }
}
