use crate::record::SensorId;
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::fmt::Debug;
use std::hash::Hash;

/// Derives the grouping key of a record from its identifier and local
/// date-time, and recovers the identifier from a key.
///
/// Implementations must be pure: the same inputs always yield the same key,
/// and `sensor_id(create_key(id, t)) == id` for every `t`.
pub trait StatsKeyFactory: Clone + Send + 'static {
    type Key: Clone + Eq + Ord + Hash + Debug + Send + 'static;

    fn create_key(&self, sensor_id: SensorId, date_time: &NaiveDateTime) -> Self::Key;

    fn sensor_id(&self, key: &Self::Key) -> SensorId;
}

/// Groups by identifier only, so statistics are per sensor and window.
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorKeyFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SensorKey {
    pub sensor_id: SensorId,
}

impl StatsKeyFactory for SensorKeyFactory {
    type Key = SensorKey;

    #[inline(always)]
    fn create_key(&self, sensor_id: SensorId, _date_time: &NaiveDateTime) -> SensorKey {
        SensorKey { sensor_id }
    }

    #[inline(always)]
    fn sensor_id(&self, key: &SensorKey) -> SensorId {
        key.sensor_id
    }
}

/// Buckets by local hour of day (0..=23).
#[derive(Debug, Clone, Copy, Default)]
pub struct HourOfDayKeyFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HourOfDayKey {
    pub sensor_id: SensorId,
    pub hour_of_day: u8,
}

impl StatsKeyFactory for HourOfDayKeyFactory {
    type Key = HourOfDayKey;

    fn create_key(&self, sensor_id: SensorId, date_time: &NaiveDateTime) -> HourOfDayKey {
        HourOfDayKey {
            sensor_id,
            hour_of_day: date_time.hour() as u8,
        }
    }

    fn sensor_id(&self, key: &HourOfDayKey) -> SensorId {
        key.sensor_id
    }
}

/// Buckets by local ISO day of week, Monday = 1 through Sunday = 7.
#[derive(Debug, Clone, Copy, Default)]
pub struct DayOfWeekKeyFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayOfWeekKey {
    pub sensor_id: SensorId,
    pub day_of_week: u8,
}

impl StatsKeyFactory for DayOfWeekKeyFactory {
    type Key = DayOfWeekKey;

    fn create_key(&self, sensor_id: SensorId, date_time: &NaiveDateTime) -> DayOfWeekKey {
        DayOfWeekKey {
            sensor_id,
            day_of_week: date_time.weekday().number_from_monday() as u8,
        }
    }

    fn sensor_id(&self, key: &DayOfWeekKey) -> SensorId {
        key.sensor_id
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HourOfWeekKeyFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HourOfWeekKey {
    pub sensor_id: SensorId,
    pub day_of_week: u8,
    pub hour_of_day: u8,
}

impl StatsKeyFactory for HourOfWeekKeyFactory {
    type Key = HourOfWeekKey;

    fn create_key(&self, sensor_id: SensorId, date_time: &NaiveDateTime) -> HourOfWeekKey {
        HourOfWeekKey {
            sensor_id,
            day_of_week: date_time.weekday().number_from_monday() as u8,
            hour_of_day: date_time.hour() as u8,
        }
    }

    fn sensor_id(&self, key: &HourOfWeekKey) -> SensorId {
        key.sensor_id
    }
}

/// Key factory assembled from two closures.
#[derive(Clone)]
pub struct FnKeyFactory<C, S> {
    create: C,
    inverse: S,
}

impl<K, C, S> StatsKeyFactory for FnKeyFactory<C, S>
where
    K: Clone + Eq + Ord + Hash + Debug + Send + 'static,
    C: Fn(SensorId, &NaiveDateTime) -> K + Clone + Send + 'static,
    S: Fn(&K) -> SensorId + Clone + Send + 'static,
{
    type Key = K;

    fn create_key(&self, sensor_id: SensorId, date_time: &NaiveDateTime) -> K {
        (self.create)(sensor_id, date_time)
    }

    fn sensor_id(&self, key: &K) -> SensorId {
        (self.inverse)(key)
    }
}

pub fn key_factory<K, C, S>(create: C, inverse: S) -> FnKeyFactory<C, S>
where
    C: Fn(SensorId, &NaiveDateTime) -> K + Clone + Send + 'static,
    S: Fn(&K) -> SensorId + Clone + Send + 'static,
{
    FnKeyFactory { create, inverse }
}
