use crate::key::{DayOfWeekKey, HourOfDayKey, HourOfWeekKey, SensorKey};
use crate::record::{SensorId, StatsRecord};
use crate::stats::SummaryStatistics;
use crate::window::Windowed;
use bytemuck::{Pod, Zeroable};

/// Turns the statistics of one window into the record published downstream.
///
/// Called only on statistics that absorbed at least one value.
pub trait StatsRecordFactory<K>: Clone + Send + 'static {
    type Record: StatsRecord;

    fn create(&self, key: &Windowed<K>, stats: &SummaryStatistics) -> Self::Record;
}

/// Record factory backed by a closure.
#[derive(Clone)]
pub struct FnRecordFactory<F> {
    f: F,
}

impl<K, R, F> StatsRecordFactory<K> for FnRecordFactory<F>
where
    R: StatsRecord,
    F: Fn(&Windowed<K>, &SummaryStatistics) -> R + Clone + Send + 'static,
{
    type Record = R;

    fn create(&self, key: &Windowed<K>, stats: &SummaryStatistics) -> R {
        (self.f)(key, stats)
    }
}

pub fn record_factory<K, R, F>(f: F) -> FnRecordFactory<F>
where
    R: StatsRecord,
    F: Fn(&Windowed<K>, &SummaryStatistics) -> R + Clone + Send + 'static,
{
    FnRecordFactory { f }
}

fn mean_or_zero(stats: &SummaryStatistics) -> f64 {
    stats.mean().unwrap_or(0.0)
}

/// Statistics of one sensor over one window.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable, PartialEq)]
pub struct WindowStatsRecord {
    pub sensor_id: SensorId,
    pub window_start: i64,
    pub window_end: i64,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowStatsRecordFactory;

impl StatsRecordFactory<SensorKey> for WindowStatsRecordFactory {
    type Record = WindowStatsRecord;

    fn create(&self, key: &Windowed<SensorKey>, stats: &SummaryStatistics) -> WindowStatsRecord {
        WindowStatsRecord {
            sensor_id: key.key.sensor_id,
            window_start: key.window.start,
            window_end: key.window.end,
            count: stats.count,
            sum: stats.sum,
            min: stats.min,
            max: stats.max,
            mean: mean_or_zero(stats),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable, PartialEq)]
pub struct HourOfDayStatsRecord {
    pub sensor_id: SensorId,
    pub hour_of_day: u32,
    pub _pad: u32,
    pub period_start: i64,
    pub period_end: i64,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HourOfDayRecordFactory;

impl StatsRecordFactory<HourOfDayKey> for HourOfDayRecordFactory {
    type Record = HourOfDayStatsRecord;

    fn create(
        &self,
        key: &Windowed<HourOfDayKey>,
        stats: &SummaryStatistics,
    ) -> HourOfDayStatsRecord {
        HourOfDayStatsRecord {
            sensor_id: key.key.sensor_id,
            hour_of_day: key.key.hour_of_day as u32,
            _pad: 0,
            period_start: key.window.start,
            period_end: key.window.end,
            count: stats.count,
            sum: stats.sum,
            min: stats.min,
            max: stats.max,
            mean: mean_or_zero(stats),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable, PartialEq)]
pub struct DayOfWeekStatsRecord {
    pub sensor_id: SensorId,
    pub day_of_week: u32,
    pub _pad: u32,
    pub period_start: i64,
    pub period_end: i64,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DayOfWeekRecordFactory;

impl StatsRecordFactory<DayOfWeekKey> for DayOfWeekRecordFactory {
    type Record = DayOfWeekStatsRecord;

    fn create(
        &self,
        key: &Windowed<DayOfWeekKey>,
        stats: &SummaryStatistics,
    ) -> DayOfWeekStatsRecord {
        DayOfWeekStatsRecord {
            sensor_id: key.key.sensor_id,
            day_of_week: key.key.day_of_week as u32,
            _pad: 0,
            period_start: key.window.start,
            period_end: key.window.end,
            count: stats.count,
            sum: stats.sum,
            min: stats.min,
            max: stats.max,
            mean: mean_or_zero(stats),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable, PartialEq)]
pub struct HourOfWeekStatsRecord {
    pub sensor_id: SensorId,
    pub day_of_week: u32,
    pub hour_of_day: u32,
    pub period_start: i64,
    pub period_end: i64,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HourOfWeekRecordFactory;

impl StatsRecordFactory<HourOfWeekKey> for HourOfWeekRecordFactory {
    type Record = HourOfWeekStatsRecord;

    fn create(
        &self,
        key: &Windowed<HourOfWeekKey>,
        stats: &SummaryStatistics,
    ) -> HourOfWeekStatsRecord {
        HourOfWeekStatsRecord {
            sensor_id: key.key.sensor_id,
            day_of_week: key.key.day_of_week as u32,
            hour_of_day: key.key.hour_of_day as u32,
            period_start: key.window.start,
            period_end: key.window.end,
            count: stats.count,
            sum: stats.sum,
            min: stats.min,
            max: stats.max,
            mean: mean_or_zero(stats),
        }
    }
}
