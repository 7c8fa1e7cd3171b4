use crate::error::StorageError;
use crate::formatter::{
    DayOfWeekStatsRecord, HourOfDayStatsRecord, HourOfWeekStatsRecord, WindowStatsRecord,
};
use crate::record::{SensorId, StatsRecord};
use crate::sink::Emission;
use crate::stage::{OutputCollector, Stage};
use crate::window::Window;
use fxhash::FxHashMap;
use spdlog::{info, warn};
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, Mutex, PoisonError};

/// A single column value as handed to a storage writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Real(f64),
}

impl From<SensorId> for Value {
    fn from(id: SensorId) -> Self {
        Value::Text(id.as_str().into_owned())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

/// One row to upsert: the primary key decides which row is replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageRow {
    pub table: String,
    pub primary_key: Vec<(String, Value)>,
    pub columns: Vec<(String, Value)>,
}

impl StorageRow {
    /// Builds a row, dropping from `columns` every column that is already
    /// part of the primary key.
    pub fn new(
        table: impl Into<String>,
        primary_key: Vec<(String, Value)>,
        columns: Vec<(String, Value)>,
    ) -> Self {
        let columns = columns
            .into_iter()
            .filter(|(name, _)| !primary_key.iter().any(|(pk, _)| pk == name))
            .collect();
        Self {
            table: table.into(),
            primary_key,
            columns,
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.all_columns()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Primary key columns first, then the rest.
    pub fn all_columns(&self) -> impl Iterator<Item = &(String, Value)> {
        self.primary_key.iter().chain(self.columns.iter())
    }
}

/// An upsert-capable store. Implementations must be usable from every
/// partition worker at once.
pub trait StatsWriter: Send + Sync {
    fn upsert(&self, row: &StorageRow) -> Result<(), StorageError>;
}

/// Records that know their table and how to lay themselves out as columns.
pub trait StorageRecord {
    const TABLE: &'static str;

    fn columns(&self) -> Vec<(&'static str, Value)>;
}

fn owned(columns: Vec<(&'static str, Value)>) -> Vec<(String, Value)> {
    columns
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Maps an emission to the row it is stored as. Registered once per stat kind.
pub trait StorageKeySelector<R>: Send + Sync + 'static {
    fn select(&self, sensor_id: SensorId, window: &Window, record: &R) -> Result<StorageRow, StorageError>;
}

/// Keys rows by identifier and window bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowKeySelector;

impl<R: StorageRecord> StorageKeySelector<R> for WindowKeySelector {
    fn select(&self, sensor_id: SensorId, window: &Window, record: &R) -> Result<StorageRow, StorageError> {
        Ok(StorageRow::new(
            R::TABLE,
            owned(vec![
                ("sensor_id", sensor_id.into()),
                ("window_start", window.start.into()),
                ("window_end", window.end.into()),
            ]),
            owned(record.columns()),
        ))
    }
}

/// Keys rows by a subset of the record's own columns.
#[derive(Debug, Clone)]
pub struct ColumnKeySelector {
    columns: Vec<&'static str>,
}

impl ColumnKeySelector {
    pub fn new(columns: &[&'static str]) -> Self {
        Self {
            columns: columns.to_vec(),
        }
    }
}

impl<R: StorageRecord> StorageKeySelector<R> for ColumnKeySelector {
    /// Fails when a key column is not one of the record's columns.
    fn select(&self, _sensor_id: SensorId, _window: &Window, record: &R) -> Result<StorageRow, StorageError> {
        let columns = owned(record.columns());
        let primary_key = self
            .columns
            .iter()
            .map(|pk| {
                columns
                    .iter()
                    .find(|(name, _)| name == pk)
                    .cloned()
                    .ok_or_else(|| StorageError::Rejected {
                        table: R::TABLE.to_string(),
                        reason: format!("no column named '{}' to key by", pk),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StorageRow::new(R::TABLE, primary_key, columns))
    }
}

/// Selector backed by a closure.
pub struct FnKeySelector<F> {
    f: F,
}

impl<R, F> StorageKeySelector<R> for FnKeySelector<F>
where
    F: Fn(SensorId, &Window, &R) -> StorageRow + Send + Sync + 'static,
{
    fn select(&self, sensor_id: SensorId, window: &Window, record: &R) -> Result<StorageRow, StorageError> {
        Ok((self.f)(sensor_id, window, record))
    }
}

pub fn key_selector<R, F>(f: F) -> FnKeySelector<F>
where
    F: Fn(SensorId, &Window, &R) -> StorageRow + Send + Sync + 'static,
{
    FnKeySelector { f }
}

#[derive(Debug, Default)]
struct StorageCounters {
    writes: AtomicU64,
    failures: AtomicU64,
}

/// The durable side of the output. Shared by every partition; each stat kind
/// registers its key selector before records flow.
#[derive(Clone)]
pub struct StorageSink {
    writer: Arc<dyn StatsWriter>,
    counters: Arc<StorageCounters>,
}

impl StorageSink {
    pub fn new(writer: impl StatsWriter + 'static) -> Self {
        Self::from_arc(Arc::new(writer))
    }

    pub fn from_arc(writer: Arc<dyn StatsWriter>) -> Self {
        Self {
            writer,
            counters: Arc::new(StorageCounters::default()),
        }
    }

    pub fn writes(&self) -> u64 {
        self.counters.writes.load(Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.counters.failures.load(Relaxed)
    }

    /// Binds `selector` to stat kind `kind` and returns the stage that
    /// writes its emissions.
    pub fn register<R: StatsRecord>(
        &self,
        kind: impl Into<String>,
        selector: Arc<dyn StorageKeySelector<R>>,
    ) -> Persist<R> {
        let kind = kind.into();
        info!("[Storage] Registered key selector for '{}'", kind);
        Persist {
            kind,
            selector,
            writer: self.writer.clone(),
            counters: self.counters.clone(),
        }
    }
}

/// Upserts every emission and forwards it. Write failures are logged and
/// counted, never propagated.
pub struct Persist<R> {
    kind: String,
    selector: Arc<dyn StorageKeySelector<R>>,
    writer: Arc<dyn StatsWriter>,
    counters: Arc<StorageCounters>,
}

impl<R: StatsRecord> Stage<Emission<R>, Emission<R>> for Persist<R> {
    fn process<C>(&mut self, emission: &Emission<R>, collector: &mut C)
    where
        C: OutputCollector<Emission<R>>,
    {
        let stored = self
            .selector
            .select(emission.sensor_id, &emission.window, &emission.record)
            .and_then(|row| self.writer.upsert(&row));
        match stored {
            Ok(()) => {
                self.counters.writes.fetch_add(1, Relaxed);
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Relaxed);
                warn!(
                    "[{}] Failed to store row for {}: {}",
                    self.kind, emission.sensor_id, e
                );
            }
        }
        collector.push(emission);
    }
}

/// Upserts into a map. Handy for tests and for running without a database.
#[derive(Default)]
pub struct MemoryWriter {
    rows: Mutex<FxHashMap<String, StorageRow>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn row_key(table: &str, primary_key: &[Value]) -> String {
        format!("{}|{:?}", table, primary_key)
    }

    pub fn get(&self, table: &str, primary_key: &[Value]) -> Option<StorageRow> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&Self::row_key(table, primary_key))
            .cloned()
    }

    pub fn rows(&self, table: &str) -> Vec<StorageRow> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|row| row.table == table)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StatsWriter for MemoryWriter {
    fn upsert(&self, row: &StorageRow) -> Result<(), StorageError> {
        if row.primary_key.is_empty() {
            return Err(StorageError::Rejected {
                table: row.table.clone(),
                reason: "empty primary key".into(),
            });
        }
        let pk: Vec<Value> = row.primary_key.iter().map(|(_, v)| v.clone()).collect();
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Self::row_key(&row.table, &pk), row.clone());
        Ok(())
    }
}

impl StorageRecord for WindowStatsRecord {
    const TABLE: &'static str = "window_stats_record";

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("sensor_id", self.sensor_id.into()),
            ("window_start", self.window_start.into()),
            ("window_end", self.window_end.into()),
            ("count", self.count.into()),
            ("sum", self.sum.into()),
            ("min", self.min.into()),
            ("max", self.max.into()),
            ("mean", self.mean.into()),
        ]
    }
}

impl StorageRecord for HourOfDayStatsRecord {
    const TABLE: &'static str = "hour_of_day_stats_record";

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("sensor_id", self.sensor_id.into()),
            ("hour_of_day", self.hour_of_day.into()),
            ("period_start", self.period_start.into()),
            ("period_end", self.period_end.into()),
            ("count", self.count.into()),
            ("sum", self.sum.into()),
            ("min", self.min.into()),
            ("max", self.max.into()),
            ("mean", self.mean.into()),
        ]
    }
}

impl StorageRecord for DayOfWeekStatsRecord {
    const TABLE: &'static str = "day_of_week_stats_record";

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("sensor_id", self.sensor_id.into()),
            ("day_of_week", self.day_of_week.into()),
            ("period_start", self.period_start.into()),
            ("period_end", self.period_end.into()),
            ("count", self.count.into()),
            ("sum", self.sum.into()),
            ("min", self.min.into()),
            ("max", self.max.into()),
            ("mean", self.mean.into()),
        ]
    }
}

impl StorageRecord for HourOfWeekStatsRecord {
    const TABLE: &'static str = "hour_of_week_stats_record";

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("sensor_id", self.sensor_id.into()),
            ("day_of_week", self.day_of_week.into()),
            ("hour_of_day", self.hour_of_day.into()),
            ("period_start", self.period_start.into()),
            ("period_end", self.period_end.into()),
            ("count", self.count.into()),
            ("sum", self.sum.into()),
            ("min", self.min.into()),
            ("max", self.max.into()),
            ("mean", self.mean.into()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenWriter;

    impl StatsWriter for BrokenWriter {
        fn upsert(&self, _row: &StorageRow) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("connection refused".into()))
        }
    }

    fn record(count: u64, sum: f64) -> WindowStatsRecord {
        WindowStatsRecord {
            sensor_id: SensorId::new("A").unwrap(),
            window_start: 0,
            window_end: 10,
            count,
            sum,
            min: 1.0,
            max: 2.0,
            mean: sum / count as f64,
        }
    }

    fn emission(record: WindowStatsRecord) -> Emission<WindowStatsRecord> {
        Emission {
            sensor_id: record.sensor_id,
            window: Window::new(record.window_start, record.window_end),
            record,
        }
    }

    #[test]
    fn test_window_selector_keys_by_window() {
        let row = WindowKeySelector
            .select(SensorId::new("A").unwrap(), &Window::new(0, 10), &record(2, 3.0))
            .unwrap();
        assert_eq!(row.table, "window_stats_record");
        let pk: Vec<_> = row.primary_key.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(pk, vec!["sensor_id", "window_start", "window_end"]);
        assert!(row.columns.iter().all(|(c, _)| !pk.contains(&c.as_str())));
        assert_eq!(row.get("sum"), Some(&Value::Real(3.0)));
        assert_eq!(row.get("sensor_id"), Some(&Value::Text("A".into())));
    }

    #[test]
    fn test_column_selector_uses_record_columns() {
        let selector = ColumnKeySelector::new(&["sensor_id", "window_start"]);
        let row = StorageKeySelector::<WindowStatsRecord>::select(
            &selector,
            SensorId::new("A").unwrap(),
            &Window::new(0, 10),
            &record(1, 1.0),
        )
        .unwrap();
        assert_eq!(row.primary_key.len(), 2);
        assert_eq!(row.columns.len(), 6);
    }

    #[test]
    fn test_column_selector_rejects_unknown_column() {
        let writer = Arc::new(MemoryWriter::new());
        let sink = StorageSink::from_arc(writer.clone());
        let selector = ColumnKeySelector::new(&["sensor_id", "windw_start"]);
        let mut stage = sink.register::<WindowStatsRecord>("minute", Arc::new(selector));

        let mut forwarded = 0;
        stage.process(&emission(record(1, 1.0)), &mut |_: &Emission<WindowStatsRecord>| {
            forwarded += 1
        });

        assert_eq!(forwarded, 1);
        assert!(writer.is_empty());
        assert_eq!(sink.failures(), 1);
        assert_eq!(sink.writes(), 0);
    }

    #[test]
    fn test_upsert_replaces_by_primary_key() {
        let writer = Arc::new(MemoryWriter::new());
        let sink = StorageSink::from_arc(writer.clone());
        let mut stage = sink.register::<WindowStatsRecord>("minute", Arc::new(WindowKeySelector));

        stage.process(&emission(record(1, 1.0)), &mut |_: &Emission<WindowStatsRecord>| {});
        stage.process(&emission(record(2, 3.0)), &mut |_: &Emission<WindowStatsRecord>| {});

        assert_eq!(writer.len(), 1);
        assert_eq!(sink.writes(), 2);
        let row = writer
            .get(
                "window_stats_record",
                &[Value::Text("A".into()), Value::Integer(0), Value::Integer(10)],
            )
            .unwrap();
        assert_eq!(row.get("count"), Some(&Value::Integer(2)));
    }

    #[test]
    fn test_failures_are_counted_and_forwarded() {
        let sink = StorageSink::new(BrokenWriter);
        let mut stage = sink.register::<WindowStatsRecord>("minute", Arc::new(WindowKeySelector));

        let mut forwarded = 0;
        stage.process(&emission(record(1, 1.0)), &mut |_: &Emission<WindowStatsRecord>| {
            forwarded += 1
        });

        assert_eq!(forwarded, 1);
        assert_eq!(sink.failures(), 1);
        assert_eq!(sink.writes(), 0);
    }

    #[test]
    fn test_memory_writer_rejects_keyless_rows() {
        let writer = MemoryWriter::new();
        let row = StorageRow::new("t", vec![], vec![("a".into(), Value::Integer(1))]);
        assert!(writer.upsert(&row).is_err());
        assert!(writer.is_empty());
    }
}
