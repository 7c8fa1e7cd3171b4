use crate::key::StatsKeyFactory;
use crate::record::MeasurementRecord;
use crate::stage::{OutputCollector, Stage};
use crate::stats::SummaryStatistics;
use crate::window::{WindowPolicy, Windowed};
use crate::window_store::WindowStore;
use spdlog::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// The state of one window right after a record was absorbed into it.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowUpdate<K> {
    pub key: Windowed<K>,
    pub stats: SummaryStatistics,
    /// Timestamp of the record that caused this update.
    pub timestamp: i64,
}

/// Counters shared between a partition's aggregator and whoever reports on it.
#[derive(Debug, Default)]
pub struct AggregateMetrics {
    pub records: AtomicU64,
    pub updates: AtomicU64,
    pub forwarded: AtomicU64,
    pub late_dropped: AtomicU64,
    pub out_of_range: AtomicU64,
    pub evicted: AtomicU64,
    pub live_windows: AtomicU64,
}

/// Plain copy of [`AggregateMetrics`], summed over partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateSnapshot {
    pub records: u64,
    pub updates: u64,
    pub forwarded: u64,
    pub late_dropped: u64,
    pub out_of_range: u64,
    pub evicted: u64,
    pub live_windows: u64,
}

impl AggregateMetrics {
    pub fn snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot {
            records: self.records.load(Relaxed),
            updates: self.updates.load(Relaxed),
            forwarded: self.forwarded.load(Relaxed),
            late_dropped: self.late_dropped.load(Relaxed),
            out_of_range: self.out_of_range.load(Relaxed),
            evicted: self.evicted.load(Relaxed),
            live_windows: self.live_windows.load(Relaxed),
        }
    }
}

impl std::ops::Add for AggregateSnapshot {
    type Output = AggregateSnapshot;

    fn add(self, rhs: Self) -> Self {
        AggregateSnapshot {
            records: self.records + rhs.records,
            updates: self.updates + rhs.updates,
            forwarded: self.forwarded + rhs.forwarded,
            late_dropped: self.late_dropped + rhs.late_dropped,
            out_of_range: self.out_of_range + rhs.out_of_range,
            evicted: self.evicted + rhs.evicted,
            live_windows: self.live_windows + rhs.live_windows,
        }
    }
}

/// Assigns each record to its grouping key and windows, and emits the
/// updated statistics of every window it touched.
///
/// Records arriving for a window whose grace period has passed are dropped,
/// as are records whose timestamp is outside the supported range.
pub struct WindowedAggregate<F: StatsKeyFactory> {
    name: String,
    key_factory: F,
    policy: WindowPolicy,
    store: WindowStore<F::Key>,
    metrics: Arc<AggregateMetrics>,
}

impl<F: StatsKeyFactory> WindowedAggregate<F> {
    pub fn new(name: impl Into<String>, key_factory: F, policy: WindowPolicy) -> Self {
        Self {
            name: name.into(),
            key_factory,
            store: WindowStore::new(policy.grace()),
            policy,
            metrics: Arc::new(AggregateMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<AggregateMetrics> {
        self.metrics.clone()
    }

    pub fn store(&self) -> &WindowStore<F::Key> {
        &self.store
    }
}

impl<F: StatsKeyFactory> Stage<MeasurementRecord, WindowUpdate<F::Key>> for WindowedAggregate<F> {
    fn process<C>(&mut self, record: &MeasurementRecord, collector: &mut C)
    where
        C: OutputCollector<WindowUpdate<F::Key>>,
    {
        let policy = self.policy;
        let Some(local) = policy.local_date_time(record.timestamp) else {
            self.metrics.out_of_range.fetch_add(1, Relaxed);
            warn!(
                "[{}] Dropping record of {} with out of range timestamp {}",
                self.name, record.identifier, record.timestamp
            );
            return;
        };
        let key = self.key_factory.create_key(record.identifier, &local);

        self.store.observe(record.timestamp);
        let stream_time = self.store.stream_time();
        self.metrics.records.fetch_add(1, Relaxed);

        let store = &mut self.store;
        let metrics = &self.metrics;
        let name = &self.name;
        policy.for_each_window(record.timestamp, |window| {
            if !policy.is_open(&window, stream_time) {
                metrics.late_dropped.fetch_add(1, Relaxed);
                debug!(
                    "[{}] Dropping late record of {} at {} for closed window [{}, {})",
                    name, record.identifier, record.timestamp, window.start, window.end
                );
                return;
            }
            let windowed = Windowed::new(key.clone(), window);
            let stats = *store.absorb(&windowed, record);
            metrics.updates.fetch_add(1, Relaxed);
            collector.push(&WindowUpdate {
                key: windowed,
                stats,
                timestamp: record.timestamp,
            });
        });

        let evicted = self.store.evict_expired();
        if evicted > 0 {
            self.metrics.evicted.fetch_add(evicted as u64, Relaxed);
        }
        self.metrics
            .live_windows
            .store(self.store.len() as u64, Relaxed);
    }
}
