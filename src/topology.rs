use crate::aggregate::{AggregateMetrics, AggregateSnapshot, WindowedAggregate};
use crate::completeness::completeness;
use crate::engine::WorkerEngine;
use crate::error::{ConfigError, RecordError};
use crate::formatter::StatsRecordFactory;
use crate::journal_store::{JournalStore, JournalStoreOptions};
use crate::key::StatsKeyFactory;
use crate::merge::InputMerger;
use crate::pipe::{Progress, inspect, latency, map};
use crate::record::{AggregatedMeasurementRecord, Keyed, MeasurementRecord, SensorId, StatsRecord};
use crate::sink::{Emission, Publish, StorageKeySelector, StorageSink, TopicReader};
use crate::stage::{Stage, StageExt};
use crate::window::{WindowPolicy, timestamp_in_range};
use bytemuck::Pod;
use fxhash::FxHashSet;
use spdlog::{debug, info, warn};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::thread;
use std::time::{Duration, Instant};

/// Runtime settings shared by every stat kind of a topology.
#[derive(Debug, Clone)]
pub struct TopologyOptions {
    /// Number of partition workers. Every identifier is owned by exactly one.
    pub partitions: usize,
    /// Capacity, in records, of every input and output journal partition.
    pub capacity: usize,
    pub in_memory: bool,
    /// Directory of the journal files when `in_memory` is false.
    pub root_path: PathBuf,
    pub pin_cores: bool,
    pub latency_stats: bool,
    /// Log throughput of each partition every this many records.
    pub progress_interval: Option<usize>,
    /// Records a worker takes from its inputs per step.
    pub max_batch: usize,
}

impl Default for TopologyOptions {
    fn default() -> Self {
        Self {
            partitions: 1,
            capacity: 1 << 20,
            in_memory: true,
            root_path: PathBuf::from("data"),
            pin_cores: false,
            latency_stats: false,
            progress_interval: None,
            max_batch: 1024,
        }
    }
}

impl TopologyOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partitions == 0 {
            return Err(ConfigError::NoPartitions);
        }
        if self.capacity == 0 || self.max_batch == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

/// Registration of one statistic: how records are keyed and windowed, how
/// results are formatted, where they are published and how they are stored.
pub struct StatKind<F, P>
where
    F: StatsKeyFactory,
    P: StatsRecordFactory<F::Key>,
{
    name: String,
    key_factory: F,
    record_factory: P,
    policy: WindowPolicy,
    topic: String,
    storage_key: Option<Arc<dyn StorageKeySelector<P::Record>>>,
}

impl<F, P> StatKind<F, P>
where
    F: StatsKeyFactory,
    P: StatsRecordFactory<F::Key>,
{
    /// Publishes to a topic named after the stat kind unless
    /// [`StatKind::with_topic`] says otherwise.
    pub fn new(name: impl Into<String>, key_factory: F, record_factory: P, policy: WindowPolicy) -> Self {
        let name = name.into();
        Self {
            topic: name.clone(),
            name,
            key_factory,
            record_factory,
            policy,
            storage_key: None,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_storage_key(mut self, selector: impl StorageKeySelector<P::Record>) -> Self {
        self.storage_key = Some(Arc::new(selector));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn policy(&self) -> &WindowPolicy {
        &self.policy
    }
}

/// Type-erased per-partition pipeline of one stat kind.
trait PartitionTask: Send {
    fn process(&mut self, record: &MeasurementRecord);
}

struct StatTask<S, R> {
    stage: S,
    _marker: PhantomData<fn() -> R>,
}

impl<S, R> PartitionTask for StatTask<S, R>
where
    S: Stage<MeasurementRecord, Emission<R>> + Send,
    R: StatsRecord,
{
    #[inline(always)]
    fn process(&mut self, record: &MeasurementRecord) {
        self.stage.process(record, &mut |_: &Emission<R>| {});
    }
}

fn boxed_task<S, R>(name: &str, latency_stats: bool, stage: S) -> Box<dyn PartitionTask>
where
    S: Stage<MeasurementRecord, Emission<R>> + Send + 'static,
    R: StatsRecord,
{
    if latency_stats {
        Box::new(StatTask {
            stage: latency(name, 100_000, 1000, stage),
            _marker: PhantomData,
        })
    } else {
        Box::new(StatTask {
            stage,
            _marker: PhantomData,
        })
    }
}

struct KindHandle {
    name: String,
    topic: String,
    metrics: Vec<Arc<AggregateMetrics>>,
    published: Arc<AtomicU64>,
}

/// Assembles a [`StatsTopology`]. Every configuration error surfaces here,
/// before a single record is accepted.
pub struct TopologyBuilder {
    options: TopologyOptions,
    engine: WorkerEngine,
    storage: Option<StorageSink>,
    raw: Vec<JournalStore<MeasurementRecord>>,
    aggregated: Vec<JournalStore<AggregatedMeasurementRecord>>,
    tasks: Vec<Vec<Box<dyn PartitionTask>>>,
    kinds: Vec<KindHandle>,
    names: FxHashSet<String>,
    topics: FxHashSet<String>,
}

fn open_journal<T: Pod + Send>(
    engine: &WorkerEngine,
    options: &TopologyOptions,
    name: String,
    size: usize,
) -> Result<JournalStore<T>, ConfigError> {
    engine
        .new_journal_store(JournalStoreOptions {
            name: name.clone(),
            size,
            in_memory: options.in_memory,
        })
        .map_err(|e| ConfigError::Journal {
            name,
            reason: e.to_string(),
        })
}

impl TopologyBuilder {
    /// `storage` is `None` when no durable store is available; results are
    /// then only published.
    pub fn new(options: TopologyOptions, storage: Option<StorageSink>) -> Result<Self, ConfigError> {
        options.validate()?;

        let mut engine = WorkerEngine::new_with_root_path(options.root_path.clone());
        engine.set_pin_cores(options.pin_cores);
        engine.enable_latency_stats(options.latency_stats);

        let mut raw = Vec::with_capacity(options.partitions);
        let mut aggregated = Vec::with_capacity(options.partitions);
        for partition in 0..options.partitions {
            raw.push(open_journal(
                &engine,
                &options,
                format!("raw-{}", partition),
                options.capacity,
            )?);
            aggregated.push(open_journal(
                &engine,
                &options,
                format!("aggregated-{}", partition),
                options.capacity,
            )?);
        }

        Ok(Self {
            tasks: (0..options.partitions).map(|_| Vec::new()).collect(),
            options,
            engine,
            storage,
            raw,
            aggregated,
            kinds: Vec::new(),
            names: FxHashSet::default(),
            topics: FxHashSet::default(),
        })
    }

    /// Registers a stat kind and returns the consumer side of its output topic.
    pub fn add_stat<F, P>(&mut self, kind: StatKind<F, P>) -> Result<TopicReader<P::Record>, ConfigError>
    where
        F: StatsKeyFactory,
        P: StatsRecordFactory<F::Key>,
    {
        kind.policy.validate()?;
        if self.names.contains(&kind.name) {
            return Err(ConfigError::DuplicateStatKind(kind.name));
        }
        if self.topics.contains(&kind.topic) {
            return Err(ConfigError::DuplicateTopic(kind.topic));
        }
        let persist_selector = match (&self.storage, &kind.storage_key) {
            (Some(_), None) => return Err(ConfigError::MissingStorageKeySelector(kind.name)),
            (Some(_), Some(selector)) => Some(selector.clone()),
            (None, _) => None,
        };

        // Each input record falls into the final hop of exactly one window,
        // so a partition publishes at most one record per raw or aggregated input.
        let mut journals = Vec::with_capacity(self.options.partitions);
        for partition in 0..self.options.partitions {
            journals.push(open_journal::<Keyed<P::Record>>(
                &self.engine,
                &self.options,
                format!("{}-{}", kind.topic, partition),
                2 * self.options.capacity,
            )?);
        }
        let reader = TopicReader::new(
            kind.topic.clone(),
            journals.iter().map(|j| j.reader()).collect(),
        );

        let published = Arc::new(AtomicU64::new(0));
        let mut metrics = Vec::with_capacity(self.options.partitions);
        for (partition, journal) in journals.into_iter().enumerate() {
            let task_name = format!("{}/p{}", kind.name, partition);
            let aggregate = WindowedAggregate::new(task_name.clone(), kind.key_factory.clone(), kind.policy);
            metrics.push(aggregate.metrics());

            let key_factory = kind.key_factory.clone();
            let record_factory = kind.record_factory.clone();
            let debug_name = task_name.clone();
            let pipeline = crate::pipe![
                aggregate,
                completeness(kind.policy, metrics[partition].clone()),
                map(move |update: &crate::aggregate::WindowUpdate<F::Key>| Emission {
                    sensor_id: key_factory.sensor_id(&update.key.key),
                    window: update.key.window,
                    record: record_factory.create(&update.key, &update.stats),
                }),
                inspect(move |emission: &Emission<P::Record>| {
                    debug!(
                        "[{}] Emitting {} for [{}, {})",
                        debug_name, emission.sensor_id, emission.window.start, emission.window.end
                    );
                }),
                Publish::new(journal, published.clone()),
            ];

            let task = match (&self.storage, &persist_selector) {
                (Some(storage), Some(selector)) => boxed_task(
                    &task_name,
                    self.options.latency_stats,
                    pipeline.pipe(storage.register(task_name.clone(), selector.clone())),
                ),
                _ => boxed_task(&task_name, self.options.latency_stats, pipeline),
            };
            self.tasks[partition].push(task);
        }

        info!(
            "[Topology] Registered '{}' -> topic '{}' (size {}ms, advance {}ms, grace {}ms, zone {}, storage {})",
            kind.name,
            kind.topic,
            kind.policy.size(),
            kind.policy.advance(),
            kind.policy.grace(),
            kind.policy.zone(),
            if persist_selector.is_some() { "on" } else { "off" }
        );

        self.names.insert(kind.name.clone());
        self.topics.insert(kind.topic.clone());
        self.kinds.push(KindHandle {
            name: kind.name,
            topic: kind.topic,
            metrics,
            published,
        });
        Ok(reader)
    }

    /// Starts one worker per partition.
    pub fn build(self) -> Result<StatsTopology, ConfigError> {
        if self.kinds.is_empty() {
            return Err(ConfigError::NoStatKinds);
        }

        let TopologyBuilder {
            options,
            mut engine,
            raw,
            aggregated,
            tasks,
            kinds,
            ..
        } = self;

        let mut consumed = Vec::with_capacity(options.partitions);
        for (partition, mut tasks) in tasks.into_iter().enumerate() {
            let delivered_total = Arc::new(AtomicU64::new(0));
            consumed.push(delivered_total.clone());
            let mut merger = InputMerger::new(raw[partition].reader(), aggregated[partition].reader());
            let mut progress = options
                .progress_interval
                .map(|interval| Progress::<MeasurementRecord>::new(format!("partition-{}", partition), interval));
            let max_batch = options.max_batch;

            engine.run_worker(format!("partition-{}", partition), move || {
                let delivered = merger.poll(max_batch, |record| {
                    if let Some(progress) = progress.as_mut() {
                        progress.process(record, &mut |_: &MeasurementRecord| {});
                    }
                    for task in tasks.iter_mut() {
                        task.process(record);
                    }
                });
                delivered_total.fetch_add(delivered as u64, Release);
                delivered > 0
            });
        }

        info!(
            "[Topology] Started {} partitions with {} stat kinds",
            options.partitions,
            kinds.len()
        );

        Ok(StatsTopology {
            partitions: options.partitions,
            engine,
            consumed,
            raw,
            aggregated,
            kinds,
        })
    }
}

/// A running topology. Producers feed it through [`StatsTopology::send_measurement`]
/// and [`StatsTopology::send_aggregated`]; consumers read the topic readers
/// returned at registration.
pub struct StatsTopology {
    partitions: usize,
    engine: WorkerEngine,
    /// Records each partition worker has run through its pipelines.
    consumed: Vec<Arc<AtomicU64>>,
    raw: Vec<JournalStore<MeasurementRecord>>,
    aggregated: Vec<JournalStore<AggregatedMeasurementRecord>>,
    kinds: Vec<KindHandle>,
}

fn check_record(identifier: SensorId, timestamp: i64, value: f64) -> Result<(), RecordError> {
    if !value.is_finite() {
        return Err(RecordError::NonFiniteValue {
            identifier: identifier.to_string(),
            timestamp,
        });
    }
    if !timestamp_in_range(timestamp) {
        return Err(RecordError::TimestampOutOfRange {
            identifier: identifier.to_string(),
            timestamp,
        });
    }
    Ok(())
}

impl StatsTopology {
    pub fn partition_for(&self, sensor_id: &SensorId) -> usize {
        (fxhash::hash64(sensor_id) % self.partitions as u64) as usize
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// # Panics
    /// Panics when the input partition is full.
    pub fn send_measurement(&mut self, record: &MeasurementRecord) -> Result<(), RecordError> {
        check_record(record.identifier, record.timestamp, record.value)?;
        let partition = self.partition_for(&record.identifier);
        self.raw[partition].append(record);
        Ok(())
    }

    /// # Panics
    /// Panics when the input partition is full.
    pub fn send_aggregated(&mut self, record: &AggregatedMeasurementRecord) -> Result<(), RecordError> {
        check_record(record.identifier, record.timestamp, record.sum)?;
        let partition = self.partition_for(&record.identifier);
        self.aggregated[partition].append(record);
        Ok(())
    }

    /// Records sent but not yet run through every pipeline.
    pub fn pending(&self) -> usize {
        (0..self.partitions)
            .map(|p| {
                let sent = self.raw[p].size() + self.aggregated[p].size();
                sent.saturating_sub(self.consumed[p].load(Acquire) as usize)
            })
            .sum()
    }

    /// Waits until every record sent so far went through its pipelines.
    pub fn await_idle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.pending() == 0 && self.engine.await_idle(Duration::ZERO) {
                return true;
            }
            if start.elapsed() > timeout || self.engine.is_any_worker_panicked() {
                return false;
            }
            thread::yield_now();
        }
    }

    pub fn is_any_worker_panicked(&self) -> bool {
        self.engine.is_any_worker_panicked()
    }

    /// Aggregation counters of a stat kind, summed over partitions.
    pub fn stats(&self, name: &str) -> Option<AggregateSnapshot> {
        self.kind(name).map(|kind| {
            kind.metrics
                .iter()
                .map(|m| m.snapshot())
                .fold(AggregateSnapshot::default(), |acc, s| acc + s)
        })
    }

    /// Number of records a stat kind published to its topic.
    pub fn published(&self, name: &str) -> Option<u64> {
        self.kind(name).map(|kind| kind.published.load(Relaxed))
    }

    fn kind(&self, name: &str) -> Option<&KindHandle> {
        self.kinds.iter().find(|kind| kind.name == name)
    }

    /// Drains in-flight records, then stops and joins the workers. Returns
    /// whether the drain finished within `timeout`.
    pub fn shutdown(mut self, timeout: Duration) -> bool {
        let drained = self.await_idle(timeout);
        if !drained {
            warn!("[Topology] Workers still busy after {:?}, stopping anyway", timeout);
        }
        self.engine.stop();

        for kind in &self.kinds {
            for (partition, metrics) in kind.metrics.iter().enumerate() {
                let snapshot = metrics.snapshot();
                info!(
                    "[{}/p{}] topic '{}': {} records, {} forwarded, {} late, {} live windows",
                    kind.name,
                    partition,
                    kind.topic,
                    snapshot.records,
                    snapshot.forwarded,
                    snapshot.late_dropped,
                    snapshot.live_windows
                );
            }
        }
        let inputs: usize = self.raw.iter().map(|j| j.size()).sum::<usize>()
            + self.aggregated.iter().map(|j| j.size()).sum::<usize>();
        info!("[Topology] Stopped after {} input records", inputs);
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::WindowStatsRecordFactory;
    use crate::key::SensorKeyFactory;
    use crate::sink::{MemoryWriter, WindowKeySelector};

    fn kind(name: &str) -> StatKind<SensorKeyFactory, WindowStatsRecordFactory> {
        StatKind::new(
            name,
            SensorKeyFactory,
            WindowStatsRecordFactory,
            WindowPolicy::from_millis(10, 5),
        )
    }

    fn options() -> TopologyOptions {
        TopologyOptions {
            partitions: 2,
            capacity: 1024,
            ..TopologyOptions::default()
        }
    }

    #[test]
    fn test_rejects_invalid_options() {
        let options = TopologyOptions {
            partitions: 0,
            ..TopologyOptions::default()
        };
        assert_eq!(TopologyBuilder::new(options, None).err(), Some(ConfigError::NoPartitions));
    }

    #[test]
    fn test_rejects_invalid_policy() {
        let mut builder = TopologyBuilder::new(options(), None).unwrap();
        let kind = StatKind::new(
            "bad",
            SensorKeyFactory,
            WindowStatsRecordFactory,
            WindowPolicy::from_millis(5, 10),
        );
        assert_eq!(
            builder.add_stat(kind).err(),
            Some(ConfigError::AdvanceExceedsSize { size: 5, advance: 10 })
        );
    }

    #[test]
    fn test_rejects_duplicates() {
        let mut builder = TopologyBuilder::new(options(), None).unwrap();
        builder.add_stat(kind("minute")).unwrap();
        assert_eq!(
            builder.add_stat(kind("minute")).err(),
            Some(ConfigError::DuplicateStatKind("minute".into()))
        );
        assert_eq!(
            builder.add_stat(kind("other").with_topic("minute")).err(),
            Some(ConfigError::DuplicateTopic("minute".into()))
        );
    }

    #[test]
    fn test_storage_requires_selector() {
        let storage = StorageSink::new(MemoryWriter::new());
        let mut builder = TopologyBuilder::new(options(), Some(storage)).unwrap();
        assert_eq!(
            builder.add_stat(kind("minute")).err(),
            Some(ConfigError::MissingStorageKeySelector("minute".into()))
        );
        assert!(builder.add_stat(kind("minute").with_storage_key(WindowKeySelector)).is_ok());
    }

    #[test]
    fn test_build_requires_stat_kinds() {
        let builder = TopologyBuilder::new(options(), None).unwrap();
        assert!(matches!(builder.build(), Err(ConfigError::NoStatKinds)));
    }

    #[test]
    fn test_rejects_non_finite_values() {
        let mut builder = TopologyBuilder::new(options(), None).unwrap();
        let _topic = builder.add_stat(kind("minute")).unwrap();
        let mut topology = builder.build().unwrap();
        let id = SensorId::new("A").unwrap();
        assert!(
            topology
                .send_measurement(&MeasurementRecord::new(id, 1, f64::NAN))
                .is_err()
        );
        assert!(
            topology
                .send_aggregated(&AggregatedMeasurementRecord::new(id, 1, f64::INFINITY))
                .is_err()
        );
        assert!(topology.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn test_rejects_out_of_range_timestamps() {
        let mut builder = TopologyBuilder::new(options(), None).unwrap();
        let _topic = builder.add_stat(kind("minute")).unwrap();
        let mut topology = builder.build().unwrap();
        let id = SensorId::new("A").unwrap();
        assert_eq!(
            topology.send_measurement(&MeasurementRecord::new(id, i64::MAX - 3, 1.0)),
            Err(RecordError::TimestampOutOfRange {
                identifier: "A".into(),
                timestamp: i64::MAX - 3,
            })
        );
        assert!(
            topology
                .send_aggregated(&AggregatedMeasurementRecord::new(id, i64::MIN, 1.0))
                .is_err()
        );
        assert_eq!(topology.pending(), 0);
        assert!(!topology.is_any_worker_panicked());
        assert!(topology.shutdown(Duration::from_secs(5)));
    }
}
