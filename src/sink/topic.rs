use crate::journal_store::{JournalStore, StoreJournalReader};
use crate::record::{Keyed, StatsRecord};
use crate::sink::Emission;
use crate::stage::{OutputCollector, Stage};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Appends every emission to one partition of an output topic, keyed by its
/// identifier, and passes it on unchanged.
pub struct Publish<R: StatsRecord> {
    journal: JournalStore<Keyed<R>>,
    published: Arc<AtomicU64>,
}

impl<R: StatsRecord> Publish<R> {
    pub fn new(journal: JournalStore<Keyed<R>>, published: Arc<AtomicU64>) -> Self {
        Self { journal, published }
    }
}

impl<R: StatsRecord> Stage<Emission<R>, Emission<R>> for Publish<R> {
    #[inline(always)]
    fn process<C>(&mut self, emission: &Emission<R>, collector: &mut C)
    where
        C: OutputCollector<Emission<R>>,
    {
        self.journal.append(&Keyed {
            key: emission.sensor_id,
            value: emission.record,
        });
        self.published.fetch_add(1, Relaxed);
        collector.push(emission);
    }
}

/// Consumer side of an output topic. Polls the partitions round-robin, so
/// order is only kept within a partition, which holds every record of a
/// given identifier.
pub struct TopicReader<R: StatsRecord> {
    name: String,
    partitions: Vec<StoreJournalReader<Keyed<R>>>,
    next_partition: usize,
}

impl<R: StatsRecord> TopicReader<R> {
    pub(crate) fn new(name: impl Into<String>, partitions: Vec<StoreJournalReader<Keyed<R>>>) -> Self {
        Self {
            name: name.into(),
            partitions,
            next_partition: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn poll(&mut self) -> Option<Keyed<R>> {
        let count = self.partitions.len();
        for offset in 0..count {
            let partition = (self.next_partition + offset) % count;
            let reader = &self.partitions[partition];
            if reader.next() {
                self.next_partition = (partition + 1) % count;
                return reader.get();
            }
        }
        None
    }

    /// Everything published so far and not yet polled.
    pub fn drain(&mut self) -> Vec<Keyed<R>> {
        let mut out = Vec::with_capacity(self.pending());
        while let Some(record) = self.poll() {
            out.push(record);
        }
        out
    }

    /// Drains a single partition in publish order.
    pub fn drain_partition(&mut self, partition: usize) -> Vec<Keyed<R>> {
        let mut out = Vec::new();
        if let Some(reader) = self.partitions.get(partition) {
            while reader.next() {
                if let Some(record) = reader.get() {
                    out.push(record);
                }
            }
        }
        out
    }

    pub fn pending(&self) -> usize {
        self.partitions.iter().map(|r| r.pending()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal_store::JournalStoreOptions;
    use crate::op_counter::OpCounter;
    use crate::record::SensorId;
    use crate::window::Window;
    use std::path::Path;

    fn journal(name: &str) -> JournalStore<Keyed<f64>> {
        JournalStore::new(
            Path::new("data"),
            OpCounter::new(),
            JournalStoreOptions {
                name: name.into(),
                size: 8,
                in_memory: true,
            },
        )
        .unwrap()
    }

    fn emission(id: &str, value: f64) -> Emission<f64> {
        Emission {
            sensor_id: SensorId::new(id).unwrap(),
            window: Window::new(0, 10),
            record: value,
        }
    }

    #[test]
    fn test_publish_appends_and_forwards() {
        let published = Arc::new(AtomicU64::new(0));
        let journal = journal("out-0");
        let mut topic = TopicReader::new("out", vec![journal.reader()]);
        let mut stage = Publish::new(journal, published.clone());

        let mut forwarded = 0;
        stage.process(&emission("a", 1.5), &mut |_: &Emission<f64>| forwarded += 1);

        assert_eq!(forwarded, 1);
        assert_eq!(published.load(Relaxed), 1);
        let records = topic.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, SensorId::new("a").unwrap());
        assert_eq!(records[0].value, 1.5);
    }

    #[test]
    fn test_round_robin_over_partitions() {
        let mut p0 = journal("out-0");
        let mut p1 = journal("out-1");
        let mut topic = TopicReader::new("out", vec![p0.reader(), p1.reader()]);
        let id = SensorId::new("a").unwrap();
        p0.append(&Keyed { key: id, value: 1.0 });
        p0.append(&Keyed { key: id, value: 2.0 });
        p1.append(&Keyed { key: id, value: 10.0 });

        assert_eq!(topic.pending(), 3);
        let values: Vec<_> = topic.drain().iter().map(|k| k.value).collect();
        assert_eq!(values, vec![1.0, 10.0, 2.0]);
        assert_eq!(topic.poll(), None);
    }
}
