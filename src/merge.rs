use crate::journal_store::StoreJournalReader;
use crate::record::{AggregatedMeasurementRecord, MeasurementRecord};

/// Reads the raw and the pre-aggregated partition of one worker and hands out
/// a single stream of [`MeasurementRecord`]s.
///
/// Order within each source is kept. The two sources are interleaved one
/// record at a time, with no ordering between them.
pub struct InputMerger {
    raw: StoreJournalReader<MeasurementRecord>,
    aggregated: StoreJournalReader<AggregatedMeasurementRecord>,
}

impl InputMerger {
    pub fn new(
        raw: StoreJournalReader<MeasurementRecord>,
        aggregated: StoreJournalReader<AggregatedMeasurementRecord>,
    ) -> Self {
        Self { raw, aggregated }
    }

    /// Delivers up to `max_batch` records to `handler` and returns how many
    /// were delivered.
    pub fn poll(&mut self, max_batch: usize, mut handler: impl FnMut(&MeasurementRecord)) -> usize {
        let mut delivered = 0;
        while delivered < max_batch {
            let mut progressed = false;

            if self.raw.next() {
                self.raw.with(|record| handler(record));
                delivered += 1;
                progressed = true;
            }

            if delivered < max_batch && self.aggregated.next() {
                self.aggregated
                    .with(|aggregated| handler(&MeasurementRecord::from(aggregated)));
                delivered += 1;
                progressed = true;
            }

            if !progressed {
                break;
            }
        }
        delivered
    }

    /// Records written to either source but not yet delivered.
    pub fn pending(&self) -> usize {
        self.raw.pending() + self.aggregated.pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal_store::{JournalStore, JournalStoreOptions};
    use crate::op_counter::OpCounter;
    use crate::record::SensorId;
    use std::path::Path;

    fn journal<T: bytemuck::Pod + Send>(name: &str) -> JournalStore<T> {
        JournalStore::new(
            Path::new("data"),
            OpCounter::new(),
            JournalStoreOptions {
                name: name.into(),
                size: 16,
                in_memory: true,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_merges_both_sources_in_source_order() {
        let id = SensorId::new("A").unwrap();
        let mut raw = journal::<MeasurementRecord>("raw");
        let mut aggregated = journal::<AggregatedMeasurementRecord>("aggregated");
        let mut merger = InputMerger::new(raw.reader(), aggregated.reader());

        raw.append(&MeasurementRecord::new(id, 1, 1.0));
        raw.append(&MeasurementRecord::new(id, 2, 2.0));
        raw.append(&MeasurementRecord::new(id, 3, 3.0));
        aggregated.append(&AggregatedMeasurementRecord::new(id, 100, 5.0));

        let mut out = Vec::new();
        assert_eq!(merger.poll(usize::MAX, |r| out.push(*r)), 4);

        let raw_order: Vec<_> = out.iter().filter(|r| r.timestamp < 100).map(|r| r.timestamp).collect();
        assert_eq!(raw_order, vec![1, 2, 3]);
        assert!(out.contains(&MeasurementRecord::new(id, 100, 5.0)));
        assert_eq!(merger.pending(), 0);
    }

    #[test]
    fn test_respects_batch_limit() {
        let id = SensorId::new("A").unwrap();
        let mut raw = journal::<MeasurementRecord>("raw");
        let aggregated = journal::<AggregatedMeasurementRecord>("aggregated");
        let mut merger = InputMerger::new(raw.reader(), aggregated.reader());
        for ts in 0..5 {
            raw.append(&MeasurementRecord::new(id, ts, 1.0));
        }

        assert_eq!(merger.poll(2, |_| {}), 2);
        assert_eq!(merger.pending(), 3);
        assert_eq!(merger.poll(10, |_| {}), 3);
        assert_eq!(merger.poll(10, |_| {}), 0);
    }
}
