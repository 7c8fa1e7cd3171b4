use crate::op_counter::OpCounter;
use crate::storage::journal_mmap::JournalMmap;
use bytemuck::Pod;
use std::cell::Cell;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;

pub struct JournalStoreOptions {
    pub name: String,
    /// Capacity in records.
    pub size: usize,
    pub in_memory: bool,
}

/// Append-only, fixed capacity log of `Pod` records.
///
/// There is exactly one writer; every [`StoreJournalReader`] keeps its own
/// cursor and can replay the journal from the beginning.
pub struct JournalStore<State: Pod + Send> {
    storage: JournalMmap,
    op_counter: Arc<OpCounter>,
    _marker: PhantomData<State>,
}

pub struct StoreJournalReader<State: Pod + Send> {
    next_index: Cell<usize>,
    storage: JournalMmap,
    op_count: Arc<AtomicU64>,
    _marker: PhantomData<State>,
}

impl<State: Pod + Send> JournalStore<State> {
    pub fn new(
        root_path: &Path,
        op_counter: Arc<OpCounter>,
        options: JournalStoreOptions,
    ) -> Result<Self, std::io::Error> {
        let total_size = options.size * size_of::<State>();
        let storage = if options.in_memory {
            JournalMmap::new(None, total_size)?
        } else {
            let path: PathBuf = root_path.join(format!("{}.journal", options.name));
            JournalMmap::new(Some(path), total_size)?
        };

        Ok(Self {
            op_counter,
            storage,
            _marker: PhantomData,
        })
    }

    /// # Panics
    /// Panics when the journal is at capacity.
    pub fn append(&mut self, state: &State) {
        let size = size_of::<State>();
        let current_pos = self.storage.get_write_index();
        assert!(
            current_pos + size <= self.storage.len(),
            "Store is full. Capacity: {}, Current position: {}, State size: {}",
            self.storage.len(),
            current_pos,
            size
        );
        self.storage.append(state);
    }

    pub fn reader(&self) -> StoreJournalReader<State> {
        StoreJournalReader {
            op_count: self.op_counter.new_counter(),
            next_index: Cell::new(0),
            storage: self.storage.reader(),
            _marker: PhantomData,
        }
    }

    pub fn size(&self) -> usize {
        self.storage.get_write_index() / size_of::<State>()
    }

    pub fn capacity(&self) -> usize {
        self.storage.len() / size_of::<State>()
    }
}

impl<State: Pod + Send> StoreJournalReader<State> {
    /// Advances the cursor. Returns `false` when nothing new has been written.
    pub fn next(&self) -> bool {
        let index_to_read = self.next_index.get();
        let offset = index_to_read * size_of::<State>();

        if offset + size_of::<State>() > self.storage.get_write_index() {
            return false;
        }

        self.next_index.set(index_to_read + 1);
        self.op_count.fetch_add(1, Relaxed);

        true
    }

    /// Runs `handler` on the record under the cursor.
    pub fn with<R>(&self, handler: impl FnOnce(&State) -> R) -> Option<R> {
        let next_index = self.next_index.get();
        if next_index == 0 {
            return None;
        }
        let offset = (next_index - 1) * size_of::<State>();
        Some(handler(self.storage.read(offset)))
    }

    pub fn with_at<R>(&self, at: usize, handler: impl FnOnce(&State) -> R) -> Option<R> {
        let offset = at * size_of::<State>();
        if offset + size_of::<State>() > self.storage.get_write_index() {
            return None;
        }
        Some(handler(self.storage.read(offset)))
    }

    pub fn get(&self) -> Option<State> {
        self.with(|s| *s)
    }

    pub fn get_at(&self, at: usize) -> Option<State> {
        self.with_at(at, |s| *s)
    }

    /// Number of records written so far.
    pub fn size(&self) -> usize {
        self.storage.get_write_index() / size_of::<State>()
    }

    /// Records written but not yet consumed by this reader.
    pub fn pending(&self) -> usize {
        self.size() - self.next_index.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AggregatedMeasurementRecord, SensorId};

    fn store(size: usize) -> JournalStore<AggregatedMeasurementRecord> {
        JournalStore::new(
            Path::new("data"),
            OpCounter::new(),
            JournalStoreOptions {
                name: "test".into(),
                size,
                in_memory: true,
            },
        )
        .unwrap()
    }

    fn record(ts: i64) -> AggregatedMeasurementRecord {
        AggregatedMeasurementRecord::new(SensorId::new("group").unwrap(), ts, ts as f64)
    }

    #[test]
    fn test_reader_cursor() {
        let mut store = store(4);
        let reader = store.reader();
        assert!(!reader.next());

        store.append(&record(1));
        store.append(&record(2));
        assert_eq!(reader.pending(), 2);

        assert!(reader.next());
        assert_eq!(reader.get(), Some(record(1)));
        assert!(reader.next());
        assert_eq!(reader.get(), Some(record(2)));
        assert!(!reader.next());
        assert_eq!(reader.pending(), 0);
        assert_eq!(reader.get_at(0), Some(record(1)));
        assert_eq!(reader.get_at(2), None);
    }

    #[test]
    fn test_independent_readers() {
        let mut store = store(4);
        let first = store.reader();
        store.append(&record(1));
        let second = store.reader();

        assert!(first.next());
        assert!(!first.next());
        assert!(second.next());
        assert_eq!(second.get(), Some(record(1)));
        assert_eq!(store.size(), 1);
        assert_eq!(store.capacity(), 4);
    }

    #[test]
    #[should_panic(expected = "Store is full")]
    fn test_panic_when_full() {
        let mut store = store(2);
        store.append(&record(1));
        store.append(&record(2));
        store.append(&record(3));
    }
}
