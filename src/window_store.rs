use crate::record::MeasurementRecord;
use crate::stats::SummaryStatistics;
use crate::window::Windowed;
use fxhash::FxHashMap;
use std::collections::BTreeMap;
use std::hash::Hash;

/// Partition-local store of the running statistics of every open window.
///
/// The store is the only owner of live [`SummaryStatistics`]. Entries are
/// evicted once stream time passes `window.end + grace`, so memory stays
/// bounded by the number of keys times the windows open per key.
pub struct WindowStore<K> {
    entries: FxHashMap<Windowed<K>, SummaryStatistics>,
    expiry: BTreeMap<i64, Vec<Windowed<K>>>,
    grace: i64,
    stream_time: i64,
    evicted: u64,
}

impl<K: Clone + Eq + Hash> WindowStore<K> {
    pub fn new(grace: i64) -> Self {
        Self {
            entries: FxHashMap::default(),
            expiry: BTreeMap::new(),
            grace,
            stream_time: i64::MIN,
            evicted: 0,
        }
    }

    /// Largest record timestamp observed so far.
    pub fn stream_time(&self) -> i64 {
        self.stream_time
    }

    pub fn observe(&mut self, timestamp: i64) {
        self.stream_time = self.stream_time.max(timestamp);
    }

    /// Folds `record` into the statistics of `key`, creating them on first use.
    pub fn absorb(
        &mut self,
        key: &Windowed<K>,
        record: &MeasurementRecord,
    ) -> &SummaryStatistics {
        if !self.entries.contains_key(key) {
            self.expiry
                .entry(key.window.end)
                .or_default()
                .push(key.clone());
        }
        let stats = self.entries.entry(key.clone()).or_default();
        stats.absorb(record);
        stats
    }

    pub fn get(&self, key: &Windowed<K>) -> Option<&SummaryStatistics> {
        self.entries.get(key)
    }

    /// Drops every entry whose window ended at least `grace` before stream
    /// time. Returns the number of entries removed.
    pub fn evict_expired(&mut self) -> usize {
        let horizon = self.stream_time.saturating_sub(self.grace);
        match self.expiry.first_key_value() {
            Some((end, _)) if *end <= horizon => {}
            _ => return 0,
        }

        let retained = self.expiry.split_off(&horizon.saturating_add(1));
        let expired = std::mem::replace(&mut self.expiry, retained);
        let mut removed = 0;
        for key in expired.into_values().flatten() {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        self.evicted += removed as u64;
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SensorId;
    use crate::window::Window;

    fn record(ts: i64, value: f64) -> MeasurementRecord {
        MeasurementRecord::new(SensorId::new("s").unwrap(), ts, value)
    }

    #[test]
    fn test_one_entry_per_windowed_key() {
        let mut store = WindowStore::new(0);
        let key = Windowed::new(1u32, Window::new(0, 10));

        store.absorb(&key, &record(1, 5.0));
        let stats = *store.absorb(&key, &record(2, 7.0));

        assert_eq!(store.len(), 1);
        assert_eq!(stats.count, 2);
        assert_eq!(stats.sum, 12.0);
        assert_eq!(store.get(&key), Some(&stats));
    }

    #[test]
    fn test_distinct_windows_are_distinct_entries() {
        let mut store = WindowStore::new(0);
        store.absorb(&Windowed::new(1u32, Window::new(0, 10)), &record(5, 1.0));
        store.absorb(&Windowed::new(1u32, Window::new(5, 15)), &record(5, 1.0));
        store.absorb(&Windowed::new(2u32, Window::new(0, 10)), &record(5, 1.0));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_eviction_respects_grace() {
        let mut store = WindowStore::new(5);
        let early = Windowed::new(1u32, Window::new(0, 10));
        let late = Windowed::new(1u32, Window::new(10, 20));
        store.absorb(&early, &record(1, 1.0));
        store.absorb(&late, &record(11, 1.0));

        store.observe(14);
        assert_eq!(store.evict_expired(), 0);
        assert_eq!(store.len(), 2);

        store.observe(15);
        assert_eq!(store.evict_expired(), 1);
        assert!(store.get(&early).is_none());
        assert!(store.get(&late).is_some());
        assert_eq!(store.evicted(), 1);

        store.observe(100);
        assert_eq!(store.evict_expired(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_stream_time_never_moves_backwards() {
        let mut store: WindowStore<u32> = WindowStore::new(0);
        store.observe(50);
        store.observe(10);
        assert_eq!(store.stream_time(), 50);
    }
}
