use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Sums the cursor movements of every journal reader. A stable total means
/// every worker has drained its inputs.
pub struct OpCounter {
    counters: Mutex<Vec<Arc<AtomicU64>>>,
}

impl OpCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            counters: Mutex::new(vec![]),
        })
    }

    pub fn total_op_count(&self) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    pub fn new_counter(&self) -> Arc<AtomicU64> {
        let counter = Arc::new(AtomicU64::new(0));
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(counter.clone());
        counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_over_counters() {
        let ops = OpCounter::new();
        let a = ops.new_counter();
        let b = ops.new_counter();
        a.fetch_add(3, Ordering::Relaxed);
        b.fetch_add(4, Ordering::Relaxed);
        assert_eq!(ops.total_op_count(), 7);
    }
}
