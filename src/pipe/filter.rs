use crate::stage::{OutputCollector, Stage};
use std::marker::PhantomData;

/// Only passes items that satisfy the predicate.
pub struct Filter<T, P> {
    predicate: P,
    _phantom: PhantomData<fn(T)>,
}

impl<T, P: FnMut(&T) -> bool> Stage<T, T> for Filter<T, P> {
    #[inline(always)]
    fn process<C>(&mut self, item: &T, collector: &mut C)
    where
        C: OutputCollector<T>,
    {
        if (self.predicate)(item) {
            collector.push(item);
        }
    }
}

pub fn filter<T>(predicate: impl FnMut(&T) -> bool) -> Filter<T, impl FnMut(&T) -> bool> {
    Filter {
        predicate,
        _phantom: PhantomData,
    }
}
