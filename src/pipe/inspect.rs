use crate::stage::{OutputCollector, Stage};
use std::marker::PhantomData;

/// Passes the item through while performing a side effect.
pub struct Inspect<T, F> {
    f: F,
    _phantom: PhantomData<fn(T)>,
}

impl<T, F: FnMut(&T)> Stage<T, T> for Inspect<T, F> {
    #[inline(always)]
    fn process<C>(&mut self, item: &T, collector: &mut C)
    where
        C: OutputCollector<T>,
    {
        (self.f)(item);
        collector.push(item);
    }
}

pub fn inspect<T>(f: impl FnMut(&T)) -> Inspect<T, impl FnMut(&T)> {
    Inspect {
        f,
        _phantom: PhantomData,
    }
}
