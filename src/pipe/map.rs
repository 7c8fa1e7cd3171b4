use crate::stage::{OutputCollector, Stage};
use std::marker::PhantomData;

/// Transforms an item from one type to another.
pub struct Map<In, Out, F> {
    f: F,
    _phantom: PhantomData<fn(In) -> Out>,
}

impl<In, Out, F: FnMut(&In) -> Out> Map<In, Out, F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

impl<In, Out, F: FnMut(&In) -> Out> Stage<In, Out> for Map<In, Out, F> {
    #[inline(always)]
    fn process<C>(&mut self, data: &In, collector: &mut C)
    where
        C: OutputCollector<Out>,
    {
        let out = (self.f)(data);
        collector.push(&out);
    }
}

pub fn map<In, Out>(f: impl FnMut(&In) -> Out) -> Map<In, Out, impl FnMut(&In) -> Out> {
    Map::new(f)
}
