use std::marker::PhantomData;

/// A unit of work in a pipeline. A stage may push zero, one or many outputs
/// for every input it receives.
pub trait Stage<In, Out> {
    fn process<C>(&mut self, data: &In, collector: &mut C)
    where
        C: OutputCollector<Out>;
}

pub trait OutputCollector<T> {
    fn push(&mut self, item: &T);
}

impl<T, F> OutputCollector<T> for F
where
    F: FnMut(&T),
{
    #[inline(always)]
    fn push(&mut self, item: &T) {
        (self)(item);
    }
}

impl<F, In, Out> Stage<In, Out> for F
where
    F: FnMut(&In) -> Option<Out>,
{
    #[inline(always)]
    fn process<C>(&mut self, data: &In, collector: &mut C)
    where
        C: OutputCollector<Out>,
    {
        if let Some(out) = (self)(data) {
            collector.push(&out);
        }
    }
}

pub struct Pipeline<S1, S2, In, Mid, Out> {
    s1: S1,
    s2: S2,
    _phantom: PhantomData<fn(In, Mid) -> Out>,
}

impl<In, Mid, Out, S1, S2> Stage<In, Out> for Pipeline<S1, S2, In, Mid, Out>
where
    S1: Stage<In, Mid>,
    S2: Stage<Mid, Out>,
{
    #[inline(always)]
    fn process<C>(&mut self, data: &In, collector: &mut C)
    where
        C: OutputCollector<Out>,
    {
        let s2 = &mut self.s2;
        self.s1.process(data, &mut |mid: &Mid| {
            s2.process(mid, collector);
        });
    }
}

pub trait StageExt<In, Mid>: Stage<In, Mid> {
    #[inline(always)]
    fn pipe<Out, S2: Stage<Mid, Out>>(self, s2: S2) -> Pipeline<Self, S2, In, Mid, Out>
    where
        Self: Sized,
    {
        Pipeline {
            s1: self,
            s2,
            _phantom: PhantomData,
        }
    }
}

impl<S, In, Mid> StageExt<In, Mid> for S where S: Stage<In, Mid> {}

/// Chains stages left to right into a single [`Stage`].
#[macro_export]
macro_rules! pipe {
    ($s1:expr) => { $s1 };
    ($s1:expr, $($rest:expr),+ $(,)?) => {
        {
            use $crate::StageExt;
            $s1.pipe($crate::pipe!($($rest),+))
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_closures() {
        let mut p = pipe![|x: &u32| Some(*x as u64), |x: &u64| Some(*x as u8),];

        let mut out = Vec::new();
        p.process(&100u32, &mut |x: &u8| out.push(*x));
        assert_eq!(out, vec![100u8]);
    }

    #[test]
    fn test_pipe_one_to_many() {
        struct Duplicate;
        impl Stage<u64, u64> for Duplicate {
            fn process<C>(&mut self, data: &u64, collector: &mut C)
            where
                C: OutputCollector<u64>,
            {
                collector.push(data);
                collector.push(data);
            }
        }

        let mut p = pipe![|x: &u32| Some(*x as u64), Duplicate, |x: &u64| Some(*x as u8),];

        let mut out = Vec::new();
        p.process(&10u32, &mut |x: &u8| out.push(*x));
        assert_eq!(out, vec![10u8, 10u8]);
    }
}
