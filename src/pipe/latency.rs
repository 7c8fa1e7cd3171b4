use crate::measure::LatencyMeasurer;
use crate::stage::{OutputCollector, Stage};
use spdlog::info;
use std::marker::PhantomData;

/// Measures how long an inner stage takes per item and periodically logs the
/// distribution.
pub struct Latency<In, Out, S> {
    name: String,
    report_interval: usize,
    stage: S,
    measurer: LatencyMeasurer,
    count: usize,
    _phantom: PhantomData<fn(In) -> Out>,
}

impl<In, Out, S> Latency<In, Out, S>
where
    S: Stage<In, Out>,
{
    pub fn new(name: impl Into<String>, report_interval: usize, sample_rate: u64, stage: S) -> Self {
        assert!(report_interval > 0, "report_interval must be greater than 0");
        Latency {
            name: name.into(),
            report_interval,
            stage,
            measurer: LatencyMeasurer::new(sample_rate),
            count: 0,
            _phantom: PhantomData,
        }
    }

    pub fn measurer(&self) -> &LatencyMeasurer {
        &self.measurer
    }
}

impl<In, Out, S> Stage<In, Out> for Latency<In, Out, S>
where
    S: Stage<In, Out>,
{
    #[inline(always)]
    fn process<C>(&mut self, data: &In, collector: &mut C)
    where
        C: OutputCollector<Out>,
    {
        {
            let _guard = self.measurer.measure_with_guard();
            self.stage.process(data, collector);
        }
        self.count += 1;
        if self.count.is_multiple_of(self.report_interval) {
            info!("[{}] Latency: {}", self.name, self.measurer.format_stats());
        }
    }
}

pub fn latency<In, Out, S>(
    name: impl Into<String>,
    report_interval: usize,
    sample_rate: u64,
    stage: S,
) -> Latency<In, Out, S>
where
    S: Stage<In, Out>,
{
    Latency::new(name, report_interval, sample_rate, stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_latency_logic() {
        let mut pipe = latency("test", 2, 1, |x: &u32| {
            thread::sleep(Duration::from_millis(10));
            Some(*x as u64)
        });

        let mut out = Vec::new();
        pipe.process(&1u32, &mut |x: &u64| out.push(*x));
        pipe.process(&2u32, &mut |x: &u64| out.push(*x));
        assert_eq!(out, vec![1, 2]);

        let stats = pipe.measurer().get_stats();
        assert_eq!(stats.count, 2);
        assert!(stats.min >= 10_000_000); // at least 10ms in nanos
    }
}
