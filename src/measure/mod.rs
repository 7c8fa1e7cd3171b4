mod latency_measurer;

pub use latency_measurer::{LatencyMeasurer, LatencyMeasurerGuard, LatencyStats};
