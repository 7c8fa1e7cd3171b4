use crate::aggregate::{AggregateMetrics, WindowUpdate};
use crate::pipe::{Filter, filter};
use crate::window::WindowPolicy;
use std::sync::Arc;
use std::sync::atomic::Ordering::Relaxed;

/// Forwards an update only when the record that triggered it lies in the
/// last hop of its window, i.e. `timestamp >= window.end - advance`.
///
/// Earlier updates of the same window are dropped. A record arriving late but
/// before that boundary therefore never reaches the output, and several
/// records inside the last hop each forward their own update.
pub fn completeness<K>(
    policy: WindowPolicy,
    metrics: Arc<AggregateMetrics>,
) -> Filter<WindowUpdate<K>, impl FnMut(&WindowUpdate<K>) -> bool> {
    filter(move |update: &WindowUpdate<K>| {
        let forward = policy.is_final_hop(&update.key.window, update.timestamp);
        if forward {
            metrics.forwarded.fetch_add(1, Relaxed);
        }
        forward
    })
}
