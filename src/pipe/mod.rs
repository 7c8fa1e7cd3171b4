mod filter;
mod inspect;
mod latency;
mod map;
mod progress;

pub use filter::{Filter, filter};
pub use inspect::{Inspect, inspect};
pub use latency::{Latency, latency};
pub use map::{Map, map};
pub use progress::{Progress, progress};
