mod aggregate;
mod completeness;
mod engine;
mod error;
mod formatter;
mod journal_store;
mod key;
pub mod measure;
mod merge;
mod op_counter;
mod pipe;
mod record;
pub mod sink;
mod stage;
mod stats;
mod storage;
mod topology;
mod window;
mod window_store;

pub use crate::aggregate::{AggregateMetrics, AggregateSnapshot, WindowUpdate, WindowedAggregate};
pub use crate::completeness::completeness;
pub use crate::engine::WorkerEngine;
pub use crate::error::{ConfigError, RecordError, StorageError};
pub use crate::formatter::*;
pub use crate::journal_store::{JournalStore, JournalStoreOptions, StoreJournalReader};
pub use crate::key::*;
pub use crate::merge::InputMerger;
pub use crate::pipe::*;
pub use crate::record::*;
pub use crate::stage::{OutputCollector, Pipeline, Stage, StageExt};
pub use crate::stats::SummaryStatistics;
pub use crate::topology::{StatKind, StatsTopology, TopologyBuilder, TopologyOptions};
pub use crate::window::{Window, WindowPolicy, Windowed};
pub use crate::window_store::WindowStore;

pub use chrono_tz::Tz;
