mod sqlite;
mod storage;
mod topic;

use crate::record::{SensorId, StatsRecord};
use crate::window::Window;

pub use sqlite::SqliteWriter;
pub use storage::{
    ColumnKeySelector, FnKeySelector, MemoryWriter, Persist, StatsWriter, StorageKeySelector,
    StorageRecord, StorageRow, StorageSink, Value, WindowKeySelector, key_selector,
};
pub use topic::{Publish, TopicReader};

/// A formatted result on its way to the sinks, together with the identifier
/// it is keyed by and the window it describes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Emission<R: StatsRecord> {
    pub sensor_id: SensorId,
    pub window: Window,
    pub record: R,
}
