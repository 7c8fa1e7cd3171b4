use thiserror::Error;

/// Errors raised while assembling a topology. None of these can occur once
/// records are flowing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("window size must be positive, got {0}ms")]
    NonPositiveWindowSize(i64),
    #[error("window advance must be positive, got {0}ms")]
    NonPositiveAdvance(i64),
    #[error("window advance ({advance}ms) must not exceed window size ({size}ms)")]
    AdvanceExceedsSize { size: i64, advance: i64 },
    #[error("window size of {0}ms is larger than supported")]
    WindowTooLarge(i64),
    #[error("grace period of {0}ms is larger than supported")]
    GraceTooLarge(i64),
    #[error("grace period must not be negative, got {0}ms")]
    NegativeGrace(i64),
    #[error("topology needs at least one partition")]
    NoPartitions,
    #[error("journal capacity must be positive")]
    ZeroCapacity,
    #[error("stat kind '{0}' is registered twice")]
    DuplicateStatKind(String),
    #[error("output topic '{0}' is already bound to another stat kind")]
    DuplicateTopic(String),
    #[error("stat kind '{0}' has no storage key selector but a storage sink is configured")]
    MissingStorageKeySelector(String),
    #[error("topology has no stat kinds")]
    NoStatKinds,
    #[error("cannot open journal '{name}': {reason}")]
    Journal { name: String, reason: String },
}

/// Rejections at the record boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("identifier '{identifier}' is longer than {max} bytes")]
    IdentifierTooLong { identifier: String, max: usize },
    #[error("identifier '{0}' contains a NUL byte")]
    IdentifierContainsNul(String),
    #[error("value of '{identifier}' at {timestamp} is not finite")]
    NonFiniteValue { identifier: String, timestamp: i64 },
    #[error("timestamp {timestamp} of '{identifier}' is outside the supported range")]
    TimestampOutOfRange { identifier: String, timestamp: i64 },
}

/// Failures reported by a durable storage writer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("row for table '{table}' rejected: {reason}")]
    Rejected { table: String, reason: String },
    #[error("storage writer is unavailable: {0}")]
    Unavailable(String),
}
