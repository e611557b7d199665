use thiserror::Error;

use crate::schema::LevelUpEvent;

/// Failures of a reconciliation cycle.
///
/// A cycle that loses the race for the reconciliation lock is not an error;
/// see [`SyncOutcome::Skipped`](crate::SyncOutcome::Skipped).
#[derive(Debug, Error)]
pub enum SyncError {
    /// Negative or otherwise malformed counter, delta or sample.  No state
    /// was touched.
    #[error("invalid {what}: {value}")]
    InvalidInput { what: &'static str, value: i64 },

    /// The step data source could not be queried.  No state was touched.
    #[error("step data source unavailable: {0}")]
    DataSourceUnavailable(String),

    /// The cycle was applied in memory but the store rejected the write.
    /// `events` are the level-ups credited by this cycle; they stay credited
    /// and the next cycle retries the write.
    #[error("failed to persist progress ({} level-ups pending)", .events.len())]
    PersistFailed {
        events: Vec<LevelUpEvent>,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("database: {0}")]
    Database(#[from] redb::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("snapshot version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}
