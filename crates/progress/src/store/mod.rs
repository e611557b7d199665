//! Persistence of the `(ProgressState, DailyWatermark)` pair, plus the
//! incremental-sample cursor that goes with it.
//!
//! Every backend writes a [`Snapshot`] as one unit: a reader sees either the
//! old snapshot or the new one, never a mix.

mod json;
mod redb_store;

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sidequest_config::{StorageBackend, StorageConfig};

use crate::error::StoreError;
use crate::schema::{DailyWatermark, ProgressState, SampleAnchor};

pub use json::JsonFileStore;
pub use redb_store::RedbStore;

/// Bumped when the on-disk layout changes incompatibly.
pub const SNAPSHOT_VERSION: u32 = 1;

/// The persisted record pair plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub progress: ProgressState,
    pub watermark: DailyWatermark,
    /// Cursor past the last sample batch credited into `progress`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<SampleAnchor>,
}

impl Snapshot {
    pub fn new(progress: ProgressState, watermark: DailyWatermark) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            progress,
            watermark,
            anchor: None,
        }
    }

    pub fn with_anchor(mut self, anchor: Option<SampleAnchor>) -> Self {
        self.anchor = anchor;
        self
    }

    /// Refuse layouts written by a newer build.  Older versions are read
    /// as-is; every field added since version 1 has a default.
    pub fn check_version(&self) -> Result<(), StoreError> {
        if self.version > SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: self.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        Ok(())
    }
}

#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Load the last saved pair, or `None` on first run.
    async fn load(&self) -> Result<Option<Snapshot>, StoreError>;

    /// Write the whole snapshot, or nothing.
    async fn save_atomic(&self, snapshot: &Snapshot) -> Result<(), StoreError>;
}

/// Process-local store.  Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slot: Mutex<Option<Snapshot>>,
}

impl MemoryStore {
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            slot: Mutex::new(Some(snapshot)),
        }
    }

    /// Current contents without going through the async trait.
    pub fn peek(&self) -> Option<Snapshot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.peek())
    }

    async fn save_atomic(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(snapshot.clone());
        Ok(())
    }
}

/// Open the backend selected in `[storage]`.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn PersistenceStore>> {
    let path = Path::new(&config.path);
    let store: Arc<dyn PersistenceStore> = match config.backend {
        StorageBackend::Json => Arc::new(JsonFileStore::new(path)),
        StorageBackend::Redb => Arc::new(
            RedbStore::open(path)
                .with_context(|| format!("opening redb store at {}", path.display()))?,
        ),
    };
    Ok(store)
}
