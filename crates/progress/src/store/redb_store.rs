//! [`redb`]-backed store.  Both records live in one table and are replaced
//! inside a single write transaction, so the commit is the atomicity point.
//!
//! | Key         | Value                                    |
//! |-------------|------------------------------------------|
//! | `version`   | JSON `u32` snapshot layout version       |
//! | `progress`  | JSON [`ProgressState`]                   |
//! | `watermark` | JSON [`DailyWatermark`]                  |
//! | `anchor`    | JSON [`SampleAnchor`], absent when unset |
//! | `saved_at`  | RFC 3339 timestamp of the write          |

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};

use super::{PersistenceStore, SNAPSHOT_VERSION, Snapshot};
use crate::error::StoreError;
use crate::schema::{DailyWatermark, ProgressState, SampleAnchor};

const STATE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("state");

const VERSION_KEY: &str = "version";
const PROGRESS_KEY: &str = "progress";
const WATERMARK_KEY: &str = "watermark";
const ANCHOR_KEY: &str = "anchor";
const SAVED_AT_KEY: &str = "saved_at";

fn db_err<E: Into<redb::Error>>(err: E) -> StoreError {
    StoreError::Database(err.into())
}

pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl RedbStore {
    /// Open or create the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(&path).map_err(db_err)?;

        // Ensure the table exists so read transactions never miss it.
        {
            let tx = db.begin_write().map_err(db_err)?;
            tx.open_table(STATE_TABLE).map_err(db_err)?;
            tx.commit().map_err(db_err)?;
        }

        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PersistenceStore for RedbStore {
    async fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        let tx = self.db.begin_read().map_err(db_err)?;
        let table = tx.open_table(STATE_TABLE).map_err(db_err)?;

        let progress = table.get(PROGRESS_KEY).map_err(db_err)?;
        let watermark = table.get(WATERMARK_KEY).map_err(db_err)?;
        let (progress, watermark) = match (progress, watermark) {
            (None, None) => return Ok(None),
            (Some(p), Some(w)) => (
                serde_json::from_slice::<ProgressState>(p.value())?,
                serde_json::from_slice::<DailyWatermark>(w.value())?,
            ),
            _ => {
                return Err(StoreError::Corrupt(
                    "only one of progress/watermark present".to_string(),
                ));
            }
        };

        let version = match table.get(VERSION_KEY).map_err(db_err)? {
            Some(raw) => serde_json::from_slice::<u32>(raw.value())?,
            None => SNAPSHOT_VERSION,
        };
        let anchor = match table.get(ANCHOR_KEY).map_err(db_err)? {
            Some(raw) => Some(serde_json::from_slice::<SampleAnchor>(raw.value())?),
            None => None,
        };

        let saved_at = table
            .get(SAVED_AT_KEY)
            .map_err(db_err)?
            .and_then(|raw| {
                std::str::from_utf8(raw.value())
                    .ok()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            })
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let snapshot = Snapshot {
            version,
            saved_at,
            progress,
            watermark,
            anchor,
        };
        snapshot.check_version()?;
        Ok(Some(snapshot))
    }

    async fn save_atomic(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let version_bytes = serde_json::to_vec(&snapshot.version)?;
        let progress_bytes = serde_json::to_vec(&snapshot.progress)?;
        let watermark_bytes = serde_json::to_vec(&snapshot.watermark)?;
        let anchor_bytes = snapshot.anchor.as_ref().map(serde_json::to_vec).transpose()?;
        let saved_at = snapshot.saved_at.to_rfc3339();

        let tx = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = tx.open_table(STATE_TABLE).map_err(db_err)?;
            table
                .insert(VERSION_KEY, version_bytes.as_slice())
                .map_err(db_err)?;
            table
                .insert(PROGRESS_KEY, progress_bytes.as_slice())
                .map_err(db_err)?;
            table
                .insert(WATERMARK_KEY, watermark_bytes.as_slice())
                .map_err(db_err)?;
            match &anchor_bytes {
                Some(bytes) => {
                    table.insert(ANCHOR_KEY, bytes.as_slice()).map_err(db_err)?;
                }
                None => {
                    table.remove(ANCHOR_KEY).map_err(db_err)?;
                }
            }
            table
                .insert(SAVED_AT_KEY, saved_at.as_bytes())
                .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(())
    }
}
