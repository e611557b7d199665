use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::{PersistenceStore, Snapshot};
use crate::error::StoreError;

/// The whole snapshot in one JSON document.
///
/// Crash-safety: the new document is written to a `.tmp` sibling, fsync'd,
/// then renamed over the original.  A crash before the rename leaves the old
/// pair in place; after it, the new pair.  Neither state mixes the two.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let filename = self
            .path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "progress.json".to_string());
        self.path.with_file_name(format!("{filename}.{suffix}"))
    }

    /// Move an unreadable document aside so the next save does not clobber
    /// the evidence.
    async fn quarantine(&self) {
        let corrupt_path = self.sibling("corrupt");
        if let Err(err) = tokio::fs::rename(&self.path, &corrupt_path).await {
            warn!(error = %err, path = %self.path.display(), "could not move corrupt progress file aside");
        }
    }
}

#[async_trait]
impl PersistenceStore for JsonFileStore {
    async fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        match serde_json::from_str::<Snapshot>(&raw) {
            Ok(snapshot) => {
                // A newer layout is not corrupt; leave the file alone.
                snapshot.check_version()?;
                info!(
                    path = %self.path.display(),
                    level = snapshot.progress.level,
                    steps = snapshot.progress.steps,
                    "progress loaded"
                );
                Ok(Some(snapshot))
            }
            Err(err) => {
                warn!(
                    error = %err,
                    path = %self.path.display(),
                    "corrupt progress file, starting fresh (original preserved in .corrupt file)"
                );
                self.quarantine().await;
                Ok(None)
            }
        }
    }

    async fn save_atomic(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = self.sibling("tmp");
        let body = serde_json::to_vec_pretty(snapshot)?;

        let write_result: Result<(), StoreError> = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .await?;
            file.write_all(&body).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        if let Err(err) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        Ok(())
    }
}
