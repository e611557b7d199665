use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ── Storage backend ───────────────────────────────────────────────────────────

/// Where the progress/watermark pair is persisted.
///
/// | Backend | Layout                                                        |
/// |---------|---------------------------------------------------------------|
/// | `json`  | One JSON document, replaced via `.tmp` + rename.              |
/// | `redb`  | Two keys in a redb table, written in a single transaction.   |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Json,
    Redb,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PlayerConfig {
    /// Display name.  When non-empty it is woven into level-up notification
    /// text.
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// IANA timezone name (e.g. `"America/New_York"`).  Defines the local
    /// calendar day the daily step counter resets on.  Falls back to UTC when
    /// the name is unrecognised.
    pub timezone: String,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Json,
            path: ".sidequest/progress.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Triggers waiting behind the one being processed.  Anything posted
    /// while the queue is full is dropped; the next trigger re-reads the
    /// counter anyway.
    pub queue_capacity: usize,
    /// How often the service polls the cumulative counter on its own.
    /// `0` disables the periodic poll.
    pub poll_interval_secs: u64,
    /// Read steps through anchored incremental-sample batches instead of
    /// the cumulative counter.  Every trigger (startup, poll, change) then
    /// takes the sample path.  Switching an existing store into this mode
    /// mid-day re-credits the samples the counter already covered.
    pub incremental_samples: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1,
            poll_interval_secs: 300,
            incremental_samples: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub enabled: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub player: PlayerConfig,
    pub clock: ClockConfig,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub notifications: NotificationsConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Apply `SIDEQUEST_*` overrides on top of the file values.  Empty values
    /// are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(value) = get("SIDEQUEST_TIMEZONE") {
            self.clock.timezone = value;
        }
        if let Some(value) = get("SIDEQUEST_STATE_PATH") {
            self.storage.path = value;
        }
        if let Some(value) = get("SIDEQUEST_LOG") {
            self.telemetry.log_level = value;
        }
    }

    /// Player name with surrounding whitespace removed, or `None` when unset.
    pub fn player_name(&self) -> Option<&str> {
        let name = self.player.name.trim();
        (!name.is_empty()).then_some(name)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
