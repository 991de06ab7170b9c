//! Persisted client settings.
//!
//! The only value the sync engine needs to survive restarts is the
//! watermark of the last successful pull.

use crate::error::CoreResult;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Durable settings used by the sync engine.
pub trait SettingsStore: Send + Sync {
    /// Server timestamp of the last successful pull, if any.
    fn sync_last_run(&self) -> Option<DateTime<Utc>>;

    /// Stores the pull watermark; `None` resets it.
    fn set_sync_last_run(&self, value: Option<DateTime<Utc>>);
}

/// Settings kept in memory only.
#[derive(Debug, Default)]
pub struct MemorySettings {
    last_run: RwLock<Option<DateTime<Utc>>>,
}

impl MemorySettings {
    /// Creates empty settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates settings with a preset watermark.
    pub fn with_last_run(last_run: DateTime<Utc>) -> Self {
        Self {
            last_run: RwLock::new(Some(last_run)),
        }
    }
}

impl SettingsStore for MemorySettings {
    fn sync_last_run(&self) -> Option<DateTime<Utc>> {
        *self.last_run.read()
    }

    fn set_sync_last_run(&self, value: Option<DateTime<Utc>>) {
        *self.last_run.write() = value;
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct SettingsDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sync_last_run: Option<DateTime<Utc>>,
}

/// Settings stored as a JSON document on disk.
///
/// Writes go through a sibling temporary file followed by a rename so a
/// crash never leaves a truncated document behind. A missing file reads as
/// empty settings.
pub struct JsonFileSettings {
    path: PathBuf,
    document: RwLock<SettingsDocument>,
}

impl JsonFileSettings {
    /// Opens (or lazily creates) the settings file at `path`.
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let document = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => SettingsDocument::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            document: RwLock::new(document),
        })
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, document: &SettingsDocument) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(document)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SettingsStore for JsonFileSettings {
    fn sync_last_run(&self) -> Option<DateTime<Utc>> {
        self.document.read().sync_last_run
    }

    fn set_sync_last_run(&self, value: Option<DateTime<Utc>>) {
        let mut document = self.document.write();
        document.sync_last_run = value;
        if let Err(e) = self.save(&document) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to save settings");
        }
    }
}
