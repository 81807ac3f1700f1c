// # File History Store
//
// File-based implementation of HistoryStore with crash recovery.
//
// ## Purpose
//
// Keeps the address history across restarts so that a restart is not
// mistaken for a cold start.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good history
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "entries": [
//     {
//       "id": 1,
//       "address": "203.0.113.5",
//       "previous_address": "203.0.113.5",
//       "source": "https://api.ipify.org",
//       "version": "v4",
//       "at": "2025-01-09T12:00:00Z"
//     }
//   ]
// }
// ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::IpVersion;
use crate::traits::history_store::{AddressEntry, HistoryStore, NewEntry};

/// History file format version
const HISTORY_FILE_VERSION: &str = "1.0";

/// File-based history store with crash recovery
///
/// Every `create` rewrites the whole file through a temporary file and a
/// rename, so a crash leaves either the old or the new history on disk.
///
/// # Example
///
/// ```rust,no_run
/// use ipwatch_core::history::FileHistoryStore;
/// use ipwatch_core::traits::{HistoryStore, IpVersion};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileHistoryStore::new("/var/lib/ipwatch/history.json").await?;
///
///     let latest = store.most_recent(IpVersion::V4).await?;
///     println!("{:?}", latest);
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileHistoryStore {
    path: PathBuf,
    entries: Arc<RwLock<Vec<AddressEntry>>>,
}

/// Serializable history file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct HistoryFileFormat {
    version: String,
    entries: Vec<AddressEntry>,
}

impl FileHistoryStore {
    /// Create or load a file history store
    ///
    /// This will:
    /// 1. Try to load existing history file
    /// 2. If corruption detected, try to load from backup
    /// 3. If both fail, start with empty history
    /// 4. Create parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::database(format!(
                    "Failed to create history directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let entries = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            entries: Arc::new(RwLock::new(entries)),
        })
    }

    /// Load history with automatic recovery from the backup file
    async fn load_with_recovery(path: &Path) -> Result<Vec<AddressEntry>, Error> {
        let err = match Self::load(path).await {
            Ok(entries) => {
                tracing::debug!(entries = entries.len(), "Loaded history file");
                return Ok(entries);
            }
            Err(e) => e,
        };

        // Only a parse failure counts as corruption; I/O errors propagate
        if !matches!(err, Error::Json(_)) {
            return Err(err);
        }

        tracing::warn!(
            error = %err,
            "History file appears corrupted, attempting recovery from backup"
        );

        let backup_path = Self::backup_path(path);
        if !backup_path.exists() {
            tracing::warn!("No backup file found, starting with empty history");
            return Ok(Vec::new());
        }

        match Self::load(&backup_path).await {
            Ok(entries) => {
                tracing::info!(entries = entries.len(), "Recovered history from backup");
                if let Err(restore_err) = fs::copy(&backup_path, path).await {
                    tracing::error!(
                        error = %restore_err,
                        "Failed to restore history file from backup"
                    );
                }
                Ok(entries)
            }
            Err(backup_err) => {
                tracing::error!(
                    error = %backup_err,
                    "Backup also corrupted, starting with empty history"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Load history from file
    async fn load(path: &Path) -> Result<Vec<AddressEntry>, Error> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "History file does not exist");
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::database(format!(
                "Failed to read history file {}: {}",
                path.display(),
                e
            ))
        })?;

        let file: HistoryFileFormat = serde_json::from_str(&content)?;

        if file.version != HISTORY_FILE_VERSION {
            tracing::warn!(
                expected = HISTORY_FILE_VERSION,
                found = %file.version,
                "History file version mismatch, attempting to load anyway"
            );
        }

        Ok(file.entries)
    }

    /// Write history to file atomically
    async fn write(&self, entries: &[AddressEntry]) -> Result<(), Error> {
        let file = HistoryFileFormat {
            version: HISTORY_FILE_VERSION.to_string(),
            entries: entries.to_vec(),
        };

        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::database(format!("Failed to serialize history: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut temp = fs::File::create(&temp_path).await.map_err(|e| {
                Error::database(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            temp.write_all(json.as_bytes()).await.map_err(|e| {
                Error::database(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            temp.flush().await.map_err(|e| {
                Error::database(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!(error = %e, "Failed to create history backup");
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::database(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!(path = %self.path.display(), "History written");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn create(&self, entry: NewEntry) -> Result<AddressEntry, Error> {
        // Held across the write so ids stay monotonic and the file matches memory
        let mut guard = self.entries.write().await;
        let id = guard.last().map_or(1, |last| last.id + 1);
        let entry = entry.into_entry(id);

        // Memory only changes once the file holds the entry
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend_from_slice(&guard);
        next.push(entry.clone());
        self.write(&next).await?;

        *guard = next;
        Ok(entry)
    }

    async fn most_recent(&self, version: IpVersion) -> Result<Option<AddressEntry>, Error> {
        let guard = self.entries.read().await;
        Ok(guard.iter().rev().find(|e| e.version == version).cloned())
    }

    async fn entries(&self, version: Option<IpVersion>) -> Result<Vec<AddressEntry>, Error> {
        let guard = self.entries.read().await;
        Ok(guard
            .iter()
            .filter(|e| version.is_none_or(|v| e.version == v))
            .cloned()
            .collect())
    }
}
