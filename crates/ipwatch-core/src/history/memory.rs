// # Memory History Store
//
// In-memory implementation of HistoryStore.
//
// ## Purpose
//
// Provides a simple, fast history that doesn't persist across restarts.
// Useful for testing or for deployments that only care about changes
// observed during the current run.
//
// ## Crash Behavior
//
// - All history is lost on restart
// - The first cycle after a restart is a cold start (no dispatch)

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::IpVersion;
use crate::traits::history_store::{AddressEntry, HistoryStore, NewEntry};

/// In-memory history store implementation
///
/// Entries live in a Vec protected by a RwLock; ids start at 1.
///
/// # Example
///
/// ```rust,no_run
/// use ipwatch_core::history::MemoryHistoryStore;
/// use ipwatch_core::traits::{HistoryStore, IpVersion, NewEntry};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryHistoryStore::new();
///
///     let ip = "203.0.113.5".parse()?;
///     store.create(NewEntry::first(ip, "https://api.ipify.org", IpVersion::V4)).await?;
///
///     let latest = store.most_recent(IpVersion::V4).await?;
///     assert_eq!(latest.map(|e| e.address), Some(ip));
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryHistoryStore {
    inner: Arc<RwLock<Vec<AddressEntry>>>,
}

impl MemoryHistoryStore {
    /// Create a new empty memory history store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of entries in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn create(&self, entry: NewEntry) -> Result<AddressEntry, Error> {
        let mut guard = self.inner.write().await;
        let id = guard.last().map_or(1, |last| last.id + 1);
        let entry = entry.into_entry(id);
        guard.push(entry.clone());
        Ok(entry)
    }

    async fn most_recent(&self, version: IpVersion) -> Result<Option<AddressEntry>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.iter().rev().find(|e| e.version == version).cloned())
    }

    async fn entries(&self, version: Option<IpVersion>) -> Result<Vec<AddressEntry>, Error> {
        let guard = self.inner.read().await;
        Ok(guard
            .iter()
            .filter(|e| version.is_none_or(|v| e.version == v))
            .cloned()
            .collect())
    }
}
