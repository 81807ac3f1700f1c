// # History Store Trait
//
// Defines the interface for the append-only address history.
//
// ## Purpose
//
// The history store records every confirmed address:
// - one entry on cold start (address == previous_address)
// - one entry per detected change
//
// Entries are never mutated or deleted. The watcher only reads the most
// recent entry per version and asks for new ones to be created.
//
// ## Implementations
//
// - `MemoryHistoryStore`: in-process, lost on restart
// - `FileHistoryStore`: JSON file with atomic writes and backup recovery

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::config::IpVersion;

/// A recorded address observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressEntry {
    /// Monotonic id assigned by the store
    pub id: u64,
    /// The confirmed address
    pub address: IpAddr,
    /// The address recorded before this one
    pub previous_address: IpAddr,
    /// URL of the source that reported the address
    pub source: String,
    /// Address version
    pub version: IpVersion,
    /// When the entry was recorded
    #[serde(rename = "at")]
    pub created_at: DateTime<Utc>,
}

/// Data the watcher supplies when asking for a new entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    /// The confirmed address
    pub address: IpAddr,
    /// The address recorded before this one
    pub previous_address: IpAddr,
    /// URL of the source that reported the address
    pub source: String,
    /// Address version
    pub version: IpVersion,
}

impl NewEntry {
    /// Build the entry recorded on cold start
    pub fn first(address: IpAddr, source: impl Into<String>, version: IpVersion) -> Self {
        Self {
            address,
            previous_address: address,
            source: source.into(),
            version,
        }
    }

    /// Build the entry recorded for a change
    pub fn change(
        previous_address: IpAddr,
        address: IpAddr,
        source: impl Into<String>,
        version: IpVersion,
    ) -> Self {
        Self {
            address,
            previous_address,
            source: source.into(),
            version,
        }
    }

    /// Turn into a stored entry
    ///
    /// Only store implementations assign ids.
    pub(crate) fn into_entry(self, id: u64) -> AddressEntry {
        AddressEntry {
            id,
            address: self.address,
            previous_address: self.previous_address,
            source: self.source,
            version: self.version,
            created_at: Utc::now(),
        }
    }
}

/// Trait for history store implementations
///
/// All methods must be safe to call concurrently from multiple tasks.
/// Failures are reported as [`crate::Error::Database`].
///
/// There is no compare-and-set: the watcher reads with `most_recent` and
/// then calls `create`. Cycles never overlap, so the window is not raced
/// by the watcher itself.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a new entry and return it with its assigned id
    async fn create(&self, entry: NewEntry) -> Result<AddressEntry, crate::Error>;

    /// The highest-id entry for `version`, if any
    async fn most_recent(&self, version: IpVersion) -> Result<Option<AddressEntry>, crate::Error>;

    /// All entries in id order, optionally filtered by version
    async fn entries(&self, version: Option<IpVersion>)
    -> Result<Vec<AddressEntry>, crate::Error>;
}
