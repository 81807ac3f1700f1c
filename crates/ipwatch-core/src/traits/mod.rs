//! Core traits for the address watcher
//!
//! This module defines the abstract interfaces the runtime depends on.
//!
//! - [`AddressResolver`]: Determine the current public address
//! - [`HistoryStore`]: Append-only address history
//! - [`MailTransport`]: Outbound mail sessions

pub mod address_resolver;
pub mod history_store;
pub mod mail_transport;

pub use crate::config::IpVersion;
pub use address_resolver::{AddressResolver, ResolvedAddress};
pub use history_store::{AddressEntry, HistoryStore, NewEntry};
pub use mail_transport::{MailMessage, MailSession, MailTransport};
