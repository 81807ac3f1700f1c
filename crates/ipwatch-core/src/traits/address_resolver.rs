// # Address Resolver Trait
//
// Defines the interface for determining the host's current public address.
//
// ## Implementations
//
// - HTTP multi-source fallback: `ipwatch-resolver-http` crate
//
// ## Usage
//
// ```rust,ignore
// use ipwatch_core::{AddressResolver, IpVersion};
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let resolver = /* AddressResolver implementation */;
//
//     let resolved = resolver.request_address(IpVersion::V4).await?;
//     println!("{} (from {})", resolved.address, resolved.source);
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::net::IpAddr;

use crate::config::IpVersion;

/// An address together with the URL that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    /// The validated address
    pub address: IpAddr,
    /// URL of the winning source
    pub source: String,
}

impl ResolvedAddress {
    /// Create a resolved address
    pub fn new(address: IpAddr, source: impl Into<String>) -> Self {
        Self {
            address,
            source: source.into(),
        }
    }
}

/// Trait for address resolver implementations
///
/// A resolver answers one question per call: what is the current address
/// for `version`. It performs no retries over time; a failed call is
/// retried by the next scheduled cycle.
///
/// # Errors
///
/// Implementations return [`crate::Error::Fetch`] when no source produced
/// a valid address.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// Resolve the current address for `version`
    async fn request_address(&self, version: IpVersion) -> Result<ResolvedAddress, crate::Error>;
}
