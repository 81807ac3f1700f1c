// # HTTP Address Resolver
//
// This crate provides the HTTP-based address resolver for the watcher.
//
// ## Behavior
//
// Sources are queried in configuration order and the first one that
// yields a valid address wins. A source is skipped when:
// - it has no URL for the requested version
// - the request fails at the transport level
// - the status is outside 200..300
// - the Content-Type does not match the configured response type
// - the body cannot be parsed or lacks the configured JSON field
// - the value is not an address of the requested version
//
// There is no retry within one call; the next scheduled cycle retries.
// Requests use the client's default timeout.

use async_trait::async_trait;
use ipwatch_core::config::{IpVersion, ResponseType, SourceConfig, WatcherConfig};
use ipwatch_core::traits::{AddressResolver, ResolvedAddress};
use ipwatch_core::{Error, Result};
use reqwest::header::CONTENT_TYPE;
use std::net::IpAddr;
use tracing::{debug, warn};

/// Why a single source was skipped
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Transport-level failure
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-2xx status
    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),

    /// Content-Type does not match the configured response type
    #[error("content type mismatch, expected '{expected}' but got '{found}'")]
    ContentType {
        expected: &'static str,
        found: String,
    },

    /// Body is not a JSON object
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON object lacks the configured field
    #[error("expected field '{0}' to be present on response")]
    MissingField(String),

    /// JSON field is not a string
    #[error("field '{0}' is not a string")]
    FieldType(String),

    /// Value is not an address of the requested version
    #[error("not a valid IP{version} address: '{value}'")]
    InvalidAddress { version: IpVersion, value: String },
}

/// Resolves the public address from an ordered list of HTTP sources
#[derive(Debug, Clone)]
pub struct HttpResolver {
    sources: Vec<SourceConfig>,
    force_source: Option<String>,
    client: reqwest::Client,
}

impl HttpResolver {
    /// Create a resolver over `sources`
    ///
    /// When `force_source` names a source, every other source is skipped.
    pub fn new(sources: Vec<SourceConfig>, force_source: Option<String>) -> Self {
        Self::with_client(sources, force_source, reqwest::Client::new())
    }

    /// Create a resolver using a preconfigured HTTP client
    pub fn with_client(
        sources: Vec<SourceConfig>,
        force_source: Option<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            sources,
            force_source,
            client,
        }
    }

    /// Create a resolver from the watcher configuration
    pub fn from_config(config: &WatcherConfig) -> Self {
        Self::new(config.sources.clone(), config.watcher.force_source.clone())
    }

    /// Sources that take part in resolution, in order
    fn candidates(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|source| {
            self.force_source
                .as_deref()
                .is_none_or(|forced| forced == source.name)
        })
    }

    /// Query one source
    async fn query(
        &self,
        source: &SourceConfig,
        url: &str,
        version: IpVersion,
    ) -> std::result::Result<IpAddr, SourceError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let expected = source.response_type.content_type();
        if !content_type.contains(expected) {
            return Err(SourceError::ContentType {
                expected,
                found: content_type,
            });
        }

        let body = response.bytes().await?;
        let value = match source.response_type {
            ResponseType::Text => String::from_utf8_lossy(&body).into_owned(),
            ResponseType::Json => {
                // Validated configuration guarantees a field for json sources
                let field = source.field.as_deref().unwrap_or_default();
                extract_field(&body, field)?
            }
        };

        parse_address(&value, version)
    }
}

#[async_trait]
impl AddressResolver for HttpResolver {
    async fn request_address(&self, version: IpVersion) -> Result<ResolvedAddress> {
        for source in self.candidates() {
            let Some(url) = source.url_for(version) else {
                debug!(
                    source_name = %source.name,
                    version = %version,
                    "source has no url for this version, skipping"
                );
                continue;
            };

            match self.query(source, url, version).await {
                Ok(address) => {
                    debug!(source_name = %source.name, url = %url, "valid address from source");
                    return Ok(ResolvedAddress::new(address, url));
                }
                Err(e) => {
                    warn!(source_name = %source.name, url = %url, error = %e, "source failed, skipping");
                }
            }
        }

        Err(Error::fetch(match &self.force_source {
            Some(forced) => format!(
                "forced source '{}' did not return a valid IP{} address",
                forced, version
            ),
            None => format!(
                "none of the configured sources returned a valid IP{} address",
                version
            ),
        }))
    }
}

/// Pull `field` out of a JSON object body
pub fn extract_field(body: &[u8], field: &str) -> std::result::Result<String, SourceError> {
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(body)?;

    match object.get(field) {
        Some(serde_json::Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(SourceError::FieldType(field.to_string())),
        None => Err(SourceError::MissingField(field.to_string())),
    }
}

/// Parse `value` as an address of `version`; surrounding whitespace is ignored
pub fn parse_address(value: &str, version: IpVersion) -> std::result::Result<IpAddr, SourceError> {
    let invalid = || SourceError::InvalidAddress {
        version,
        value: value.to_string(),
    };

    let address: IpAddr = value.trim().parse().map_err(|_| invalid())?;
    if !version.matches(&address) {
        return Err(invalid());
    }

    Ok(address)
}
