//! Configuration types for the address watcher
//!
//! This module defines all configuration structures consumed by the core.
//! Loading them from disk is left to the caller; every component receives
//! the part it needs in its constructor.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Default action execution time when none (or zero) is configured
pub const DEFAULT_MAX_EXECUTION_TIME_SECS: u64 = 60;

/// Main watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Address sources, in fallback order
    pub sources: Vec<SourceConfig>,

    /// Poll loop and reaction settings
    pub watcher: WatcherSettings,

    /// Runtime switches
    #[serde(default)]
    pub flags: RuntimeFlags,
}

impl WatcherConfig {
    /// Create a configuration with the given sources and polling interval
    pub fn new(sources: Vec<SourceConfig>, interval_secs: u64) -> Self {
        Self {
            sources,
            watcher: WatcherSettings {
                interval_secs,
                ..WatcherSettings::default()
            },
            flags: RuntimeFlags::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.sources.is_empty() {
            return Err(crate::Error::config("No sources configured"));
        }

        for source in &self.sources {
            source.validate()?;
        }

        self.watcher.validate()?;

        if let Some(forced) = &self.watcher.force_source
            && !self.sources.iter().any(|s| &s.name == forced)
        {
            return Err(crate::Error::config(format!(
                "force_source '{}' does not name a configured source",
                forced
            )));
        }

        if self.flags.notify && self.watcher.smtp.is_none() {
            return Err(crate::Error::config(
                "Notifications are enabled but no smtp settings are configured",
            ));
        }

        Ok(())
    }
}

/// IP protocol version tracked by the watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    /// IPv4
    #[default]
    V4,
    /// IPv6
    V6,
}

impl IpVersion {
    /// Wire name of the version ("v4" or "v6")
    pub fn as_str(self) -> &'static str {
        match self {
            IpVersion::V4 => "v4",
            IpVersion::V6 => "v6",
        }
    }

    /// Whether `ip` belongs to this version
    pub fn matches(self, ip: &IpAddr) -> bool {
        match self {
            IpVersion::V4 => ip.is_ipv4(),
            IpVersion::V6 => ip.is_ipv6(),
        }
    }
}

impl std::fmt::Display for IpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IpVersion {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "v4" => Ok(IpVersion::V4),
            "v6" => Ok(IpVersion::V6),
            other => Err(crate::Error::config(format!(
                "version must be either 'v4' or 'v6', not '{}'",
                other
            ))),
        }
    }
}

/// How a source's response body is parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// `text/plain` body holding the bare address
    Text,
    /// `application/json` object holding the address in a field
    Json,
}

impl ResponseType {
    /// Content-Type fragment a response must carry for this type
    pub fn content_type(self) -> &'static str {
        match self {
            ResponseType::Text => "text/plain",
            ResponseType::Json => "application/json",
        }
    }
}

/// Per-version URLs of a source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceUrl {
    /// URL answering with an IPv4 address
    #[serde(default)]
    pub v4: Option<String>,
    /// URL answering with an IPv6 address
    #[serde(default)]
    pub v6: Option<String>,
}

/// A configured origin for the current address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source name, used by `force_source` and in logs
    pub name: String,

    /// Version specific URLs
    pub url: SourceUrl,

    /// Expected response format
    #[serde(rename = "type", alias = "response_type", deserialize_with = "de_response_type")]
    pub response_type: ResponseType,

    /// JSON field holding the address (json sources only)
    #[serde(default)]
    pub field: Option<String>,
}

impl SourceConfig {
    /// Create a plain-text source
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: SourceUrl::default(),
            response_type: ResponseType::Text,
            field: None,
        }
    }

    /// Create a JSON source reading `field`
    pub fn json(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: SourceUrl::default(),
            response_type: ResponseType::Json,
            field: Some(field.into()),
        }
    }

    /// Set the IPv4 URL
    pub fn with_v4(mut self, url: impl Into<String>) -> Self {
        self.url.v4 = Some(url.into());
        self
    }

    /// Set the IPv6 URL
    pub fn with_v6(mut self, url: impl Into<String>) -> Self {
        self.url.v6 = Some(url.into());
        self
    }

    /// URL for `version`, if this source serves it
    pub fn url_for(&self, version: IpVersion) -> Option<&str> {
        match version {
            IpVersion::V4 => self.url.v4.as_deref(),
            IpVersion::V6 => self.url.v6.as_deref(),
        }
    }

    /// Validate the source
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::config("Source name cannot be empty"));
        }

        if self.url.v4.is_none() && self.url.v6.is_none() {
            return Err(crate::Error::config(format!(
                "source '{}': the 'url' field must have 'v4' or 'v6' or both specified",
                self.name
            )));
        }

        match (self.response_type, &self.field) {
            (ResponseType::Json, None) => Err(crate::Error::config(format!(
                "source '{}': 'field' must be specified when the type is 'json'",
                self.name
            ))),
            (ResponseType::Text, Some(_)) => Err(crate::Error::config(format!(
                "source '{}': 'field' is only valid when the type is 'json'",
                self.name
            ))),
            _ => Ok(()),
        }
    }
}

fn de_response_type<'de, D>(deserializer: D) -> Result<ResponseType, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_lowercase().as_str() {
        "text" => Ok(ResponseType::Text),
        "json" => Ok(ResponseType::Json),
        other => Err(serde::de::Error::custom(format!(
            "the response type can only be 'text' or 'json', got '{}'",
            other
        ))),
    }
}

/// Watcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherSettings {
    /// Seconds between two polls
    #[serde(alias = "timeout")]
    pub interval_secs: u64,

    /// Default action execution time in seconds (0 means 60)
    #[serde(default, alias = "max_execution_time")]
    pub max_execution_time_secs: u64,

    /// Restrict resolution to the named source
    #[serde(default)]
    pub force_source: Option<String>,

    /// Event handlers
    #[serde(default)]
    pub events: EventsConfig,

    /// Outbound mail settings
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,

    /// Capacity of the monitoring event channel
    ///
    /// When full, new events are dropped with a warning log.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_execution_time_secs: 0,
            force_source: None,
            events: EventsConfig::default(),
            smtp: None,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_event_channel_capacity() -> usize {
    1000
}

impl WatcherSettings {
    /// Effective default execution time for actions
    pub fn max_execution_time(&self) -> std::time::Duration {
        let secs = match self.max_execution_time_secs {
            0 => DEFAULT_MAX_EXECUTION_TIME_SECS,
            secs => secs,
        };
        std::time::Duration::from_secs(secs)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.interval_secs == 0 {
            return Err(crate::Error::config("Polling interval must be > 0"));
        }

        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }

        self.events.validate()?;

        if let Some(smtp) = &self.smtp {
            smtp.validate()?;
        }

        Ok(())
    }
}

/// Handlers per event type; an absent handler makes the event a no-op
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventsConfig {
    /// Address differs from the last recorded one
    #[serde(default)]
    pub on_change: Option<EventHandlerConfig>,
    /// Address equals the last recorded one
    #[serde(default)]
    pub on_match: Option<EventHandlerConfig>,
    /// A non-notifier failure occurred
    #[serde(default)]
    pub on_error: Option<EventHandlerConfig>,
}

impl EventsConfig {
    /// Validate every configured handler
    pub fn validate(&self) -> Result<(), crate::Error> {
        [&self.on_change, &self.on_match, &self.on_error]
            .into_iter()
            .flatten()
            .try_for_each(EventHandlerConfig::validate)
    }
}

/// Reaction to one event type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventHandlerConfig {
    /// Send a mail to every recipient
    #[serde(default)]
    pub notify: bool,

    /// Commands to run, in launch order
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

impl EventHandlerConfig {
    /// Validate every action of the handler
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.actions.iter().try_for_each(ActionConfig::validate)
    }
}

/// External command run in reaction to an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Interpreter or binary to spawn (e.g. "bash", "python3")
    #[serde(rename = "type")]
    pub interpreter: String,

    /// Script path, passed as the first argument
    #[serde(alias = "bin")]
    pub path: String,

    /// Space separated arguments appended after the path
    #[serde(default)]
    pub args: String,

    /// Seconds before the process is killed: < 0 unbounded, 0 default, > 0 override
    #[serde(default)]
    pub ttl: i64,
}

impl ActionConfig {
    /// Create an action with the default deadline
    pub fn new(interpreter: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            path: path.into(),
            args: String::new(),
            ttl: 0,
        }
    }

    /// Set the argument string
    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        self.args = args.into();
        self
    }

    /// Set the ttl in seconds
    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = ttl;
        self
    }

    /// Argument vector handed to the interpreter: the path, then each word of `args`
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.path.clone())
            .chain(
                self.args
                    .split(' ')
                    .filter(|arg| !arg.is_empty())
                    .map(str::to_string),
            )
            .collect()
    }

    /// Deadline for this action given the runner default; `None` means unbounded
    pub fn effective_timeout(
        &self,
        default: std::time::Duration,
    ) -> Option<std::time::Duration> {
        match self.ttl {
            ttl if ttl < 0 => None,
            0 => Some(default),
            ttl => Some(std::time::Duration::from_secs(ttl as u64)),
        }
    }

    /// Validate the action
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.interpreter.trim().is_empty() {
            return Err(crate::Error::config("Action type cannot be empty"));
        }
        if self.path.trim().is_empty() {
            return Err(crate::Error::config(format!(
                "Action '{}' has an empty path",
                self.interpreter
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for ActionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered = format!("{} {} {}", self.interpreter, self.path, self.args);
        f.write_str(rendered.trim())
    }
}

/// Outbound mail settings
#[derive(Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// SMTP relay host
    #[serde(alias = "smtp_server")]
    pub server: String,

    /// SMTP port
    #[serde(alias = "smtp_port", default = "default_smtp_port")]
    pub port: u16,

    /// Login user
    pub username: String,

    /// Login password
    /// ⚠️ NEVER log this value
    pub password: String,

    /// Sender address
    pub from_address: String,

    /// Recipients of every notification
    #[serde(default)]
    pub recipients: Vec<Recipient>,
}

// Custom Debug implementation that hides the password
impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("from_address", &self.from_address)
            .field("recipients", &self.recipients)
            .finish()
    }
}

impl SmtpConfig {
    /// Validate the mail settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.server.is_empty() {
            return Err(crate::Error::config("smtp server cannot be empty"));
        }
        if self.from_address.is_empty() {
            return Err(crate::Error::config("smtp from_address cannot be empty"));
        }
        if self.recipients.iter().any(|r| r.address.is_empty()) {
            return Err(crate::Error::config("smtp recipient address cannot be empty"));
        }
        Ok(())
    }
}

fn default_smtp_port() -> u16 {
    587
}

/// A mail recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Display name, used in the greeting
    pub name: String,
    /// Mail address
    pub address: String,
}

/// Runtime switches, normally set from the command line or environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeFlags {
    /// Version to track
    #[serde(default)]
    pub version: IpVersion,

    /// Enable the action runner
    #[serde(default)]
    pub exec: bool,

    /// Enable the notifier
    #[serde(default)]
    pub notify: bool,

    /// Enable read-only history exposure
    #[serde(default)]
    pub api: bool,
}
