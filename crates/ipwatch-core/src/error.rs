//! Error types for the address watcher
//!
//! Every failure produced by a runtime component is an [`Error`]. The
//! [`ErrorKind`] of an error decides how the error pipeline treats it.

use thiserror::Error;

/// Result type alias for watcher operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the address watcher
#[derive(Error, Debug)]
pub enum Error {
    /// No source produced a valid address
    #[error("fetch error: {0}")]
    Fetch(String),

    /// History store read or write failure
    #[error("database error: {0}")]
    Database(String),

    /// Action spawn failure, non-zero exit, stderr output or timeout
    #[error("executor error: {0}")]
    Executor(String),

    /// Mail transport or send failure
    #[error("notifier error: {0}")]
    Notifier(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Classification used by the error pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Address resolution failed for this cycle
    Fetch,
    /// History store failure
    Database,
    /// Action failure
    Executor,
    /// Notification failure; never re-dispatched as `on_error`
    Notifier,
    /// Anything else surfaced at runtime
    Internal,
}

impl ErrorKind {
    /// Whether errors of this kind trigger the `on_error` handler
    ///
    /// Notifier errors are excluded so that a failing mail transport cannot
    /// feed `on_error` notifications back into itself.
    pub fn triggers_on_error(self) -> bool {
        !matches!(self, ErrorKind::Notifier)
    }

    /// Short label used in structured logs
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Fetch => "fetch",
            ErrorKind::Database => "database",
            ErrorKind::Executor => "executor",
            ErrorKind::Notifier => "notifier",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Create a fetch error
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create an executor error
    pub fn executor(msg: impl Into<String>) -> Self {
        Self::Executor(msg.into())
    }

    /// Create a notifier error
    pub fn notifier(msg: impl Into<String>) -> Self {
        Self::Notifier(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Re-tag this error as `kind`, keeping its message
    ///
    /// Errors that already carry `kind` are returned unchanged.
    pub fn reclassify(self, kind: ErrorKind) -> Self {
        if self.kind() == kind {
            return self;
        }
        let message = self.to_string();
        match kind {
            ErrorKind::Fetch => Error::Fetch(message),
            ErrorKind::Database => Error::Database(message),
            ErrorKind::Executor => Error::Executor(message),
            ErrorKind::Notifier => Error::Notifier(message),
            ErrorKind::Internal => Error::Other(message),
        }
    }

    /// The pipeline classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Fetch(_) | Error::Http(_) => ErrorKind::Fetch,
            Error::Database(_) => ErrorKind::Database,
            Error::Executor(_) => ErrorKind::Executor,
            Error::Notifier(_) => ErrorKind::Notifier,
            Error::Config(_) | Error::Io(_) | Error::Json(_) | Error::Other(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
