//! Error types for the Quill relay

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Caller does not own the target thread.
    ///
    /// Reported to HTTP callers with a not-found shape so that thread
    /// existence is never confirmed to non-owners.
    #[error("access denied")]
    AccessDenied,

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Compute service unreachable, timed out, or returned a failure
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
