//! Configuration management for the relay
//!
//! Settings come from an optional TOML file with environment-variable
//! overrides (`QUILL_*`). Defaults match the reference deployment of the
//! research service this relay fronts.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Relay configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP API server settings
    pub server: ServerConfig,

    /// Database location
    pub database: DatabaseConfig,

    /// Upstream compute service settings
    pub upstream: UpstreamConfig,

    /// Context assembly settings
    pub context: ContextSection,

    /// Long-term memory retention settings
    pub memory: MemorySection,

    /// Scratch cache settings
    pub cache: CacheSection,
}

/// HTTP API server settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18990,
        }
    }
}

/// Database location settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Explicit database path; defaults to the platform data directory
    pub path: Option<PathBuf>,
}

/// Upstream compute service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the research service
    pub endpoint: String,
    /// Coarse ceiling for one research call, both paths. Research tasks
    /// are slow, so the ceiling is long, but it must stay finite.
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".to_string(),
            timeout_secs: 300,
        }
    }
}

/// Context assembly settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    /// Maximum messages in the history window per turn
    pub max_messages: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self { max_messages: 20 }
    }
}

/// Long-term memory retention settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// Conversation-kind records older than this are swept
    pub retention_days: u32,
    /// Interval between sweep runs
    pub sweep_interval_secs: u64,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            retention_days: 30,
            sweep_interval_secs: 6 * 60 * 60,
        }
    }
}

/// Scratch cache settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub max_entries: u64,
    /// Ceiling on any entry's lifetime, regardless of requested TTL
    pub max_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: 4096,
            max_ttl_secs: 86_400,
        }
    }
}

impl Config {
    /// Load configuration: explicit file if given, otherwise the default
    /// location if present, otherwise defaults. Environment overrides
    /// apply last.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(explicit) => Self::from_file(explicit)?,
            None => match Self::default_config_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => Self::default(),
            },
        };

        config.apply_env();
        Ok(config)
    }

    /// Parse configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Resolve the database path, creating the data directory if needed
    ///
    /// # Errors
    ///
    /// Returns error if no data directory can be determined or created
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.database.path {
            return Ok(path.clone());
        }

        let dirs = directories::ProjectDirs::from("dev", "quilldesk", "quill")
            .ok_or_else(|| Error::Config("cannot determine data directory".to_string()))?;
        std::fs::create_dir_all(dirs.data_dir())?;
        Ok(dirs.data_dir().join("quill.db"))
    }

    /// Default config file location
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "quilldesk", "quill")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Apply `QUILL_*` environment overrides
    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("QUILL_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse("QUILL_PORT") {
            self.server.port = port;
        }
        if let Ok(path) = std::env::var("QUILL_DB") {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Ok(endpoint) = std::env::var("QUILL_UPSTREAM_URL") {
            self.upstream.endpoint = endpoint;
        }
        if let Some(secs) = env_parse("QUILL_UPSTREAM_TIMEOUT_SECS") {
            self.upstream.timeout_secs = secs;
        }
        if let Some(days) = env_parse("QUILL_RETENTION_DAYS") {
            self.memory.retention_days = days;
        }
        if let Some(max) = env_parse("QUILL_CONTEXT_MESSAGES") {
            self.context.max_messages = max;
        }
    }
}

/// Parse an environment variable, ignoring unset or malformed values
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
