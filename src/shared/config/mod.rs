//! Sync configuration
//!
//! `SyncConfig` collects everything a sync context needs: where the API lives,
//! where the queue database lives, how long a single request may take and how
//! the backoff loop grows. It can be built in code, read from environment
//! variables or loaded from a TOML file.
//!
//! ## Environment
//!
//! | Variable | Default |
//! |---|---|
//! | `SYNC_API_URL` | `http://localhost:8000/v1` |
//! | `SYNC_DB_PATH` | `<data dir>/campo-sync/queue.db` |
//! | `SYNC_TIMEOUT_SECS` | `15` |
//! | `SYNC_BACKOFF_BASE_SECS` | `30` |
//! | `SYNC_BACKOFF_MAX_SECS` | `300` |
//! | `SYNC_MAX_ATTEMPTS` | unset (retry forever) |
//! | `SYNC_PAUSE_WHEN_OFFLINE` | `true` |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

use crate::offline::retry::BackoffPolicy;

/// API base used when nothing else is configured
pub const DEFAULT_API_URL: &str = "http://localhost:8000/v1";

/// Upper bound for a single delivery attempt
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// User agent sent with every delivery
pub const DEFAULT_USER_AGENT: &str = concat!("campo-sync/", env!("CARGO_PKG_VERSION"));

/// Sync configuration shared by the foreground and background contexts
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL relative targets are resolved against
    pub api_base_url: Url,
    /// SQLite file holding the queue
    pub database_path: PathBuf,
    /// Upper bound for one HTTP attempt
    pub request_timeout: Duration,
    /// Backoff base and ceiling for the reconciliation loop
    pub backoff: BackoffPolicy,
    /// Move an event to the dead-letter table after this many failures.
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Extra headers sent with every delivery, below the event's own headers
    pub default_headers: BTreeMap<String, String>,
    /// User agent for the HTTP client
    pub user_agent: String,
    /// Skip scheduled passes while the network monitor reports offline
    pub pause_when_offline: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: Url::parse(DEFAULT_API_URL).unwrap_or_else(|_| unreachable!()),
            database_path: default_database_path(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            backoff: BackoffPolicy::default(),
            max_attempts: None,
            default_headers: BTreeMap::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            pause_when_offline: true,
        }
    }
}

/// Platform-specific location of the queue database.
///
/// Falls back to the temp dir when the platform has no data directory.
pub fn default_database_path() -> PathBuf {
    let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
    path.push("campo-sync");
    path.push("queue.db");
    path
}

impl SyncConfig {
    /// Create a new SyncConfigBuilder
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.api_base_url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ConfigError::InvalidUrl(format!(
                    "unsupported scheme '{}' in {}",
                    other, self.api_base_url
                )))
            }
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid("request_timeout", "must be greater than zero"));
        }
        if self.backoff.base.is_zero() {
            return Err(ConfigError::invalid("backoff_base", "must be greater than zero"));
        }
        if self.backoff.ceiling < self.backoff.base {
            return Err(ConfigError::invalid(
                "backoff_ceiling",
                "must not be smaller than the backoff base",
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1 when set"));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingValue("database_path"));
        }

        Ok(())
    }

    /// Build a configuration from `SYNC_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::builder();

        if let Some(url) = env_var("SYNC_API_URL") {
            builder = builder.api_base_url(url);
        }
        if let Some(path) = env_var("SYNC_DB_PATH") {
            builder = builder.database_path(path);
        }
        if let Some(secs) = env_parse::<u64>("SYNC_TIMEOUT_SECS")? {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = env_parse::<u64>("SYNC_BACKOFF_BASE_SECS")? {
            builder = builder.backoff_base(Duration::from_secs(secs));
        }
        if let Some(secs) = env_parse::<u64>("SYNC_BACKOFF_MAX_SECS")? {
            builder = builder.backoff_ceiling(Duration::from_secs(secs));
        }
        if let Some(max) = env_parse::<u32>("SYNC_MAX_ATTEMPTS")? {
            builder = builder.max_attempts(max);
        }
        if let Some(pause) = env_parse::<bool>("SYNC_PAUSE_WHEN_OFFLINE")? {
            builder = builder.pause_when_offline(pause);
        }

        builder.build()
    }

    /// Load a configuration from a TOML file.
    ///
    /// ```toml
    /// api_base_url = "https://api.example.org/v1"
    /// database_path = "/var/lib/campo-sync/queue.db"
    /// request_timeout_secs = 10
    /// backoff_base_secs = 30
    /// backoff_max_secs = 300
    ///
    /// [default_headers]
    /// X-Offline-Sync = "1"
    /// ```
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(contents)?;
        file.into_builder().build()
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::invalid(key, format!("'{}': {}", raw, e)))
        })
        .transpose()
}

/// On-disk shape of the TOML configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    api_base_url: Option<String>,
    database_path: Option<PathBuf>,
    request_timeout_secs: Option<u64>,
    backoff_base_secs: Option<u64>,
    backoff_max_secs: Option<u64>,
    max_attempts: Option<u32>,
    user_agent: Option<String>,
    pause_when_offline: Option<bool>,
    #[serde(default)]
    default_headers: BTreeMap<String, String>,
}

impl ConfigFile {
    fn into_builder(self) -> SyncConfigBuilder {
        let mut builder = SyncConfig::builder().default_headers(self.default_headers);

        if let Some(url) = self.api_base_url {
            builder = builder.api_base_url(url);
        }
        if let Some(path) = self.database_path {
            builder = builder.database_path(path);
        }
        if let Some(secs) = self.request_timeout_secs {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.backoff_base_secs {
            builder = builder.backoff_base(Duration::from_secs(secs));
        }
        if let Some(secs) = self.backoff_max_secs {
            builder = builder.backoff_ceiling(Duration::from_secs(secs));
        }
        if let Some(max) = self.max_attempts {
            builder = builder.max_attempts(max);
        }
        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }
        if let Some(pause) = self.pause_when_offline {
            builder = builder.pause_when_offline(pause);
        }
        builder
    }
}

/// Builder for SyncConfig
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    api_base_url: Option<String>,
    database_path: Option<PathBuf>,
    request_timeout: Option<Duration>,
    backoff_base: Option<Duration>,
    backoff_ceiling: Option<Duration>,
    max_attempts: Option<u32>,
    default_headers: BTreeMap<String, String>,
    user_agent: Option<String>,
    pause_when_offline: Option<bool>,
}

impl SyncConfigBuilder {
    /// Set the API base URL
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    /// Set the queue database path
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Set the per-request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the backoff base interval
    pub fn backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = Some(base);
        self
    }

    /// Set the backoff ceiling
    pub fn backoff_ceiling(mut self, ceiling: Duration) -> Self {
        self.backoff_ceiling = Some(ceiling);
        self
    }

    /// Set both backoff bounds at once
    pub fn backoff(self, base: Duration, ceiling: Duration) -> Self {
        self.backoff_base(base).backoff_ceiling(ceiling)
    }

    /// Enable dead-lettering after `max` failed attempts
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    /// Add one default header
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    /// Replace the default header set
    pub fn default_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.default_headers = headers;
        self
    }

    /// Set the user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Choose whether scheduled passes pause while offline
    pub fn pause_when_offline(mut self, pause: bool) -> Self {
        self.pause_when_offline = Some(pause);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<SyncConfig, ConfigError> {
        let defaults = SyncConfig::default();

        let api_base_url = match self.api_base_url {
            Some(raw) => Url::parse(raw.trim())
                .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", raw, e)))?,
            None => defaults.api_base_url,
        };

        let config = SyncConfig {
            api_base_url,
            database_path: self.database_path.unwrap_or(defaults.database_path),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            backoff: BackoffPolicy {
                base: self.backoff_base.unwrap_or(defaults.backoff.base),
                ceiling: self.backoff_ceiling.unwrap_or(defaults.backoff.ceiling),
            },
            max_attempts: self.max_attempts,
            default_headers: self.default_headers,
            user_agent: self.user_agent.unwrap_or(defaults.user_agent),
            pause_when_offline: self.pause_when_offline.unwrap_or(defaults.pause_when_offline),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            message: message.into(),
        }
    }
}
