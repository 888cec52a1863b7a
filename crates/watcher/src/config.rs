//! Watcher configuration
//!
//! Loaded from TOML; every key is optional and falls back to its default.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Which backend to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Coalescing on macOS, generic elsewhere
    #[default]
    Auto,
    /// One native watch per path
    Generic,
    /// One shared native stream for every path
    Coalescing,
}

impl BackendKind {
    /// Resolve `Auto` for the current platform
    pub fn resolve(self) -> BackendKind {
        match self {
            BackendKind::Auto if cfg!(target_os = "macos") => BackendKind::Coalescing,
            BackendKind::Auto => BackendKind::Generic,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Auto => "auto",
            BackendKind::Generic => "generic",
            BackendKind::Coalescing => "coalescing",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(BackendKind::Auto),
            "generic" => Ok(BackendKind::Generic),
            "coalescing" => Ok(BackendKind::Coalescing),
            _ => Err(ConfigError::Invalid(
                "backend must be one of auto, generic, coalescing",
            )),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub backend: BackendKind,

    /// Force the registration-timestamp filter on or off
    ///
    /// Unset means: follow the backend (on for the coalescing backend on
    /// macOS, where the OS replays recent history into new streams).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_pre_watch_events: Option<bool>,

    /// Bounded hand-off capacity to the consumer
    pub delivery_capacity: usize,

    /// Interval at which a blocked hand-off re-checks for shutdown
    pub delivery_poll_ms: u64,

    /// Batching window of the coalescing dispatch thread
    pub coalesce_latency_ms: u64,

    /// How long to wait for the second half of a rename (generic backend)
    pub rename_window_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            filter_pre_watch_events: None,
            delivery_capacity: 1,
            delivery_poll_ms: 50,
            coalesce_latency_ms: 10,
            rename_window_ms: 50,
        }
    }
}

impl WatcherConfig {
    /// Read and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: WatcherConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delivery_capacity == 0 {
            return Err(ConfigError::Invalid("delivery_capacity must be at least 1"));
        }
        if self.delivery_poll_ms == 0 {
            return Err(ConfigError::Invalid("delivery_poll_ms must be at least 1"));
        }
        Ok(())
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn delivery_poll_interval(&self) -> Duration {
        Duration::from_millis(self.delivery_poll_ms)
    }

    pub fn coalesce_latency(&self) -> Duration {
        Duration::from_millis(self.coalesce_latency_ms)
    }

    pub fn rename_window(&self) -> Duration {
        Duration::from_millis(self.rename_window_ms)
    }
}
