pub mod config;
pub mod watch;

use anyhow::{Context, Result};
use pathwatcher::WatcherConfig;
use std::path::Path;

/// Load `path` if given, otherwise the defaults
pub fn load_config(path: Option<&Path>) -> Result<WatcherConfig> {
    match path {
        Some(path) => WatcherConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => Ok(WatcherConfig::default()),
    }
}
