pub mod config;
pub mod render;
pub mod run;

use anyhow::Context;
use std::path::Path;
use winupdate_core::Config;

/// Load the config file, falling back to defaults when it does not exist.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }
    Config::load(path).with_context(|| format!("failed to load config {}", path.display()))
}
