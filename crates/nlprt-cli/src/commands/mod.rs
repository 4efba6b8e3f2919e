//! Subcommands and the config resolution they share.

pub mod config;
pub mod models;
pub mod predict;

use std::path::{Path, PathBuf};

use tracing::debug;

use nlprt_core::RuntimeConfig;

#[cfg(feature = "ort")]
pub type Loader = nlprt_core::OrtLoader;

#[cfg(all(feature = "tract", not(feature = "ort")))]
pub type Loader = nlprt_core::TractLoader;

/// `<config_dir>/nlprt/config.json`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nlprt")
        .join("config.json")
}

/// `<data_dir>/nlprt/models`
pub fn default_cache_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nlprt")
        .join("models")
}

/// The config file in effect: the `--config` path, else the default path.
pub fn config_file(explicit: Option<&Path>) -> PathBuf {
    explicit.map(Path::to_path_buf).unwrap_or_else(default_config_path)
}

/// Load the runtime configuration.
///
/// An explicit path must exist. Without one, the default config file is
/// used when present; otherwise defaults apply with the model cache under
/// the user data directory.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    if let Some(path) = explicit {
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        return Ok(RuntimeConfig::from_file(path)?);
    }

    let path = default_config_path();
    if path.exists() {
        debug!("Using config file {}", path.display());
        return Ok(RuntimeConfig::from_file(&path)?);
    }

    let mut config = RuntimeConfig::default();
    config.models.cache_dir = default_cache_dir();
    Ok(config)
}
