use crate::core::db::{ConnectOptions, SqlDatabase};
use crate::core::{EasySqlError, ErrorMode, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub error: ErrorConfig,
    /// Named connections; the one called "default" becomes the process-wide default.
    #[serde(default)]
    pub databases: BTreeMap<String, ConnectOptions>,
}

/// Error-reporting configuration.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorConfig {
    #[serde(default)]
    pub mode: ErrorMode,
}

impl Config {
    /// Registers every configured database under its name.
    ///
    /// Returns the registered names in order.
    pub fn register(&self) -> Vec<String> {
        self.databases
            .iter()
            .map(|(name, options)| {
                SqlDatabase::add_database(name, options.clone());
                debug!("Registered connection '{}' -> {}", name, options.path);
                name.clone()
            })
            .collect()
    }

    pub fn error_mode(&self) -> ErrorMode {
        self.error.mode
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Example
///
/// ```ignore
/// let config = load_config("config.toml")?;
/// config.register();
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    for (name, options) in &config.databases {
        if options.path.trim().is_empty() {
            return Err(EasySqlError::Config(format!(
                "database '{}' has an empty path",
                name
            )));
        }
    }
    Ok(config)
}

/// `<config dir>/easysql/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("easysql").join("config.toml"))
}
