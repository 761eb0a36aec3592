// src/config/mod.rs
mod loader;
mod schema;

use std::path::{Path, PathBuf};
use tracing::info;

pub use loader::ENV_PREFIX;
pub use schema::{Config, GlobalConfig, ScopeConfig, SourceConfig};

use crate::core::collab::{CredentialStore, Credentials};
use crate::error::{ReconError, ReconResult};

/// Centralized configuration handling
impl Config {
    /// Load configuration, layering defaults, the user file and the environment
    pub fn load(config_path: Option<&Path>) -> ReconResult<Self> {
        info!("Loading configuration");
        loader::load_config(config_path)
    }

    /// Get the default configuration path
    pub fn get_default_config_path() -> PathBuf {
        loader::get_default_config_path()
    }

    /// Initialize a new configuration at the default location
    pub fn init(force: bool) -> ReconResult<PathBuf> {
        let config_path = Self::get_default_config_path();
        Self::init_at(&config_path, force)?;
        Ok(config_path)
    }

    /// Write a default configuration to `config_path`
    pub fn init_at(config_path: &Path, force: bool) -> ReconResult<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ReconError::File {
                    path: parent.to_path_buf(),
                    message: format!("Failed to create directory: {}", e),
                })?;
        }

        if config_path.exists() && !force {
            return Err(ReconError::Configuration(
                format!("Configuration already exists at {}. Use --force to overwrite.", config_path.display())
            ));
        }

        Config::default().save(config_path)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ReconResult<()> {
        let config_str = toml::to_string_pretty(self)
            .map_err(|e| ReconError::Serialization(format!("Failed to serialize configuration: {}", e)))?;

        std::fs::write(path, config_str)
            .map_err(|e| ReconError::File {
                path: path.to_path_buf(),
                message: format!("Failed to write configuration: {}", e),
            })?;

        info!("Configuration saved to {}", path.display());

        Ok(())
    }

    /// Get a source configuration by name (case-insensitive)
    pub fn get_source_config(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.get(&name.to_lowercase())
    }

    pub fn is_source_enabled(&self, name: &str) -> bool {
        self.get_source_config(name).map_or(true, |source| source.enabled)
    }
}

impl CredentialStore for Config {
    fn credentials(&self, source: &str) -> Option<Credentials> {
        let source = self.get_source_config(source)?;
        let key = source.api_key.as_deref().map(str::trim).filter(|key| !key.is_empty())?;

        Some(Credentials {
            key: key.to_string(),
            secret: source.secret.clone().filter(|secret| !secret.is_empty()),
        })
    }
}
