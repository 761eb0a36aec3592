use std::path::{Path, PathBuf};
use config::{Config as ConfigLoader, ConfigBuilder, FileFormat, builder::DefaultState};
use tracing::{info, warn};

use super::schema::Config;
use crate::error::{ReconError, ReconResult};

const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Environment variables with this prefix override file settings,
/// e.g. `RECONSRC_SOURCES__UMBRELLA__API_KEY`
pub const ENV_PREFIX: &str = "RECONSRC";

/// Stack the configuration layers: built-in defaults, then the user file,
/// then the environment
fn layers(config_path: Option<&Path>) -> ConfigBuilder<DefaultState> {
    let mut config_builder = ConfigLoader::builder()
        .add_source(config::File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

    match config_path {
        Some(path) if path.exists() => {
            info!("Loading user configuration from: {}", path.display());
            config_builder = config_builder.add_source(config::File::from(path));
        }
        Some(path) => {
            warn!("Specified configuration file not found: {}", path.display());
        }
        None => {
            let default_path = get_default_config_path();
            if default_path.exists() {
                info!("Loading default configuration from: {}", default_path.display());
                config_builder = config_builder.add_source(config::File::from(default_path.as_path()));
            } else {
                info!("No existing configuration found, using built-in defaults");
            }
        }
    }

    config_builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__"),
    )
}

/// Load configuration from a file
pub fn load_config(config_path: Option<&Path>) -> ReconResult<Config> {
    layers(config_path)
        .build()
        .map_err(|e| ReconError::Configuration(format!("Failed to build configuration: {}", e)))?
        .try_deserialize()
        .map_err(|e| ReconError::Configuration(format!("Failed to parse configuration: {}", e)))
}

/// Get the default configuration path
pub fn get_default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".reconsrc/config.toml")
}
