use std::path::{Path, PathBuf};

use toml::Table;
use tracing::debug;

use super::types::ConductorConfig;
use crate::error::ConfigError;

/// Environment variable overriding the project config directory
pub const PROJECT_CONFIG_DIR_ENV: &str = "CONDUCTOR_PROJECT_CONFIG_DIR";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<ConductorConfig, ConfigError> {
        let mut raw = Table::new();

        // Layer 1: User config
        let user_path = Self::user_config_path();
        if user_path.exists() {
            raw = Self::merge_raw(raw, Self::read_raw(&user_path)?);
        }

        // Layer 2: Project config
        let project_path = Self::project_config_path();
        if project_path.exists() {
            raw = Self::merge_raw(raw, Self::read_raw(&project_path)?);
        }

        Self::finalize(raw)
    }

    /// Parse a single TOML document
    pub fn from_str(contents: &str) -> Result<ConductorConfig, ConfigError> {
        Self::finalize(contents.parse::<Table>()?)
    }

    /// Get user config path
    pub fn user_config_path() -> PathBuf {
        conductor_paths::config_dir().join("config.toml")
    }

    /// Get project config path
    /// Can be overridden with CONDUCTOR_PROJECT_CONFIG_DIR env var (useful for isolated tests)
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var(PROJECT_CONFIG_DIR_ENV) {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".conductor/config.toml")
        }
    }

    fn read_raw(path: &Path) -> Result<Table, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded config layer");
        Ok(contents.parse::<Table>()?)
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    ///
    /// Tables merge key by key; any other value in the overlay replaces the base.
    fn merge_raw(mut base: Table, overlay: Table) -> Table {
        for (key, value) in overlay {
            let merged = match (base.remove(&key), value) {
                (Some(toml::Value::Table(b)), toml::Value::Table(o)) => {
                    toml::Value::Table(Self::merge_raw(b, o))
                }
                (_, value) => value,
            };
            base.insert(key, merged);
        }
        base
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: Table) -> Result<ConductorConfig, ConfigError> {
        Ok(toml::Value::Table(raw).try_into()?)
    }
}
