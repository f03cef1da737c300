use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf};

use crate::errors::ConfigError;

use super::{
    container_config::{ContainerConfig, PartialContainerConfig},
    intercept_config::{InterceptConfig, PartialInterceptConfig},
    loader::ConfigLoader,
    logging_config::{LogSettings, PartialLogSettings},
};

// Configuration location constants
pub const USER_CONFIG_DIR: &str = "aspectcore";
pub const CONFIG_FILE_NAME: &str = "aspectcore.toml";

/// Environment variables consulted on top of the config file
pub const ENV_KEYS: [&str; 8] = [
    "ASPECTCORE_LOG_ENV",
    "ASPECTCORE_LOG_LEVEL",
    "ASPECTCORE_LOG_FORMAT",
    "ASPECTCORE_EXEMPT_OPERATIONS",
    "ASPECTCORE_ADVICE_CACHE",
    "ASPECTCORE_APPLICATION_NAME",
    "ASPECTCORE_EAGER_SINGLETONS",
    "ASPECTCORE_PRESERVE_ON_RESET",
];

/// Runtime settings
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuntimeConfig {
    pub logging: LogSettings,
    pub intercept: InterceptConfig,
    pub container: ContainerConfig,
}

/// Partial runtime settings for loading from files
#[derive(Deserialize, Debug, Default)]
pub struct PartialRuntimeConfig {
    logging: Option<PartialLogSettings>,
    intercept: Option<PartialInterceptConfig>,
    container: Option<PartialContainerConfig>,
}

impl RuntimeConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load_config()
    }

    /// Load configuration with custom base path (for testing)
    pub fn load_with_base_path(base_path: PathBuf) -> Result<Self, ConfigError> {
        ConfigLoader::with_base_path(base_path).load_config()
    }

    /// Create RuntimeConfig from partial config and environment
    pub fn from_partial_and_env(
        partial: Option<PartialRuntimeConfig>,
        env_map: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let partial = partial.unwrap_or_default();

        Ok(RuntimeConfig {
            logging: LogSettings::from_env_or_file(partial.logging, &env_map)?,
            intercept: InterceptConfig::from_env_or_file(partial.intercept, &env_map)?,
            container: ContainerConfig::from_env_or_file(partial.container, &env_map)?,
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.logging.validate()?;
        self.container.validate()
    }

    /// Render the effective settings as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Other(format!("Failed to render config: {}", e)))
    }
}

pub(crate) fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Comma separated list; blank items are dropped
pub(crate) fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
