use std::{collections::HashMap, env, fs, path::PathBuf};

use crate::errors::ConfigError;

use super::app_config::{
    PartialRuntimeConfig, RuntimeConfig, CONFIG_FILE_NAME, ENV_KEYS, USER_CONFIG_DIR,
};

/// Configuration loader responsible for loading config from files and environment
pub struct ConfigLoader {
    base_path: Option<PathBuf>,
    config_file: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default paths
    pub fn new() -> Self {
        Self {
            base_path: None,
            config_file: None,
        }
    }

    /// Create a config loader with custom base path (for testing)
    pub fn with_base_path(base_path: PathBuf) -> Self {
        Self {
            base_path: Some(base_path),
            config_file: None,
        }
    }

    /// Load from an explicit file; `~` is expanded and the file must exist
    pub fn with_config_file(path: &str) -> Self {
        let expanded = shellexpand::tilde(path);
        Self {
            base_path: None,
            config_file: Some(PathBuf::from(expanded.as_ref())),
        }
    }

    /// Resolved location of the settings file
    pub fn config_path(&self) -> PathBuf {
        if let Some(file) = &self.config_file {
            return file.clone();
        }
        let base = match &self.base_path {
            Some(base_path) => base_path.clone(),
            None => dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from(shellexpand::tilde("~/.config").as_ref()))
                .join(USER_CONFIG_DIR),
        };
        base.join(CONFIG_FILE_NAME)
    }

    /// Load complete runtime configuration
    pub fn load_config(&self) -> Result<RuntimeConfig, ConfigError> {
        let config_path = self.config_path();
        let partial_config = self.load_partial_config(&config_path)?;
        let env_map = self.collect_env_vars();
        RuntimeConfig::from_partial_and_env(partial_config, env_map)
    }

    /// Load partial configuration from TOML file
    fn load_partial_config(&self, config_path: &PathBuf) -> Result<Option<PartialRuntimeConfig>, ConfigError> {
        if !config_path.exists() && self.config_file.is_none() {
            tracing::debug!("No settings file at {:?}, using defaults", config_path);
            return Ok(None);
        }

        let content = fs::read_to_string(config_path).map_err(|e| {
            ConfigError::FileRead(config_path.to_string_lossy().to_string(), e)
        })?;

        let partial_config: PartialRuntimeConfig = toml::from_str(&content).map_err(|e| {
            ConfigError::TomlParse(config_path.to_string_lossy().to_string(), e)
        })?;

        tracing::debug!("Loaded settings from {:?}", config_path);
        Ok(Some(partial_config))
    }

    /// Collect relevant environment variables
    fn collect_env_vars(&self) -> HashMap<String, String> {
        let mut env_map = HashMap::new();
        for key in &ENV_KEYS {
            if let Ok(value) = env::var(key) {
                env_map.insert(key.to_string(), value);
            }
        }
        env_map
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_loader() -> (ConfigLoader, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_base_path(temp_dir.path().to_path_buf());
        (loader, temp_dir)
    }

    #[test]
    fn test_config_path_uses_base() {
        let (loader, temp_dir) = create_test_loader();
        assert_eq!(loader.config_path(), temp_dir.path().join("aspectcore.toml"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let (loader, _temp_dir) = create_test_loader();
        let partial = loader.load_partial_config(&loader.config_path()).unwrap();
        assert!(partial.is_none());
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nowhere.toml");
        let loader = ConfigLoader::with_config_file(&path.to_string_lossy());
        assert!(matches!(
            loader.load_partial_config(&loader.config_path()),
            Err(ConfigError::FileRead(..))
        ));
    }

    #[test]
    fn test_malformed_file() {
        let (loader, _temp_dir) = create_test_loader();
        fs::write(loader.config_path(), "[intercept\nadvice_cache = ").unwrap();
        assert!(matches!(
            loader.load_partial_config(&loader.config_path()),
            Err(ConfigError::TomlParse(..))
        ));
    }
}
