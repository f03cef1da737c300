use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::Level;

use crate::errors::ConfigError;
use crate::logging::{LogFormat, LoggingConfig, LoggingEnvironment};

/// Logging section of the runtime settings
#[derive(Debug, Clone, Serialize)]
pub struct LogSettings {
    /// development / testing / production; picks the preset the other fields start from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// trace / debug / info / warn / error
    pub level: String,
    /// pretty / compact / json
    pub format: String,
    pub show_target: bool,
}

/// Partial logging settings for loading from files
#[derive(Deserialize, Debug, Default)]
pub struct PartialLogSettings {
    pub environment: Option<String>,
    pub level: Option<String>,
    pub format: Option<String>,
    pub show_target: Option<bool>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self::from_preset(None, &LoggingConfig::default())
    }
}

impl LogSettings {
    fn from_preset(environment: Option<String>, preset: &LoggingConfig) -> Self {
        Self {
            environment,
            level: preset.level.as_str().to_ascii_lowercase(),
            format: preset.format.as_str().to_string(),
            show_target: preset.show_target,
        }
    }

    /// Merge file values with `ASPECTCORE_LOG_*` overrides
    ///
    /// Fields left unset fall back to the environment preset when one is named
    pub fn from_env_or_file(
        partial: Option<PartialLogSettings>,
        env_map: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let partial = partial.unwrap_or_default();

        let environment = env_map
            .get("ASPECTCORE_LOG_ENV")
            .cloned()
            .or(partial.environment);
        let preset = match environment.as_deref() {
            Some(name) => LoggingConfig::for_environment(parse_environment(name)?),
            None => LoggingConfig::default(),
        };
        let defaults = Self::from_preset(environment, &preset);

        let settings = Self {
            level: env_map
                .get("ASPECTCORE_LOG_LEVEL")
                .cloned()
                .or(partial.level)
                .unwrap_or(defaults.level),
            format: env_map
                .get("ASPECTCORE_LOG_FORMAT")
                .cloned()
                .or(partial.format)
                .unwrap_or(defaults.format),
            show_target: partial.show_target.unwrap_or(defaults.show_target),
            environment: defaults.environment,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parsed_environment()?;
        self.parsed_level()?;
        self.parsed_format()?;
        Ok(())
    }

    fn parsed_environment(&self) -> Result<Option<LoggingEnvironment>, ConfigError> {
        self.environment.as_deref().map(parse_environment).transpose()
    }

    fn parsed_level(&self) -> Result<Level, ConfigError> {
        self.level
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                value: self.level.clone(),
            })
    }

    fn parsed_format(&self) -> Result<LogFormat, ConfigError> {
        match self.format.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::InvalidValue {
                field: "logging.format".to_string(),
                value: self.format.clone(),
            }),
        }
    }

    /// Convert to the subscriber configuration used by `logging::init_logging`
    pub fn to_logging_config(&self) -> Result<LoggingConfig, ConfigError> {
        let preset = match self.parsed_environment()? {
            Some(environment) => LoggingConfig::for_environment(environment),
            None => LoggingConfig::default(),
        };
        Ok(LoggingConfig {
            level: self.parsed_level()?,
            format: self.parsed_format()?,
            show_target: self.show_target,
            ..preset
        })
    }
}

fn parse_environment(name: &str) -> Result<LoggingEnvironment, ConfigError> {
    match name.to_ascii_lowercase().as_str() {
        "development" | "dev" => Ok(LoggingEnvironment::Development),
        "testing" | "test" => Ok(LoggingEnvironment::Testing),
        "production" | "prod" => Ok(LoggingEnvironment::Production),
        _ => Err(ConfigError::InvalidValue {
            field: "logging.environment".to_string(),
            value: name.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides_file() {
        let partial = PartialLogSettings {
            environment: None,
            level: Some("warn".to_string()),
            format: Some("json".to_string()),
            show_target: Some(false),
        };
        let env_map = HashMap::from([("ASPECTCORE_LOG_LEVEL".to_string(), "debug".to_string())]);

        let settings = LogSettings::from_env_or_file(Some(partial), &env_map).unwrap();
        assert_eq!(settings.level, "debug");
        assert_eq!(settings.format, "json");

        let logging = settings.to_logging_config().unwrap();
        assert_eq!(logging.level, Level::DEBUG);
        assert_eq!(logging.format, LogFormat::Json);
        assert!(!logging.show_target);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let partial = PartialLogSettings {
            format: Some("xml".to_string()),
            ..Default::default()
        };
        let err = LogSettings::from_env_or_file(Some(partial), &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "logging.format"));

        let env_map = HashMap::from([("ASPECTCORE_LOG_LEVEL".to_string(), "loud".to_string())]);
        assert!(LogSettings::from_env_or_file(None, &env_map).is_err());

        let env_map = HashMap::from([("ASPECTCORE_LOG_ENV".to_string(), "staging".to_string())]);
        let err = LogSettings::from_env_or_file(None, &env_map).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "logging.environment"));
    }

    #[test]
    fn test_defaults_without_environment() {
        let settings = LogSettings::from_env_or_file(None, &HashMap::new()).unwrap();
        assert_eq!(settings.environment, None);
        assert_eq!(settings.level, "info");
        assert_eq!(settings.format, "compact");
        assert!(settings.show_target);
    }

    #[test]
    fn test_environment_preset_fills_unset_fields() {
        let partial = PartialLogSettings {
            environment: Some("production".to_string()),
            level: Some("warn".to_string()),
            ..Default::default()
        };
        let settings = LogSettings::from_env_or_file(Some(partial), &HashMap::new()).unwrap();
        assert_eq!(settings.level, "warn");
        assert_eq!(settings.format, "json");
        assert!(!settings.show_target);

        let logging = settings.to_logging_config().unwrap();
        assert_eq!(logging.environment, LoggingEnvironment::Production);
        assert_eq!(logging.level, Level::WARN);
        assert_eq!(logging.format, LogFormat::Json);

        let env_map = HashMap::from([("ASPECTCORE_LOG_ENV".to_string(), "dev".to_string())]);
        let logging = LogSettings::from_env_or_file(None, &env_map)
            .unwrap()
            .to_logging_config()
            .unwrap();
        assert_eq!(logging.environment, LoggingEnvironment::Development);
        assert_eq!(logging.level, Level::DEBUG);
        assert!(logging.show_thread_ids);
    }
}
