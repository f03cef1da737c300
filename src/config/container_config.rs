use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::app_config::{parse_bool, parse_list};
use crate::errors::ConfigError;
use crate::infrastructure::container::ScopeKind;

/// Container settings
#[derive(Debug, Clone, Serialize)]
pub struct ContainerConfig {
    /// Name of the runtime's own application holder
    pub application_name: String,
    /// Construct non-lazy singletons as soon as a rule set is activated
    pub eager_singletons: bool,
    /// Scope kinds kept across `Runtime::reload`
    pub preserve_on_reset: Vec<ScopeKind>,
}

/// Partial container settings for loading from files
#[derive(Deserialize, Debug, Default)]
pub struct PartialContainerConfig {
    pub application_name: Option<String>,
    pub eager_singletons: Option<bool>,
    pub preserve_on_reset: Option<Vec<ScopeKind>>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            application_name: default_application_name(),
            eager_singletons: true,
            preserve_on_reset: Vec::new(),
        }
    }
}

impl ContainerConfig {
    pub fn from_env_or_file(
        partial: Option<PartialContainerConfig>,
        env_map: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let partial = partial.unwrap_or_default();

        let application_name = env_map
            .get("ASPECTCORE_APPLICATION_NAME")
            .cloned()
            .or(partial.application_name)
            .unwrap_or_else(default_application_name);
        let eager_singletons = match env_map.get("ASPECTCORE_EAGER_SINGLETONS") {
            Some(value) => parse_bool("container.eager_singletons", value)?,
            None => partial.eager_singletons.unwrap_or(true),
        };
        let preserve_on_reset = match env_map.get("ASPECTCORE_PRESERVE_ON_RESET") {
            Some(value) => parse_list(value)
                .iter()
                .map(|name| parse_scope(name))
                .collect::<Result<Vec<_>, _>>()?,
            None => partial.preserve_on_reset.unwrap_or_default(),
        };

        let config = Self {
            application_name,
            eager_singletons,
            preserve_on_reset,
        };
        config.validate()?;
        Ok(config)
    }

    /// Prototype instances are never stored, so there is nothing to preserve
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(kind) = self
            .preserve_on_reset
            .iter()
            .find(|kind| **kind == ScopeKind::Prototype)
        {
            return Err(ConfigError::InvalidValue {
                field: "container.preserve_on_reset".to_string(),
                value: kind.to_string(),
            });
        }
        if self.application_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "container.application_name".to_string(),
                value: self.application_name.clone(),
            });
        }
        Ok(())
    }
}

fn parse_scope(name: &str) -> Result<ScopeKind, ConfigError> {
    ScopeKind::ALL
        .iter()
        .copied()
        .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
        .ok_or_else(|| ConfigError::InvalidValue {
            field: "container.preserve_on_reset".to_string(),
            value: name.to_string(),
        })
}

fn default_application_name() -> String {
    "aspectcore".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserve_list_from_env() {
        let env_map = HashMap::from([(
            "ASPECTCORE_PRESERVE_ON_RESET".to_string(),
            "Context,singleton".to_string(),
        )]);
        let config = ContainerConfig::from_env_or_file(None, &env_map).unwrap();
        assert_eq!(
            config.preserve_on_reset,
            vec![ScopeKind::Context, ScopeKind::Singleton]
        );
    }

    #[test]
    fn test_prototype_cannot_be_preserved() {
        let partial = PartialContainerConfig {
            preserve_on_reset: Some(vec![ScopeKind::Session, ScopeKind::Prototype]),
            ..Default::default()
        };
        let err = ContainerConfig::from_env_or_file(Some(partial), &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref value, .. } if value == "prototype"));

        let env_map = HashMap::from([(
            "ASPECTCORE_PRESERVE_ON_RESET".to_string(),
            "forever".to_string(),
        )]);
        assert!(ContainerConfig::from_env_or_file(None, &env_map).is_err());
    }
}
