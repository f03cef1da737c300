use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::app_config::{parse_bool, parse_list};
use crate::errors::ConfigError;

/// Interception settings
#[derive(Debug, Clone, Serialize)]
pub struct InterceptConfig {
    /// Operations that always bypass advice
    pub exempt_operations: Vec<String>,
    /// Cache advice bundles per join-point
    pub advice_cache: bool,
}

/// Partial interception settings for loading from files
#[derive(Deserialize, Debug, Default)]
pub struct PartialInterceptConfig {
    pub exempt_operations: Option<Vec<String>>,
    pub advice_cache: Option<bool>,
}

impl Default for InterceptConfig {
    fn default() -> Self {
        Self {
            exempt_operations: default_exempt_operations(),
            advice_cache: true,
        }
    }
}

impl InterceptConfig {
    pub fn from_env_or_file(
        partial: Option<PartialInterceptConfig>,
        env_map: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let partial = partial.unwrap_or_default();

        let exempt_operations = match env_map.get("ASPECTCORE_EXEMPT_OPERATIONS") {
            Some(value) => parse_list(value),
            None => partial
                .exempt_operations
                .unwrap_or_else(default_exempt_operations),
        };
        let advice_cache = match env_map.get("ASPECTCORE_ADVICE_CACHE") {
            Some(value) => parse_bool("intercept.advice_cache", value)?,
            None => partial.advice_cache.unwrap_or(true),
        };

        Ok(Self {
            exempt_operations,
            advice_cache,
        })
    }
}

fn default_exempt_operations() -> Vec<String> {
    ["fmt", "clone", "eq", "hash", "drop"]
        .iter()
        .map(|op| op.to_string())
        .collect()
}
