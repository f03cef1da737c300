//! 配置加载的集成测试

use aspectcore::config::{ConfigLoader, RuntimeConfig};
use aspectcore::errors::ConfigError;
use aspectcore::infrastructure::container::ScopeKind;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_defaults_when_file_missing() {
    let temp_dir = TempDir::new().unwrap();
    let config = RuntimeConfig::load_with_base_path(temp_dir.path().to_path_buf()).unwrap();

    assert!(config.intercept.advice_cache);
    assert_eq!(config.container.application_name, "aspectcore");
    assert!(config.intercept.exempt_operations.contains(&"drop".to_string()));
}

#[test]
fn test_load_from_toml_file() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("aspectcore.toml"),
        r#"
[logging]
level = "debug"
format = "json"

[intercept]
exempt_operations = ["toString", "hashCode"]
advice_cache = false

[container]
application_name = "shop"
eager_singletons = false
preserve_on_reset = ["singleton", "application"]
"#,
    )
    .unwrap();

    let config = ConfigLoader::with_base_path(temp_dir.path().to_path_buf())
        .load_config()
        .unwrap();

    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.intercept.exempt_operations, vec!["toString", "hashCode"]);
    assert!(!config.intercept.advice_cache);
    assert_eq!(config.container.application_name, "shop");
    assert!(!config.container.eager_singletons);
    assert_eq!(
        config.container.preserve_on_reset,
        vec![ScopeKind::Singleton, ScopeKind::Application]
    );
}

#[test]
fn test_invalid_values_in_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("custom.toml");
    fs::write(&path, "[container]\npreserve_on_reset = [\"prototype\"]\n").unwrap();

    let err = ConfigLoader::with_config_file(&path.to_string_lossy())
        .load_config()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "container.preserve_on_reset"));
}

#[test]
fn test_unknown_scope_name_is_a_parse_error() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("aspectcore.toml"),
        "[container]\npreserve_on_reset = [\"forever\"]\n",
    )
    .unwrap();

    let err = RuntimeConfig::load_with_base_path(temp_dir.path().to_path_buf()).unwrap_err();
    assert!(matches!(err, ConfigError::TomlParse(..)));
}
