pub mod app_config;
pub mod container_config;
pub mod intercept_config;
pub mod loader;
pub mod logging_config;

// Re-export commonly used types
pub use app_config::RuntimeConfig;
pub use container_config::ContainerConfig;
pub use intercept_config::InterceptConfig;
pub use loader::ConfigLoader;
pub use logging_config::LogSettings;

// Re-export constants
pub use app_config::{CONFIG_FILE_NAME, ENV_KEYS};
