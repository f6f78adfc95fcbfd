//! Configuration for Ingot processes.
//!
//! Layered figment-based loading from files, environment variables, and
//! programmatic defaults, plus validation of the runtime's own settings.
//! Plugins read their settings through the `core.rootConfig` service.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, LoadedConfig, Profile, load_config, load_config_from_file};
pub use schema::{IngotConfig, LogFormat, LogLevel, LogOutput, LoggingConfig};
pub use validation::validate_config;
