//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{IngotConfig, LogOutput, LoggingConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &IngotConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;

    if !config.app.is_object() {
        return Err(ConfigError::validation("`app` must be a table"));
    }

    Ok(())
}

/// Validates logging configuration.
fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File {
        match &logging.file_path {
            None => return Err(ConfigError::missing_key("logging.file_path")),
            Some(path) if path.file_name().is_none() => {
                return Err(ConfigError::validation(format!(
                    "Log file path has no file name: {}",
                    path.display()
                )));
            }
            Some(_) => {}
        }
    }

    for target in logging.filters.keys() {
        if target.is_empty() || target.contains(char::is_whitespace) {
            return Err(ConfigError::validation(format!(
                "Invalid log filter target: {target:?}"
            )));
        }
    }

    Ok(())
}
