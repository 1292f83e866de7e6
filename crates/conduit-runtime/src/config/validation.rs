//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{ConduitConfig, LogFormat, LogOutput, LoggingConfig, PumpConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &ConduitConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_pump_config(&config.pump)?;
    Ok(())
}

/// Validates logging configuration.
fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if logging.format == LogFormat::Json && !cfg!(feature = "json-log") {
        return Err(ConfigError::validation(
            "logging.format",
            "the json format requires the json-log feature",
        ));
    }

    for module in logging.filters.keys() {
        if module.is_empty() || module.contains(char::is_whitespace) {
            return Err(ConfigError::validation(
                "logging.filters",
                format!("invalid target {module:?}"),
            ));
        }
    }

    Ok(())
}

/// Validates message pump configuration.
fn validate_pump_config(pump: &PumpConfig) -> ConfigResult<()> {
    if pump.job_id.is_empty() {
        return Err(ConfigError::missing_field("pump.job_id"));
    }

    if pump.entity_path.is_empty() {
        return Err(ConfigError::missing_field("pump.entity_path"));
    }

    if pump.max_concurrent_calls == 0 {
        return Err(ConfigError::validation(
            "pump.max_concurrent_calls",
            "must be greater than 0",
        ));
    }

    if pump.prefetch == 0 {
        return Err(ConfigError::validation("pump.prefetch", "must be greater than 0"));
    }

    if pump.max_delivery_count == 0 {
        return Err(ConfigError::validation(
            "pump.max_delivery_count",
            "must be greater than 0",
        ));
    }

    if pump.lock_duration_ms == 0 {
        return Err(ConfigError::validation(
            "pump.lock_duration_ms",
            "must be greater than 0",
        ));
    }

    Ok(())
}
