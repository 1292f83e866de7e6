//! Configuration module for the Conduit runtime.
//!
//! Layered loading (defaults, files, environment) for logging and message
//! pump settings, with validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    ConduitConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, PumpConfig, SpanEventConfig,
    UnmatchedAction,
};
pub use validation::validate_config;
