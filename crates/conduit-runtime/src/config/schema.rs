//! Configuration schema definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConduitConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Message pump settings.
    #[serde(default)]
    pub pump: PumpConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Returns the level as used in filter directives.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Converts to the `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature.
    Json,
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Requires `file_path`.
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global log level. `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    /// Log line format.
    #[serde(default)]
    pub format: LogFormat,

    /// Output destination.
    #[serde(default)]
    pub output: LogOutput,

    /// Log file path, used when `output` is `file`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Span lifecycle events to log.
    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread IDs.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include file names and line numbers.
    #[serde(default)]
    pub file_location: bool,

    /// Per-module levels, e.g. `conduit_framework = "trace"`.
    #[serde(default)]
    pub filters: BTreeMap<String, LogLevel>,

    /// Log every routing decision and settlement with per-message timings.
    #[serde(default)]
    pub trace_messages: bool,
}

// =============================================================================
// Message Pump
// =============================================================================

/// What the pump does with a message no handler took.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnmatchedAction {
    /// Move the message to the dead-letter queue.
    #[default]
    DeadLetter,
    /// Release the lock so the message is delivered again.
    Abandon,
    /// Drop the message.
    Complete,
}

/// Message pump configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumpConfig {
    /// Identifier of the job, stamped on every message context.
    #[serde(default = "default_job_id")]
    pub job_id: String,

    /// Queue or topic the pump reads from.
    #[serde(default = "default_entity_path")]
    pub entity_path: String,

    /// Maximum number of messages dispatched at once.
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// Maximum number of messages fetched per receive call.
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,

    /// Complete matched messages automatically.
    ///
    /// When disabled, handlers settle through
    /// `QueueMessageContext::settler`. A message left unsettled stays locked
    /// until its lock expires and is then redelivered.
    #[serde(default = "default_auto_complete")]
    pub auto_complete: bool,

    /// Deliveries after which a failing message is dead-lettered.
    #[serde(default = "default_max_delivery_count")]
    pub max_delivery_count: u32,

    /// Settlement for messages no handler took.
    #[serde(default)]
    pub unmatched_action: UnmatchedAction,

    /// Pause between receive calls when the source is idle, in milliseconds.
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,

    /// How long a received message stays locked before it is redelivered,
    /// in milliseconds.
    #[serde(default = "default_lock_duration_ms")]
    pub lock_duration_ms: u64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            job_id: default_job_id(),
            entity_path: default_entity_path(),
            max_concurrent_calls: default_max_concurrent_calls(),
            prefetch: default_prefetch(),
            auto_complete: default_auto_complete(),
            max_delivery_count: default_max_delivery_count(),
            unmatched_action: UnmatchedAction::default(),
            idle_delay_ms: default_idle_delay_ms(),
            lock_duration_ms: default_lock_duration_ms(),
        }
    }
}

impl PumpConfig {
    /// Returns the idle pause as a `Duration`.
    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    /// Returns the message lock duration as a `Duration`.
    pub fn lock_duration(&self) -> Duration {
        Duration::from_millis(self.lock_duration_ms)
    }
}

fn default_job_id() -> String {
    "conduit".to_string()
}

fn default_entity_path() -> String {
    "messages".to_string()
}

fn default_max_concurrent_calls() -> usize {
    16
}

fn default_prefetch() -> usize {
    32
}

fn default_auto_complete() -> bool {
    true
}

fn default_max_delivery_count() -> u32 {
    10
}

fn default_idle_delay_ms() -> u64 {
    100
}

fn default_lock_duration_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConduitConfig::default();

        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert_eq!(config.pump.max_concurrent_calls, 16);
        assert_eq!(config.pump.unmatched_action, UnmatchedAction::DeadLetter);
        assert_eq!(config.pump.idle_delay(), Duration::from_millis(100));
        assert_eq!(config.pump.lock_duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ConduitConfig = serde_json::from_str(
            r#"{
                "logging": { "level": "debug", "filters": { "conduit_framework": "trace" } },
                "pump": { "entity_path": "orders", "unmatched_action": "abandon" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(
            config.logging.filters.get("conduit_framework"),
            Some(&LogLevel::Trace)
        );
        assert_eq!(config.pump.entity_path, "orders");
        assert_eq!(config.pump.unmatched_action, UnmatchedAction::Abandon);
        assert_eq!(config.pump.prefetch, 32);
    }
}
