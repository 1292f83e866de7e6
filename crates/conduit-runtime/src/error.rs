//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by a message source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The source has shut down and will deliver no more messages.
    #[error("Message source closed")]
    Closed,

    /// Fetching messages failed. The pump retries after a pause.
    #[error("Failed to receive messages: {0}")]
    Receive(String),

    /// The lock on a message expired or was never held.
    #[error("Lock lost for message {message_id}")]
    LockLost { message_id: String },

    /// Settling a message failed.
    #[error("Failed to settle message {message_id}: {reason}")]
    Settle { message_id: String, reason: String },
}

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The message source failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The pump task panicked or was aborted.
    #[error("Message pump task failed: {0}")]
    PumpTask(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
