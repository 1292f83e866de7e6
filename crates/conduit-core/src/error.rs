//! Error types shared by every Conduit layer.
//!
//! The taxonomy has three members:
//!
//! - [`ConfigurationError`] - raised synchronously while handlers are being
//!   registered. Always surfaced to the caller, never defaulted.
//! - [`DeserializationError`] - a per-candidate decode failure. The router
//!   treats it as "wrong handler" and moves on.
//! - [`HandlerError`] - whatever a handler's processing returns. The router
//!   hands it back to the transport untouched.

use thiserror::Error;

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors raised while building the handler registrations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// The registration has no handler factory.
    #[error("handler '{handler}' requires an implementation factory")]
    MissingFactory {
        /// Name of the offending registration.
        handler: String,
    },

    /// A body filter was supplied without a context filter.
    #[error("handler '{handler}' has a body filter but no context filter; supply both or neither")]
    MissingContextFilter {
        /// Name of the offending registration.
        handler: String,
    },

    /// A context filter was supplied without a body filter.
    #[error("handler '{handler}' has a context filter but no body filter; supply both or neither")]
    MissingBodyFilter {
        /// Name of the offending registration.
        handler: String,
    },
}

impl ConfigurationError {
    /// Returns the name of the registration that failed validation.
    pub fn handler(&self) -> &str {
        match self {
            Self::MissingFactory { handler }
            | Self::MissingContextFilter { handler }
            | Self::MissingBodyFilter { handler } => handler,
        }
    }
}

// =============================================================================
// Deserialization Errors
// =============================================================================

/// A message body could not be turned into the payload type a handler expects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot deserialize body into '{target}': {reason}")]
pub struct DeserializationError {
    /// Type name of the payload that was requested.
    pub target: &'static str,
    /// Human-readable diagnostic.
    pub reason: String,
}

impl DeserializationError {
    /// Creates a deserialization error for payload type `M`.
    pub fn new<M>(reason: impl Into<String>) -> Self {
        Self {
            target: std::any::type_name::<M>(),
            reason: reason.into(),
        }
    }

    /// Wraps a `serde_json` failure for payload type `M`.
    pub fn json<M>(err: serde_json::Error) -> Self {
        Self::new::<M>(err.to_string())
    }
}

// =============================================================================
// Handler Errors
// =============================================================================

/// The error type returned by message handlers.
///
/// Boxed so that handlers can return any error they like; the router never
/// inspects or wraps it.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for registration operations.
pub type ConfigurationResult<T> = Result<T, ConfigurationError>;

/// Result type for body deserialization.
pub type DeserializeResult<T> = Result<T, DeserializationError>;
