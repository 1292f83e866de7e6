//! Dispatch outcomes.
//!
//! A [`DispatchOutcome`] is built once per incoming message and consumed right
//! away by the transport, which decides whether to complete, abandon or
//! dead-letter the message.

use std::any::Any;
use std::fmt;

use crate::error::DeserializationError;

/// Where the matched handler came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    /// A primary registration, by its position in registration order.
    Registration {
        /// Zero-based insertion index.
        index: usize,
    },
    /// The fallback handler.
    Fallback,
}

/// The handler that processed a message, together with the payload it saw.
pub struct MatchedHandler {
    handler: String,
    message_type: &'static str,
    source: MatchSource,
    payload: Box<dyn Any + Send + Sync>,
}

impl MatchedHandler {
    /// Records a match for a typed payload.
    pub fn new<M>(handler: impl Into<String>, source: MatchSource, payload: M) -> Self
    where
        M: Any + Send + Sync,
    {
        Self {
            handler: handler.into(),
            message_type: std::any::type_name::<M>(),
            source,
            payload: Box::new(payload),
        }
    }

    /// Name of the handler registration.
    pub fn handler(&self) -> &str {
        &self.handler
    }

    /// Type name of the payload the handler received.
    pub fn message_type(&self) -> &'static str {
        self.message_type
    }

    /// Whether a primary registration or the fallback matched.
    pub fn source(&self) -> MatchSource {
        self.source
    }

    /// Returns `true` if the fallback handler processed the message.
    pub fn is_fallback(&self) -> bool {
        self.source == MatchSource::Fallback
    }

    /// Returns the payload if it is of type `T`.
    ///
    /// For fallback matches the payload is the raw body as `Vec<u8>`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Takes the payload out if it is of type `T`.
    pub fn into_payload<T: Any>(self) -> Result<T, Self> {
        let Self {
            handler,
            message_type,
            source,
            payload,
        } = self;

        match payload.downcast::<T>() {
            Ok(payload) => Ok(*payload),
            Err(payload) => Err(Self {
                handler,
                message_type,
                source,
                payload,
            }),
        }
    }
}

impl fmt::Debug for MatchedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchedHandler")
            .field("handler", &self.handler)
            .field("message_type", &self.message_type)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Why a registration did not take a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The context filter returned `false`.
    ContextFilter,
    /// The body could not be deserialized into the registration's payload type.
    Deserialization(DeserializationError),
    /// The body filter returned `false`.
    BodyFilter,
}

/// A registration that was tried and passed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Name of the registration.
    pub handler: String,
    /// What disqualified it.
    pub reason: RejectReason,
}

impl Rejection {
    /// Creates a rejection record.
    pub fn new(handler: impl Into<String>, reason: RejectReason) -> Self {
        Self {
            handler: handler.into(),
            reason,
        }
    }
}

/// The result of routing one message.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A handler was selected and completed successfully.
    Matched(MatchedHandler),
    /// No handler took the message. Lists every candidate that was tried, in
    /// registration order. Empty when no registration was compatible.
    Unmatched(Vec<Rejection>),
    /// A single candidate could not decode the body.
    ///
    /// Reported by an individual registration; the router folds it into
    /// [`DispatchOutcome::Unmatched`] and keeps looking.
    DeserializationFailed(DeserializationError),
}

impl DispatchOutcome {
    /// Returns `true` for [`DispatchOutcome::Matched`].
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched(_))
    }

    /// Returns the matched handler, if any.
    pub fn matched(&self) -> Option<&MatchedHandler> {
        match self {
            Self::Matched(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the rejection list of an unmatched outcome.
    pub fn rejections(&self) -> &[Rejection] {
        match self {
            Self::Unmatched(r) => r,
            _ => &[],
        }
    }
}
