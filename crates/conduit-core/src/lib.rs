//! # Conduit Core
//!
//! The leaf types of the Conduit message routing framework.
//!
//! This crate has no opinion on how messages arrive or how handlers are
//! selected. It provides the vocabulary the other layers share:
//!
//! - **Contexts**: metadata delivered with every message ([`MessageContext`],
//!   [`QueueMessageContext`]) and the type-erased [`Context`] view
//! - **Serializers**: pluggable body decoding ([`BodySerializer`],
//!   [`JsonSerializer`])
//! - **Outcomes**: the tagged result of routing one message
//!   ([`DispatchOutcome`])
//! - **Settlement**: how a delivered message leaves the queue
//!   ([`Settlement`], [`MessageSettler`])
//! - **Errors**: [`ConfigurationError`], [`DeserializationError`] and
//!   [`HandlerError`]
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌───────────┐
//! │  Transport  │────▶│    Router    │────▶│  Handler  │
//! │ (body, ctx) │◀────│  (outcome)   │     │ (M, ctx)  │
//! └─────────────┘     └──────────────┘     └───────────┘
//! ```

pub mod context;
pub mod error;
pub mod outcome;
pub mod serializer;
pub mod settlement;

pub use context::{
    Context, CorrelationInfo, EntityKind, FromContext, MessageContext, Properties,
    QueueMessageContext,
};
pub use error::{
    ConfigurationError, ConfigurationResult, DeserializationError, DeserializeResult,
    HandlerError,
};
pub use outcome::{DispatchOutcome, MatchSource, MatchedHandler, RejectReason, Rejection};
pub use serializer::{BodySerializer, JsonSerializer, SerializerFn, serializer_fn};
pub use settlement::{MessageSettler, Settlement};

// Re-exported so handlers can observe transport shutdown without a direct dependency.
pub use tokio_util::sync::CancellationToken;
