//! Message contexts.
//!
//! Every delivered message comes with metadata: its id, the pump that received
//! it, correlation information and arbitrary application properties. The
//! router only reads this metadata to evaluate context filters.
//!
//! - [`MessageContext`] - the transport-neutral base every context carries
//! - [`QueueMessageContext`] - queue/topic specific metadata (delivery count,
//!   lock token, cancellation, settlement)
//! - [`Context`] - the object-safe view the router works with
//! - [`FromContext`] - recovers a concrete context type from a `&dyn Context`
//!
//! # Context compatibility
//!
//! A handler declares the context type it wants. Before a registration is
//! considered for a message, the router asks [`FromContext::from_context`]
//! whether the incoming context can be viewed as that type:
//!
//! ```rust,ignore
//! // Accepts any context, sees only the base metadata.
//! Registration::<Order, MessageContext>::builder()
//!
//! // Only considered for messages delivered by a queue/topic pump.
//! Registration::<Order, QueueMessageContext>::builder()
//! ```

use std::any::Any;
use std::collections::BTreeMap;
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::settlement::MessageSettler;

/// Application properties attached to a message.
pub type Properties = BTreeMap<String, Value>;

// ============================================================================
// Context Trait
// ============================================================================

/// The object-safe view of a message context.
///
/// Implemented by every concrete context type. The router only ever holds a
/// `&dyn Context`; handlers receive the concrete type they registered for.
pub trait Context: Any + Send + Sync {
    /// Returns the transport-neutral base metadata.
    fn message_context(&self) -> &MessageContext;

    /// Returns a short name for this context type, used in logs.
    fn context_type(&self) -> &'static str;

    /// Returns a reference to self as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Recovers a concrete context type from a type-erased [`Context`].
///
/// Returning `None` means the incoming context is not compatible with the
/// requested type, and registrations asking for it are skipped.
pub trait FromContext: Send + Sync + 'static {
    /// Attempts to view `ctx` as `Self`.
    fn from_context(ctx: &dyn Context) -> Option<&Self>;
}

// ============================================================================
// MessageContext
// ============================================================================

/// Correlation identifiers carried along with a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationInfo {
    /// Identifies the business transaction the message belongs to.
    pub transaction_id: String,
    /// Identifies the operation that produced the message.
    pub operation_id: String,
    /// Identifies the parent of `operation_id`, if any.
    #[serde(default)]
    pub operation_parent_id: Option<String>,
}

/// Transport-neutral message metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContext {
    /// Unique id of the message.
    pub message_id: String,
    /// Id of the pump that received the message.
    pub job_id: String,
    /// Correlation identifiers, if the sender supplied them.
    #[serde(default)]
    pub correlation: Option<CorrelationInfo>,
    /// Application properties.
    #[serde(default)]
    pub properties: Properties,
}

impl MessageContext {
    /// Creates a context for the given message and job.
    pub fn new(message_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            job_id: job_id.into(),
            correlation: None,
            properties: Properties::new(),
        }
    }

    /// Adds an application property (builder pattern).
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Attaches correlation information (builder pattern).
    pub fn with_correlation(mut self, correlation: CorrelationInfo) -> Self {
        self.correlation = Some(correlation);
        self
    }

    /// Returns an application property.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Returns an application property if it is a string.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

impl Context for MessageContext {
    fn message_context(&self) -> &MessageContext {
        self
    }

    fn context_type(&self) -> &'static str {
        "message"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Every context can be viewed through its base metadata.
impl FromContext for MessageContext {
    fn from_context(ctx: &dyn Context) -> Option<&Self> {
        Some(ctx.message_context())
    }
}

// ============================================================================
// QueueMessageContext
// ============================================================================

/// The kind of entity a message was received from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EntityKind {
    /// A point-to-point queue.
    Queue,
    /// A topic, read through a subscription.
    Topic {
        /// Name of the subscription.
        subscription: String,
    },
}

/// Metadata for a message delivered by a queue or topic pump.
///
/// Dereferences to the base [`MessageContext`].
#[derive(Debug, Clone)]
pub struct QueueMessageContext {
    base: MessageContext,
    /// Path of the queue or topic the message came from.
    pub entity_path: String,
    /// Whether the entity is a queue or a topic subscription.
    pub entity_kind: EntityKind,
    /// How many times this message has been delivered, starting at 1.
    pub delivery_count: u32,
    /// Token identifying the lock held on the message, if peek-locked.
    pub lock_token: Option<String>,
    /// When the message was enqueued (RFC 3339), if known.
    pub enqueued_at: Option<String>,
    cancellation: CancellationToken,
    settler: MessageSettler,
}

impl QueueMessageContext {
    /// Creates a queue context around the given base metadata.
    ///
    /// The delivery count starts at 1.
    pub fn new(base: MessageContext, entity_path: impl Into<String>, entity_kind: EntityKind) -> Self {
        Self {
            base,
            entity_path: entity_path.into(),
            entity_kind,
            delivery_count: 1,
            lock_token: None,
            enqueued_at: None,
            cancellation: CancellationToken::new(),
            settler: MessageSettler::new(),
        }
    }

    /// Sets the delivery count (builder pattern).
    pub fn with_delivery_count(mut self, count: u32) -> Self {
        self.delivery_count = count;
        self
    }

    /// Sets the lock token (builder pattern).
    pub fn with_lock_token(mut self, token: impl Into<String>) -> Self {
        self.lock_token = Some(token.into());
        self
    }

    /// Sets the enqueue timestamp (builder pattern).
    pub fn with_enqueued_at(mut self, at: impl Into<String>) -> Self {
        self.enqueued_at = Some(at.into());
        self
    }

    /// Replaces the cancellation token (builder pattern).
    ///
    /// Transports hand in their shutdown token here so handlers can observe it.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Returns the cancellation token passed through from the transport.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Gives the context a fresh settler (builder pattern).
    ///
    /// The pump does this for every delivery so a request never leaks into
    /// a redelivered copy.
    pub fn with_settler(mut self, settler: MessageSettler) -> Self {
        self.settler = settler;
        self
    }

    /// Returns the handle handlers use to settle this delivery themselves.
    pub fn settler(&self) -> &MessageSettler {
        &self.settler
    }

    /// Returns the base metadata.
    pub fn base(&self) -> &MessageContext {
        &self.base
    }

    /// Returns mutable access to the base metadata.
    pub fn base_mut(&mut self) -> &mut MessageContext {
        &mut self.base
    }
}

impl Deref for QueueMessageContext {
    type Target = MessageContext;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl Context for QueueMessageContext {
    fn message_context(&self) -> &MessageContext {
        &self.base
    }

    fn context_type(&self) -> &'static str {
        "queue"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl FromContext for QueueMessageContext {
    fn from_context(ctx: &dyn Context) -> Option<&Self> {
        ctx.as_any().downcast_ref::<Self>()
    }
}
