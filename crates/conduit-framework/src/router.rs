//! The message router.
//!
//! [`MessageRouter`] is the single entry point the transport calls for every
//! delivered message. It walks the compatible registrations in insertion
//! order, stops at the first one whose gates all pass, and falls back to the
//! fallback handler (if any) when nothing matched.
//!
//! # Dispatch Flow
//!
//! ```text
//! body, ctx ──▶ registration 0 ──▶ registration 1 ──▶ ... ──▶ fallback ──▶ Unmatched
//!                    │                   │                       │
//!                    ▼                   ▼                       ▼
//!                 Matched             Matched                 Matched
//! ```
//!
//! A candidate that rejects the message (filter or decode failure) is recorded
//! and skipped. A handler that fails ends the dispatch with its own error.
//!
//! # Runtime Registration
//!
//! Each dispatch works on a snapshot of the handler collection. Registering
//! while messages are in flight publishes a new snapshot; dispatches already
//! running keep the view they started with.
//!
//! # Tower Service Integration
//!
//! `MessageRouter` implements `tower::Service<InboundMessage<C>>`, so Tower
//! middleware can wrap it:
//!
//! ```rust,ignore
//! use tower::ServiceBuilder;
//! use tower::limit::ConcurrencyLimitLayer;
//!
//! let service = ServiceBuilder::new()
//!     .layer(ConcurrencyLimitLayer::new(16))
//!     .service(router.clone());
//! ```

use std::fmt;
use std::sync::Arc;
use std::task::{self, Poll};

use arc_swap::ArcSwap;
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use tower::Service;
use tracing::{Instrument, debug, debug_span, trace};

use conduit_core::{
    ConfigurationResult, Context, DispatchOutcome, FromContext, HandlerError, RejectReason,
    Rejection,
};

use crate::collection::HandlerCollection;
use crate::registration::{FallbackBuilder, RegistrationBuilder, Route};

/// Routes raw message bodies to the first matching handler.
///
/// Cloning is cheap and every clone shares the same registrations.
#[derive(Clone)]
pub struct MessageRouter {
    handlers: Arc<ArcSwap<HandlerCollection>>,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new(HandlerCollection::new())
    }
}

impl From<HandlerCollection> for MessageRouter {
    fn from(handlers: HandlerCollection) -> Self {
        Self::new(handlers)
    }
}

impl MessageRouter {
    /// Creates a router over a finished handler collection.
    pub fn new(handlers: HandlerCollection) -> Self {
        Self {
            handlers: Arc::new(ArcSwap::from_pointee(handlers)),
        }
    }

    /// Returns the collection the next dispatch will see.
    pub fn snapshot(&self) -> Arc<HandlerCollection> {
        self.handlers.load_full()
    }

    /// Validates and appends a registration while the router is live.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigurationError`](conduit_core::ConfigurationError)
    /// from [`RegistrationBuilder::build`]; nothing is published.
    pub fn register<M, C>(&self, registration: RegistrationBuilder<M, C>) -> ConfigurationResult<()>
    where
        M: DeserializeOwned + Send + Sync + 'static,
        C: FromContext,
    {
        let route: Arc<dyn Route> = Arc::new(registration.build()?);
        debug!(handler = %route.name(), "Registering handler");

        self.handlers.rcu(|current| {
            let mut next = HandlerCollection::clone(current);
            next.add_route(Arc::clone(&route));
            next
        });
        Ok(())
    }

    /// Sets the fallback while the router is live, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingFactory`](conduit_core::ConfigurationError::MissingFactory)
    /// when the builder has no factory; the previous fallback stays active.
    pub fn set_fallback(&self, fallback: FallbackBuilder) -> ConfigurationResult<()> {
        let fallback = Arc::new(fallback.build()?);
        debug!(handler = %fallback.name(), "Setting fallback handler");

        self.handlers.rcu(|current| {
            let mut next = HandlerCollection::clone(current);
            next.replace_fallback(Arc::clone(&fallback));
            next
        });
        Ok(())
    }

    /// Routes one message.
    ///
    /// Returns [`DispatchOutcome::Matched`] for the first registration whose
    /// gates all pass (or for the fallback), and
    /// [`DispatchOutcome::Unmatched`] with every rejection otherwise. Never
    /// returns [`DispatchOutcome::DeserializationFailed`]: decode failures are
    /// folded into the rejection list.
    ///
    /// # Errors
    ///
    /// The selected handler's error, unchanged.
    pub async fn dispatch(
        &self,
        body: &[u8],
        ctx: &dyn Context,
    ) -> Result<DispatchOutcome, HandlerError> {
        let span = debug_span!(
            "dispatch",
            message_id = %ctx.message_context().message_id,
            context_type = ctx.context_type(),
        );

        self.dispatch_snapshot(body, ctx).instrument(span).await
    }

    async fn dispatch_snapshot(
        &self,
        body: &[u8],
        ctx: &dyn Context,
    ) -> Result<DispatchOutcome, HandlerError> {
        let handlers = self.handlers.load_full();
        let mut rejections = Vec::new();

        for (index, route) in handlers.registrations_for(ctx) {
            trace!(handler = %route.name(), index, "Trying registration");

            let outcome = route.try_handle(index, body, ctx).await.inspect_err(|e| {
                debug!(handler = %route.name(), error = %e, "Handler failed");
            })?;

            match outcome {
                DispatchOutcome::Matched(matched) => {
                    debug!(handler = %matched.handler(), index, "Message matched");
                    return Ok(DispatchOutcome::Matched(matched));
                }
                DispatchOutcome::Unmatched(rejected) => rejections.extend(rejected),
                DispatchOutcome::DeserializationFailed(e) => {
                    rejections.push(Rejection::new(route.name(), RejectReason::Deserialization(e)));
                }
            }
        }

        if let Some(fallback) = handlers.fallback() {
            trace!(handler = %fallback.name(), "Invoking fallback");
            let outcome = fallback.handle(body, ctx).await.inspect_err(|e| {
                debug!(handler = %fallback.name(), error = %e, "Fallback failed");
            })?;
            debug!(handler = %fallback.name(), "Message routed to fallback");
            return Ok(outcome);
        }

        debug!(rejected = rejections.len(), "No handler matched");
        Ok(DispatchOutcome::Unmatched(rejections))
    }
}

impl fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRouter")
            .field("handlers", &self.handlers.load_full())
            .finish()
    }
}

// ============================================================================
// Tower Service Implementation
// ============================================================================

/// An owned message, as handed to the router through `tower::Service`.
#[derive(Debug, Clone)]
pub struct InboundMessage<C> {
    /// The raw message body.
    pub body: Vec<u8>,
    /// The context delivered with it.
    pub context: C,
}

impl<C> InboundMessage<C> {
    /// Pairs a body with its context.
    pub fn new(body: impl Into<Vec<u8>>, context: C) -> Self {
        Self {
            body: body.into(),
            context,
        }
    }
}

impl<C> Service<InboundMessage<C>> for MessageRouter
where
    C: Context,
{
    type Response = DispatchOutcome;
    type Error = HandlerError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, message: InboundMessage<C>) -> Self::Future {
        let router = self.clone();
        async move { router.dispatch(&message.body, &message.context).await }.boxed()
    }
}
