//! Handler traits for the Conduit framework.
//!
//! A [`MessageHandler<M, C>`] processes a deserialized payload of type `M`
//! delivered with a context of type `C`. A [`FallbackHandler`] processes the
//! raw body of messages no typed handler took.
//!
//! Handlers are usually structs holding their own dependencies:
//!
//! ```rust,ignore
//! struct ShipOrder {
//!     warehouse: Arc<Warehouse>,
//! }
//!
//! #[async_trait]
//! impl MessageHandler<Order, QueueMessageContext> for ShipOrder {
//!     async fn process(&self, order: &Order, ctx: &QueueMessageContext) -> Result<(), HandlerError> {
//!         self.warehouse.ship(order.order_id).await?;
//!         Ok(())
//!     }
//! }
//! ```
//!
//! Closures work too, through [`handler_fn`] and [`fallback_fn`]:
//!
//! ```rust,ignore
//! let log = handler_fn(|order: Order, ctx: MessageContext| async move {
//!     tracing::info!(order_id = order.order_id, message_id = %ctx.message_id, "Order received");
//!     Ok(())
//! });
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use conduit_core::{Context, HandlerError, MessageContext};

// ============================================================================
// Handler Traits
// ============================================================================

/// Processes messages of type `M` delivered with a context of type `C`.
///
/// Errors are returned to the transport unchanged; the router does not retry
/// or swallow them.
#[async_trait]
pub trait MessageHandler<M, C>: Send + Sync {
    /// Processes one message.
    async fn process(&self, message: &M, context: &C) -> Result<(), HandlerError>;
}

/// Processes messages that no typed handler accepted.
#[async_trait]
pub trait FallbackHandler: Send + Sync {
    /// Processes one raw message body.
    async fn process(&self, body: &[u8], context: &dyn Context) -> Result<(), HandlerError>;
}

/// Shared handlers delegate to the inner instance.
#[async_trait]
impl<H, M, C> MessageHandler<M, C> for Arc<H>
where
    H: MessageHandler<M, C> + ?Sized,
    M: Send + Sync,
    C: Send + Sync,
{
    async fn process(&self, message: &M, context: &C) -> Result<(), HandlerError> {
        (**self).process(message, context).await
    }
}

#[async_trait]
impl<H> FallbackHandler for Arc<H>
where
    H: FallbackHandler + ?Sized,
{
    async fn process(&self, body: &[u8], context: &dyn Context) -> Result<(), HandlerError> {
        (**self).process(body, context).await
    }
}

// ============================================================================
// Closure Handlers
// ============================================================================

/// A handler backed by a closure. Created by [`handler_fn`].
///
/// The closure receives owned clones of the payload and the context so that
/// the returned future can be `'static`.
pub struct HandlerFn<F, M, C> {
    f: F,
    _marker: PhantomData<fn(M, C)>,
}

impl<F: Clone, M, C> Clone for HandlerFn<F, M, C> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, M, C> MessageHandler<M, C> for HandlerFn<F, M, C>
where
    F: Fn(M, C) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
    M: Clone + Send + Sync,
    C: Clone + Send + Sync,
{
    async fn process(&self, message: &M, context: &C) -> Result<(), HandlerError> {
        (self.f)(message.clone(), context.clone()).await
    }
}

/// Wraps a closure as a [`MessageHandler`].
pub fn handler_fn<F, Fut, M, C>(f: F) -> HandlerFn<F, M, C>
where
    F: Fn(M, C) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    HandlerFn {
        f,
        _marker: PhantomData,
    }
}

/// A fallback handler backed by a closure. Created by [`fallback_fn`].
///
/// The closure receives the body and the base [`MessageContext`] by value.
#[derive(Clone)]
pub struct FallbackFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> FallbackHandler for FallbackFn<F>
where
    F: Fn(Vec<u8>, MessageContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn process(&self, body: &[u8], context: &dyn Context) -> Result<(), HandlerError> {
        (self.f)(body.to_vec(), context.message_context().clone()).await
    }
}

/// Wraps a closure as a [`FallbackHandler`].
pub fn fallback_fn<F, Fut>(f: F) -> FallbackFn<F>
where
    F: Fn(Vec<u8>, MessageContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    FallbackFn { f }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler<u32, MessageContext> for Counting {
        async fn process(&self, message: &u32, _context: &MessageContext) -> Result<(), HandlerError> {
            self.seen.fetch_add(*message as usize, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_shared_handler_delegates() {
        let inner = Arc::new(Counting {
            seen: AtomicUsize::new(0),
        });
        let shared = Arc::clone(&inner);
        let ctx = MessageContext::new("msg-1", "job-1");

        MessageHandler::<u32, MessageContext>::process(&shared, &3, &ctx)
            .await
            .unwrap();
        MessageHandler::<u32, MessageContext>::process(&shared, &4, &ctx)
            .await
            .unwrap();

        assert_eq!(inner.seen.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_handler_fn_receives_clones() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let handler = handler_fn(move |n: u32, ctx: MessageContext| {
            let c = Arc::clone(&c);
            async move {
                assert_eq!(ctx.message_id, "msg-1");
                c.fetch_add(n as usize, Ordering::SeqCst);
                Ok::<(), HandlerError>(())
            }
        });

        handler
            .process(&5, &MessageContext::new("msg-1", "job-1"))
            .await
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_handler_fn_propagates_error() {
        let handler = handler_fn(|_: u32, _: MessageContext| async {
            Err::<(), HandlerError>("boom".into())
        });

        let err = handler
            .process(&1, &MessageContext::new("msg-1", "job-1"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_fallback_fn_gets_raw_body() {
        let handler = fallback_fn(|body: Vec<u8>, ctx: MessageContext| async move {
            assert_eq!(body, b"not json");
            assert_eq!(ctx.job_id, "job-1");
            Ok::<(), HandlerError>(())
        });

        handler
            .process(b"not json", &MessageContext::new("msg-1", "job-1"))
            .await
            .unwrap();
    }
}
