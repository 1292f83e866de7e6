//! The message pump.
//!
//! [`MessagePump`] pulls batches from a [`MessageSource`], routes each message
//! through a [`MessageRouter`] on its own task, and settles it according to
//! the outcome:
//!
//! | Outcome                      | Settlement                                   |
//! |------------------------------|----------------------------------------------|
//! | handler requested one        | whatever the handler asked for               |
//! | `Matched`                    | `Complete` when `auto_complete`, else none   |
//! | `Unmatched`                  | the configured `unmatched_action`            |
//! | handler error or panic       | `Abandon`, or `DeadLetter` at the last try   |
//!
//! Handlers request a settlement through [`QueueMessageContext::settler`].
//! The router never retries; redelivery of abandoned messages is how failed
//! handlers get another attempt.
//!
//! ```rust,ignore
//! let pump = MessagePump::new(queue, router, config.pump);
//! let handle = pump.spawn();
//! // ...
//! handle.shutdown().await?;
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use conduit_core::{DispatchOutcome, HandlerError, MessageSettler, QueueMessageContext, Settlement};
use conduit_framework::MessageRouter;

use crate::config::{PumpConfig, UnmatchedAction};
use crate::error::{RuntimeError, RuntimeResult, TransportError};
use crate::transport::{MessageSource, ReceivedMessage};

/// Dead-letter reason for messages no handler took.
pub const REASON_NO_HANDLER: &str = "NoHandlerMatched";

/// Dead-letter reason for messages that kept failing.
pub const REASON_MAX_DELIVERY: &str = "MaxDeliveryCountExceeded";

/// Dead-letter reason for bodies no registration could decode.
pub const REASON_DESERIALIZATION: &str = "DeserializationFailed";

// ============================================================================
// Settlement Policy
// ============================================================================

/// Decides how to settle a message after dispatch.
///
/// A settlement requested through the context's settler always wins.
/// Otherwise returns `None` when the pump must leave the message alone,
/// which happens for matched messages when `auto_complete` is off.
pub fn settlement_for(
    outcome: &Result<DispatchOutcome, HandlerError>,
    context: &QueueMessageContext,
    config: &PumpConfig,
) -> Option<Settlement> {
    if let Some(requested) = context.settler().requested() {
        return Some(requested);
    }

    match outcome {
        Ok(DispatchOutcome::Matched(_)) => config.auto_complete.then_some(Settlement::Complete),
        Ok(DispatchOutcome::Unmatched(rejections)) => Some(match config.unmatched_action {
            UnmatchedAction::DeadLetter => Settlement::dead_letter(
                REASON_NO_HANDLER,
                format!("{} registration(s) rejected the message", rejections.len()),
            ),
            UnmatchedAction::Abandon => Settlement::Abandon,
            UnmatchedAction::Complete => Settlement::Complete,
        }),
        Ok(DispatchOutcome::DeserializationFailed(e)) => {
            Some(Settlement::dead_letter(REASON_DESERIALIZATION, e.to_string()))
        }
        Err(e) if context.delivery_count >= config.max_delivery_count => {
            Some(Settlement::dead_letter(REASON_MAX_DELIVERY, e.to_string()))
        }
        Err(_) => Some(Settlement::Abandon),
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters maintained by a running pump.
#[derive(Debug, Default)]
pub struct PumpStats {
    received: AtomicU64,
    completed: AtomicU64,
    abandoned: AtomicU64,
    dead_lettered: AtomicU64,
    settle_failures: AtomicU64,
}

impl PumpStats {
    /// Messages received from the source.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Messages completed by the pump.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Messages abandoned for redelivery.
    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    /// Messages moved to the dead-letter queue.
    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    /// Settlements the source refused.
    pub fn settle_failures(&self) -> u64 {
        self.settle_failures.load(Ordering::Relaxed)
    }

    fn record(&self, settlement: &Settlement) {
        let counter = match settlement {
            Settlement::Complete => &self.completed,
            Settlement::Abandon => &self.abandoned,
            Settlement::DeadLetter { .. } => &self.dead_lettered,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// MessagePump
// ============================================================================

/// Feeds messages from a source through a router.
pub struct MessagePump<S> {
    source: Arc<S>,
    router: MessageRouter,
    config: Arc<PumpConfig>,
    stats: Arc<PumpStats>,
}

impl<S: MessageSource> MessagePump<S> {
    /// Creates a pump.
    pub fn new(source: Arc<S>, router: MessageRouter, config: PumpConfig) -> Self {
        Self {
            source,
            router,
            config: Arc::new(config),
            stats: Arc::new(PumpStats::default()),
        }
    }

    /// Returns the pump's counters.
    pub fn stats(&self) -> Arc<PumpStats> {
        Arc::clone(&self.stats)
    }

    /// Runs the pump on a background task.
    pub fn spawn(self) -> PumpHandle {
        let shutdown = CancellationToken::new();
        let stats = self.stats();
        let task = tokio::spawn(self.run(shutdown.clone()));

        PumpHandle {
            shutdown,
            stats,
            task,
        }
    }

    /// Runs the pump until `shutdown` is cancelled or the source closes.
    ///
    /// Messages already dispatched are allowed to finish and are settled
    /// before this returns. Handlers observe `shutdown` through
    /// [`QueueMessageContext::cancellation_token`].
    pub async fn run(self, shutdown: CancellationToken) -> RuntimeResult<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_calls));
        let mut tasks = JoinSet::new();

        info!(
            entity_path = %self.config.entity_path,
            max_concurrent_calls = self.config.max_concurrent_calls,
            "Message pump started"
        );

        loop {
            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    error!(error = %e, "Message task failed");
                }
            }

            let batch = tokio::select! {
                _ = shutdown.cancelled() => break,
                batch = self.source.receive(self.config.prefetch) => batch,
            };

            let batch = match batch {
                Ok(batch) if batch.is_empty() => {
                    if self.idle(&shutdown).await {
                        break;
                    }
                    continue;
                }
                Ok(batch) => batch,
                Err(TransportError::Closed) => {
                    info!("Message source closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to receive messages");
                    if self.idle(&shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            for mut message in batch {
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };

                self.stats.received.fetch_add(1, Ordering::Relaxed);
                message.context = message
                    .context
                    .with_cancellation(shutdown.child_token())
                    .with_settler(MessageSettler::new());

                let span = info_span!(
                    "message",
                    message_id = %message.context.message_id,
                    delivery_count = message.context.delivery_count,
                );
                let source = Arc::clone(&self.source);
                let router = self.router.clone();
                let config = Arc::clone(&self.config);
                let stats = Arc::clone(&self.stats);

                tasks.spawn(
                    async move {
                        process_message(&*source, &router, &config, &stats, message).await;
                        drop(permit);
                    }
                    .instrument(span),
                );
            }
        }

        debug!(in_flight = tasks.len(), "Waiting for in-flight messages");
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Message task failed");
            }
        }

        info!(
            received = self.stats.received(),
            completed = self.stats.completed(),
            abandoned = self.stats.abandoned(),
            dead_lettered = self.stats.dead_lettered(),
            "Message pump stopped"
        );
        Ok(())
    }

    /// Waits out the idle delay. Returns `true` if shutdown was requested.
    async fn idle(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => true,
            _ = tokio::time::sleep(self.config.idle_delay()) => false,
        }
    }
}

async fn process_message<S: MessageSource + ?Sized>(
    source: &S,
    router: &MessageRouter,
    config: &PumpConfig,
    stats: &PumpStats,
    message: ReceivedMessage,
) {
    let ReceivedMessage { body, context } = message;
    let outcome = AssertUnwindSafe(router.dispatch(&body, &context))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let message = panic_message(&*panic);
            error!(panic = %message, "Handler panicked");
            Err(format!("handler panicked: {message}").into())
        });

    match &outcome {
        Ok(DispatchOutcome::Matched(matched)) => {
            debug!(handler = %matched.handler(), "Message handled");
        }
        Ok(DispatchOutcome::Unmatched(rejections)) => {
            warn!(rejected = rejections.len(), "No handler matched message");
        }
        Ok(DispatchOutcome::DeserializationFailed(e)) => {
            warn!(error = %e, "Message body could not be decoded");
        }
        Err(e) => {
            warn!(error = %e, "Handler failed");
        }
    }

    let Some(settlement) = settlement_for(&outcome, &context, config) else {
        debug!("Leaving message for the handler to settle");
        return;
    };

    match source.settle(&context, settlement.clone()).await {
        Ok(()) => stats.record(&settlement),
        Err(e) => {
            stats.settle_failures.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, settlement = %settlement, "Failed to settle message");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}

// ============================================================================
// PumpHandle
// ============================================================================

/// Controls a pump started with [`MessagePump::spawn`].
#[derive(Debug)]
pub struct PumpHandle {
    shutdown: CancellationToken,
    stats: Arc<PumpStats>,
    task: JoinHandle<RuntimeResult<()>>,
}

impl PumpHandle {
    /// Returns the pump's counters.
    pub fn stats(&self) -> &PumpStats {
        &self.stats
    }

    /// Returns the token that stops the pump when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Returns `true` once the pump has stopped on its own.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops receiving, waits for in-flight messages and returns the pump's
    /// result.
    pub async fn shutdown(self) -> RuntimeResult<()> {
        self.shutdown.cancel();
        self.join().await
    }

    /// Waits for the pump to stop without requesting it.
    pub async fn join(self) -> RuntimeResult<()> {
        self.task
            .await
            .map_err(|e| RuntimeError::PumpTask(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryQueue;
    use async_trait::async_trait;
    use conduit_core::{
        EntityKind, MatchSource, MatchedHandler, MessageContext, RejectReason, Rejection,
    };
    use conduit_framework::{
        FallbackRegistration, HandlerCollection, MessageHandler, Registration, fallback_fn,
        handler_fn,
    };
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Order {
        order_id: u64,
    }

    fn config() -> PumpConfig {
        PumpConfig {
            entity_path: "orders".into(),
            max_concurrent_calls: 4,
            prefetch: 8,
            max_delivery_count: 3,
            idle_delay_ms: 5,
            ..Default::default()
        }
    }

    fn queue_context(delivery_count: u32) -> QueueMessageContext {
        QueueMessageContext::new(
            MessageContext::new("msg-1", "job-1"),
            "orders",
            EntityKind::Queue,
        )
        .with_delivery_count(delivery_count)
    }

    fn order_router() -> MessageRouter {
        MessageRouter::new(
            HandlerCollection::new()
                .with(Registration::<Order, QueueMessageContext>::builder().name("orders").factory(
                    || {
                        handler_fn(|_: Order, _: QueueMessageContext| async {
                            Ok::<(), HandlerError>(())
                        })
                    },
                ))
                .unwrap(),
        )
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_settlement_for_matched() {
        let matched: Result<_, HandlerError> = Ok(DispatchOutcome::Matched(MatchedHandler::new(
            "orders",
            MatchSource::Registration { index: 0 },
            (),
        )));

        assert_eq!(
            settlement_for(&matched, &queue_context(1), &config()),
            Some(Settlement::Complete)
        );

        let manual = PumpConfig {
            auto_complete: false,
            ..config()
        };
        assert_eq!(settlement_for(&matched, &queue_context(1), &manual), None);
    }

    #[test]
    fn test_settlement_for_unmatched() {
        let unmatched: Result<_, HandlerError> = Ok(DispatchOutcome::Unmatched(vec![
            Rejection::new("orders", RejectReason::BodyFilter),
        ]));

        let settlement = settlement_for(&unmatched, &queue_context(1), &config()).unwrap();
        assert!(
            matches!(settlement, Settlement::DeadLetter { ref reason, .. } if reason == REASON_NO_HANDLER)
        );

        for (action, expected) in [
            (UnmatchedAction::Abandon, Settlement::Abandon),
            (UnmatchedAction::Complete, Settlement::Complete),
        ] {
            let config = PumpConfig {
                unmatched_action: action,
                ..config()
            };
            assert_eq!(
                settlement_for(&unmatched, &queue_context(1), &config),
                Some(expected)
            );
        }
    }

    #[test]
    fn test_requested_settlement_wins() {
        let failed: Result<DispatchOutcome, HandlerError> = Err("boom".into());
        let context = queue_context(1);
        context.settler().dead_letter("Poison", "rejected by handler");

        assert_eq!(
            settlement_for(&failed, &context, &config()),
            Some(Settlement::dead_letter("Poison", "rejected by handler"))
        );
    }

    #[test]
    fn test_settlement_for_handler_error() {
        let failed: Result<DispatchOutcome, HandlerError> = Err("boom".into());

        assert_eq!(
            settlement_for(&failed, &queue_context(2), &config()),
            Some(Settlement::Abandon)
        );
        assert_eq!(
            settlement_for(&failed, &queue_context(3), &config()),
            Some(Settlement::dead_letter(REASON_MAX_DELIVERY, "boom"))
        );
    }

    #[tokio::test]
    async fn test_matched_messages_are_completed() {
        let queue = Arc::new(InMemoryQueue::new("orders", "job-1"));
        let first = queue.send_json(&Order { order_id: 1 }).unwrap();
        let second = queue.send_json(&Order { order_id: 2 }).unwrap();

        let handle = MessagePump::new(Arc::clone(&queue), order_router(), config()).spawn();
        wait_until(|| queue.completed().len() == 2).await;
        handle.shutdown().await.unwrap();

        let mut completed = queue.completed();
        completed.sort();
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(completed, expected);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_messages_are_dead_lettered() {
        let queue = Arc::new(InMemoryQueue::new("orders", "job-1"));
        let id = queue.send("not an order");

        let pump = MessagePump::new(Arc::clone(&queue), order_router(), config());
        let stats = pump.stats();
        let handle = pump.spawn();
        wait_until(|| stats.dead_lettered() == 1).await;
        handle.shutdown().await.unwrap();

        let dead = queue.dead_lettered();
        assert_eq!(dead[0].message_id, id);
        assert_eq!(dead[0].reason, REASON_NO_HANDLER);
        assert_eq!(stats.received(), 1);
    }

    #[tokio::test]
    async fn test_fallback_messages_are_completed() {
        let queue = Arc::new(InMemoryQueue::new("orders", "job-1"));
        let id = queue.send("not an order");

        let mut handlers = HandlerCollection::new();
        handlers
            .set_fallback(
                FallbackRegistration::builder()
                    .factory(|| fallback_fn(|_, _| async { Ok::<(), HandlerError>(()) })),
            )
            .unwrap();

        let handle =
            MessagePump::new(Arc::clone(&queue), MessageRouter::new(handlers), config()).spawn();
        wait_until(|| !queue.completed().is_empty()).await;
        handle.shutdown().await.unwrap();

        assert_eq!(queue.completed(), vec![id]);
    }

    #[tokio::test]
    async fn test_failing_handler_is_retried_then_dead_lettered() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&attempts);
        let router = MessageRouter::new(
            HandlerCollection::new()
                .with(Registration::<Order, QueueMessageContext>::builder().factory(move || {
                    let a = Arc::clone(&a);
                    handler_fn(move |_: Order, _: QueueMessageContext| {
                        a.fetch_add(1, Ordering::SeqCst);
                        async { Err::<(), HandlerError>("warehouse unavailable".into()) }
                    })
                }))
                .unwrap(),
        );
        let queue = Arc::new(InMemoryQueue::new("orders", "job-1"));
        queue.send_json(&Order { order_id: 1 }).unwrap();

        let pump = MessagePump::new(Arc::clone(&queue), router, config());
        let stats = pump.stats();
        let handle = pump.spawn();
        wait_until(|| stats.dead_lettered() == 1).await;
        handle.shutdown().await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(stats.abandoned(), 2);
        let dead = queue.dead_lettered();
        assert_eq!(dead[0].reason, REASON_MAX_DELIVERY);
        assert_eq!(dead[0].description, "warehouse unavailable");
        assert_eq!(dead[0].delivery_count, 3);
    }

    struct Exploding;

    #[async_trait]
    impl MessageHandler<Order, QueueMessageContext> for Exploding {
        async fn process(&self, _: &Order, _: &QueueMessageContext) -> Result<(), HandlerError> {
            panic!("carrier exploded")
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_is_retried_then_dead_lettered() {
        let router = MessageRouter::new(
            HandlerCollection::new()
                .with(Registration::<Order, QueueMessageContext>::builder().factory(|| Exploding))
                .unwrap(),
        );
        let queue = Arc::new(InMemoryQueue::new("orders", "job-1"));
        let id = queue.send_json(&Order { order_id: 1 }).unwrap();

        let pump = MessagePump::new(Arc::clone(&queue), router, config());
        let stats = pump.stats();
        let handle = pump.spawn();
        wait_until(|| stats.dead_lettered() == 1).await;
        handle.shutdown().await.unwrap();

        assert_eq!(stats.abandoned(), 2);
        assert_eq!(queue.in_flight(), 0);
        let dead = queue.dead_lettered();
        assert_eq!(dead[0].message_id, id);
        assert_eq!(dead[0].reason, REASON_MAX_DELIVERY);
        assert_eq!(dead[0].description, "handler panicked: carrier exploded");
        assert_eq!(dead[0].delivery_count, 3);
    }

    #[tokio::test]
    async fn test_handler_settles_when_auto_complete_is_off() {
        let router = MessageRouter::new(
            HandlerCollection::new()
                .with(Registration::<Order, QueueMessageContext>::builder().factory(|| {
                    handler_fn(|order: Order, ctx: QueueMessageContext| async move {
                        if order.order_id % 2 == 0 {
                            ctx.settler().complete();
                        } else {
                            ctx.settler().dead_letter("OddOrder", "odd ids are not shipped");
                        }
                        Ok::<(), HandlerError>(())
                    })
                }))
                .unwrap(),
        );
        let queue = Arc::new(InMemoryQueue::new("orders", "job-1"));
        let even = queue.send_json(&Order { order_id: 2 }).unwrap();
        let odd = queue.send_json(&Order { order_id: 3 }).unwrap();

        let manual = PumpConfig {
            auto_complete: false,
            ..config()
        };
        let pump = MessagePump::new(Arc::clone(&queue), router, manual);
        let stats = pump.stats();
        let handle = pump.spawn();
        wait_until(|| stats.completed() + stats.dead_lettered() == 2).await;
        handle.shutdown().await.unwrap();

        assert_eq!(queue.completed(), vec![even]);
        let dead = queue.dead_lettered();
        assert_eq!(dead[0].message_id, odd);
        assert_eq!(dead[0].reason, "OddOrder");
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_unsettled_message_is_redelivered_after_lock_expiry() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&attempts);
        let router = MessageRouter::new(
            HandlerCollection::new()
                .with(Registration::<Order, QueueMessageContext>::builder().factory(move || {
                    let a = Arc::clone(&a);
                    handler_fn(move |_: Order, ctx: QueueMessageContext| {
                        a.fetch_add(1, Ordering::SeqCst);
                        // Only the redelivery settles.
                        if ctx.delivery_count > 1 {
                            ctx.settler().complete();
                        }
                        async { Ok::<(), HandlerError>(()) }
                    })
                }))
                .unwrap(),
        );
        let queue = Arc::new(
            InMemoryQueue::new("orders", "job-1").with_lock_duration(Duration::from_millis(50)),
        );
        let id = queue.send_json(&Order { order_id: 1 }).unwrap();

        let manual = PumpConfig {
            auto_complete: false,
            ..config()
        };
        let handle = MessagePump::new(Arc::clone(&queue), router, manual).spawn();
        wait_until(|| !queue.completed().is_empty()).await;
        handle.shutdown().await.unwrap();

        assert_eq!(queue.completed(), vec![id]);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    struct Tracking {
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MessageHandler<Order, QueueMessageContext> for Tracking {
        async fn process(&self, _: &Order, _: &QueueMessageContext) -> Result<(), HandlerError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (c, p) = (Arc::clone(&current), Arc::clone(&peak));
        let router = MessageRouter::new(
            HandlerCollection::new()
                .with(Registration::<Order, QueueMessageContext>::builder().factory(move || {
                    Tracking {
                        current: Arc::clone(&c),
                        peak: Arc::clone(&p),
                    }
                }))
                .unwrap(),
        );
        let queue = Arc::new(InMemoryQueue::new("orders", "job-1"));
        for order_id in 0..10 {
            queue.send_json(&Order { order_id }).unwrap();
        }

        let config = PumpConfig {
            max_concurrent_calls: 2,
            ..config()
        };
        let handle = MessagePump::new(Arc::clone(&queue), router, config).spawn();
        wait_until(|| queue.completed().len() == 10).await;
        handle.shutdown().await.unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_messages() {
        let queue = Arc::new(InMemoryQueue::new("orders", "job-1"));
        queue.send_json(&Order { order_id: 1 }).unwrap();

        let router = MessageRouter::new(
            HandlerCollection::new()
                .with(Registration::<Order, QueueMessageContext>::builder().factory(|| {
                    handler_fn(|_: Order, ctx: QueueMessageContext| async move {
                        // Blocks until the pump starts shutting down.
                        ctx.cancellation_token().cancelled().await;
                        Ok::<(), HandlerError>(())
                    })
                }))
                .unwrap(),
        );

        let handle = MessagePump::new(Arc::clone(&queue), router, config()).spawn();
        wait_until(|| queue.in_flight() == 1).await;
        handle.shutdown().await.unwrap();

        assert_eq!(queue.completed().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_source_stops_pump() {
        let queue = Arc::new(InMemoryQueue::new("orders", "job-1"));
        queue.close();

        let handle = MessagePump::new(Arc::clone(&queue), order_router(), config()).spawn();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .expect("pump did not stop")
            .unwrap();
    }
}
