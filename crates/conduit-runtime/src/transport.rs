//! The boundary between the message pump and a queueing system.
//!
//! A [`MessageSource`] hands out peek-locked messages and accepts a
//! [`Settlement`] for each one. [`InMemoryQueue`] is a complete source backed
//! by a tokio channel, used by tests and local runs. Its locks expire, so a
//! message nobody settles is delivered again.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use conduit_core::{EntityKind, MessageContext, QueueMessageContext, Settlement};

use crate::config::PumpConfig;
use crate::error::TransportError;

// ============================================================================
// Source Contract
// ============================================================================

/// A message fetched from a source, still locked.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// The raw body.
    pub body: Vec<u8>,
    /// Metadata, including the lock token used to settle the message.
    pub context: QueueMessageContext,
}

/// A queue or subscription the pump reads from.
#[async_trait]
pub trait MessageSource: Send + Sync + 'static {
    /// Fetches up to `max` locked messages.
    ///
    /// An empty batch means the source is idle. [`TransportError::Closed`]
    /// ends the pump.
    async fn receive(&self, max: usize) -> Result<Vec<ReceivedMessage>, TransportError>;

    /// Settles a message previously returned by [`receive`](Self::receive).
    async fn settle(
        &self,
        context: &QueueMessageContext,
        settlement: Settlement,
    ) -> Result<(), TransportError>;
}

// ============================================================================
// In-Memory Queue
// ============================================================================

/// A message waiting in the queue.
#[derive(Debug, Clone)]
struct Envelope {
    body: Vec<u8>,
    base: MessageContext,
    delivery_count: u32,
}

/// A delivered message and when its lock runs out.
#[derive(Debug)]
struct Lock {
    envelope: Envelope,
    expires_at: Instant,
}

/// A message that was moved to the dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetteredMessage {
    /// Id of the message.
    pub message_id: String,
    /// The raw body.
    pub body: Vec<u8>,
    /// Reason given at settlement.
    pub reason: String,
    /// Description given at settlement.
    pub description: String,
    /// Deliveries before it was dead-lettered.
    pub delivery_count: u32,
}

/// A [`MessageSource`] kept entirely in memory.
///
/// Delivered messages stay locked until settled or until the lock expires.
/// Abandoned and expired messages go back to the end of the queue with their
/// delivery count incremented.
pub struct InMemoryQueue {
    entity_path: String,
    job_id: String,
    lock_duration: Duration,
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    locked: Mutex<HashMap<String, Lock>>,
    completed: Mutex<Vec<String>>,
    dead_letters: Mutex<Vec<DeadLetteredMessage>>,
    closed: AtomicBool,
}

impl InMemoryQueue {
    /// Default time a delivered message stays locked.
    pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(30);

    /// Creates an empty queue.
    pub fn new(entity_path: impl Into<String>, job_id: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            entity_path: entity_path.into(),
            job_id: job_id.into(),
            lock_duration: Self::DEFAULT_LOCK_DURATION,
            tx,
            rx: Mutex::new(rx),
            locked: Mutex::new(HashMap::new()),
            completed: Mutex::new(Vec::new()),
            dead_letters: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Creates an empty queue named after the pump configuration.
    pub fn from_config(config: &PumpConfig) -> Self {
        Self::new(&config.entity_path, &config.job_id).with_lock_duration(config.lock_duration())
    }

    /// Sets how long a delivered message stays locked (builder pattern).
    pub fn with_lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = lock_duration;
        self
    }

    /// Returns the queue name.
    pub fn entity_path(&self) -> &str {
        &self.entity_path
    }

    /// Enqueues a raw body and returns the generated message id.
    pub fn send(&self, body: impl Into<Vec<u8>>) -> String {
        let message_id = Uuid::new_v4().to_string();
        self.send_with(body, MessageContext::new(message_id.clone(), self.job_id.clone()));
        message_id
    }

    /// Serializes a value as JSON and enqueues it.
    pub fn send_json<T: Serialize>(&self, value: &T) -> serde_json::Result<String> {
        Ok(self.send(serde_json::to_vec(value)?))
    }

    /// Enqueues a raw body with caller-supplied metadata.
    pub fn send_with(&self, body: impl Into<Vec<u8>>, context: MessageContext) {
        trace!(message_id = %context.message_id, queue = %self.entity_path, "Enqueued message");
        // The receiver lives as long as `self`, so sending cannot fail.
        let _ = self.tx.send(Envelope {
            body: body.into(),
            base: context,
            delivery_count: 1,
        });
    }

    /// Stops delivering. Pending messages stay in the queue.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Number of messages waiting to be delivered.
    pub fn pending(&self) -> usize {
        self.rx.lock().len()
    }

    /// Number of delivered messages not yet settled.
    pub fn in_flight(&self) -> usize {
        self.locked.lock().len()
    }

    /// Ids of completed messages, in settlement order.
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }

    /// Dead-lettered messages, in settlement order.
    pub fn dead_lettered(&self) -> Vec<DeadLetteredMessage> {
        self.dead_letters.lock().clone()
    }

    fn deliver(&self, envelope: Envelope) -> ReceivedMessage {
        let lock_token = Uuid::new_v4().to_string();
        let context = QueueMessageContext::new(
            envelope.base.clone(),
            self.entity_path.clone(),
            EntityKind::Queue,
        )
        .with_delivery_count(envelope.delivery_count)
        .with_lock_token(lock_token.clone());

        let body = envelope.body.clone();
        self.locked.lock().insert(
            lock_token,
            Lock {
                envelope,
                expires_at: Instant::now() + self.lock_duration,
            },
        );

        ReceivedMessage { body, context }
    }

    /// Requeues every message whose lock ran out.
    fn release_expired_locks(&self) {
        let now = Instant::now();
        let mut locked = self.locked.lock();
        let expired: Vec<String> = locked
            .iter()
            .filter(|(_, lock)| lock.expires_at <= now)
            .map(|(token, _)| token.clone())
            .collect();

        for token in expired {
            if let Some(Lock { envelope, .. }) = locked.remove(&token) {
                warn!(
                    message_id = %envelope.base.message_id,
                    delivery_count = envelope.delivery_count,
                    "Message lock expired, redelivering"
                );
                self.requeue(envelope);
            }
        }
    }

    fn requeue(&self, envelope: Envelope) {
        let _ = self.tx.send(Envelope {
            delivery_count: envelope.delivery_count + 1,
            ..envelope
        });
    }
}

impl fmt::Debug for InMemoryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryQueue")
            .field("entity_path", &self.entity_path)
            .field("pending", &self.pending())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageSource for InMemoryQueue {
    async fn receive(&self, max: usize) -> Result<Vec<ReceivedMessage>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        self.release_expired_locks();

        let mut envelopes = Vec::new();
        {
            let mut rx = self.rx.lock();
            while envelopes.len() < max {
                match rx.try_recv() {
                    Ok(envelope) => envelopes.push(envelope),
                    Err(_) => break,
                }
            }
        }

        Ok(envelopes.into_iter().map(|e| self.deliver(e)).collect())
    }

    async fn settle(
        &self,
        context: &QueueMessageContext,
        settlement: Settlement,
    ) -> Result<(), TransportError> {
        let Lock { envelope, .. } = context
            .lock_token
            .as_ref()
            .and_then(|token| self.locked.lock().remove(token))
            .ok_or_else(|| TransportError::LockLost {
                message_id: context.message_id.clone(),
            })?;

        debug!(
            message_id = %context.message_id,
            settlement = %settlement,
            delivery_count = envelope.delivery_count,
            "Settled message"
        );

        match settlement {
            Settlement::Complete => self.completed.lock().push(envelope.base.message_id),
            Settlement::Abandon => self.requeue(envelope),
            Settlement::DeadLetter {
                reason,
                description,
            } => self.dead_letters.lock().push(DeadLetteredMessage {
                message_id: envelope.base.message_id,
                body: envelope.body,
                reason,
                description,
                delivery_count: envelope.delivery_count,
            }),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receive_respects_max() {
        let queue = InMemoryQueue::new("orders", "job-1");
        for i in 0..5 {
            queue.send(format!("{i}"));
        }

        let batch = queue.receive(3).await.unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].body, b"0");
        assert_eq!(queue.pending(), 2);
        assert_eq!(queue.in_flight(), 3);
    }

    #[tokio::test]
    async fn test_delivered_context() {
        let queue = InMemoryQueue::new("orders", "job-1");
        let id = queue.send("{}");

        let message = queue.receive(1).await.unwrap().remove(0);

        assert_eq!(message.context.message_id, id);
        assert_eq!(message.context.job_id, "job-1");
        assert_eq!(message.context.entity_path, "orders");
        assert_eq!(message.context.delivery_count, 1);
        assert!(message.context.lock_token.is_some());
    }

    #[tokio::test]
    async fn test_idle_queue_returns_empty_batch() {
        let queue = InMemoryQueue::new("orders", "job-1");
        assert!(queue.receive(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_complete() {
        let queue = InMemoryQueue::new("orders", "job-1");
        let id = queue.send("{}");
        let message = queue.receive(1).await.unwrap().remove(0);

        queue.settle(&message.context, Settlement::Complete).await.unwrap();

        assert_eq!(queue.completed(), vec![id]);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_abandon_redelivers_with_higher_count() {
        let queue = InMemoryQueue::new("orders", "job-1");
        let id = queue.send("{}");
        let first = queue.receive(1).await.unwrap().remove(0);

        queue.settle(&first.context, Settlement::Abandon).await.unwrap();
        let second = queue.receive(1).await.unwrap().remove(0);

        assert_eq!(second.context.message_id, id);
        assert_eq!(second.context.delivery_count, 2);
        assert_ne!(second.context.lock_token, first.context.lock_token);
    }

    #[tokio::test]
    async fn test_dead_letter() {
        let queue = InMemoryQueue::new("orders", "job-1");
        let id = queue.send("garbage");
        let message = queue.receive(1).await.unwrap().remove(0);

        queue
            .settle(
                &message.context,
                Settlement::dead_letter("NoHandlerMatched", "0 candidates"),
            )
            .await
            .unwrap();

        let dead = queue.dead_lettered();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message_id, id);
        assert_eq!(dead[0].body, b"garbage");
        assert_eq!(dead[0].reason, "NoHandlerMatched");
    }

    #[tokio::test]
    async fn test_settle_twice_loses_lock() {
        let queue = InMemoryQueue::new("orders", "job-1");
        queue.send("{}");
        let message = queue.receive(1).await.unwrap().remove(0);

        queue.settle(&message.context, Settlement::Complete).await.unwrap();
        let err = queue
            .settle(&message.context, Settlement::Complete)
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::LockLost { .. }));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_expired_lock_is_redelivered() {
        let queue = InMemoryQueue::new("orders", "job-1").with_lock_duration(Duration::from_secs(5));
        let id = queue.send("{}");
        let first = queue.receive(1).await.unwrap().remove(0);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(queue.receive(1).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        let second = queue.receive(1).await.unwrap().remove(0);

        assert_eq!(second.context.message_id, id);
        assert_eq!(second.context.delivery_count, 2);
        assert_eq!(queue.in_flight(), 1);

        // The stale lock token no longer settles anything.
        let err = queue
            .settle(&first.context, Settlement::Complete)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::LockLost { .. }));
        queue.settle(&second.context, Settlement::Complete).await.unwrap();
        assert_eq!(queue.completed(), vec![id]);
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let queue = InMemoryQueue::new("orders", "job-1");
        queue.close();

        assert_eq!(queue.receive(1).await.unwrap_err(), TransportError::Closed);
    }
}
