//! Message settlement.
//!
//! A [`Settlement`] is the final disposition of one delivered message. The
//! pump settles on the handler's behalf unless the handler asks for a
//! specific outcome through the [`MessageSettler`] carried on its
//! [`QueueMessageContext`](crate::QueueMessageContext):
//!
//! ```rust,ignore
//! async fn process(&self, order: &Order, ctx: &QueueMessageContext) -> Result<(), HandlerError> {
//!     if order.amount == 0 {
//!         ctx.settler().dead_letter("EmptyOrder", "orders must carry an amount");
//!         return Ok(());
//!     }
//!     ship(order).await?;
//!     ctx.settler().complete();
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// The final disposition of a delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Remove the message from the queue.
    Complete,
    /// Release the lock; the message will be delivered again.
    Abandon,
    /// Move the message to the dead-letter queue.
    DeadLetter {
        /// Short machine-readable reason.
        reason: String,
        /// Human-readable details.
        description: String,
    },
}

impl Settlement {
    /// Creates a dead-letter settlement.
    pub fn dead_letter(reason: impl Into<String>, description: impl Into<String>) -> Self {
        Self::DeadLetter {
            reason: reason.into(),
            description: description.into(),
        }
    }

    /// Returns the settlement name, for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Abandon => "abandon",
            Self::DeadLetter { .. } => "dead-letter",
        }
    }
}

impl fmt::Display for Settlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records the settlement a handler asks for.
///
/// Clones share one slot, so a handler holding a cloned context settles the
/// same message. The first request wins; later ones are ignored and return
/// `false`. The request is applied by the pump once the handler returns,
/// and it takes precedence over the pump's own policy.
#[derive(Clone, Default)]
pub struct MessageSettler {
    slot: Arc<Mutex<Option<Settlement>>>,
}

impl MessageSettler {
    /// Creates a settler with nothing requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks for the message to be completed.
    pub fn complete(&self) -> bool {
        self.request(Settlement::Complete)
    }

    /// Asks for the message to be released for redelivery.
    pub fn abandon(&self) -> bool {
        self.request(Settlement::Abandon)
    }

    /// Asks for the message to be dead-lettered.
    pub fn dead_letter(&self, reason: impl Into<String>, description: impl Into<String>) -> bool {
        self.request(Settlement::dead_letter(reason, description))
    }

    /// Records `settlement` unless one was already requested.
    pub fn request(&self, settlement: Settlement) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(settlement);
        true
    }

    /// Returns the requested settlement, if any.
    pub fn requested(&self) -> Option<Settlement> {
        self.slot.lock().clone()
    }

    /// Whether a settlement was requested.
    pub fn is_requested(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl fmt::Debug for MessageSettler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSettler")
            .field("requested", &*self.slot.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_wins() {
        let settler = MessageSettler::new();

        assert!(settler.dead_letter("Poison", "bad amount"));
        assert!(!settler.complete());
        assert_eq!(
            settler.requested(),
            Some(Settlement::dead_letter("Poison", "bad amount"))
        );
    }

    #[test]
    fn test_clones_share_the_request() {
        let settler = MessageSettler::new();
        let handler_copy = settler.clone();

        assert!(!settler.is_requested());
        handler_copy.abandon();

        assert_eq!(settler.requested(), Some(Settlement::Abandon));
    }
}
