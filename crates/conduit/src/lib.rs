//! # Conduit
//!
//! Typed message handler routing for queue and topic consumers.
//!
//! ## Overview
//!
//! A consumer that receives many kinds of messages on one queue needs to pick
//! the right handler for each body. Conduit lets you register handlers per
//! payload type, guard them with paired context and body filters, and add a
//! fallback for everything else. The router tries registrations in the order
//! they were added and picks the first that accepts the message.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌──────────────────────────────┐
//! │ MessagePump  │────▶│ MessageRouter  │────▶│ Registration 0 (Order)       │
//! │ (source)     │     │  first match   │────▶│ Registration 1 (Refund)      │
//! │              │◀────│  wins          │────▶│ ...                          │
//! └──────────────┘     └────────────────┘     │ Fallback (raw body)          │
//!   settles by outcome                        └──────────────────────────────┘
//! ```
//!
//! - **Core**: contexts, serializers, outcomes and errors
//! - **Framework**: handlers, registrations, the collection and the router
//! - **Runtime**: configuration, logging, the transport boundary and the pump
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use conduit::prelude::*;
//!
//! #[derive(Deserialize)]
//! struct Order { order_id: u64 }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::new().load()?;
//!     logging::init_from_config(&config.logging);
//!
//!     let mut handlers = HandlerCollection::new();
//!     handlers.add(
//!         Registration::<Order, QueueMessageContext>::builder()
//!             .factory(|| handler_fn(|order: Order, _ctx| async move {
//!                 info!(order_id = order.order_id, "Shipping");
//!                 Ok(())
//!             })),
//!     )?;
//!
//!     let queue = Arc::new(InMemoryQueue::from_config(&config.pump));
//!     let handle = MessagePump::new(queue, MessageRouter::new(handlers), config.pump).spawn();
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use conduit_core as core;
pub use conduit_framework as framework;
pub use conduit_runtime as runtime;

pub use conduit_runtime::logging;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use conduit::prelude::*;
/// ```
pub mod prelude {
    // Contexts and outcomes
    pub use conduit_core::{
        CancellationToken, Context, DispatchOutcome, EntityKind, HandlerError, MessageContext,
        MessageSettler, QueueMessageContext,
    };

    // Serialization
    pub use conduit_core::{BodySerializer, JsonSerializer, serializer_fn};

    // Handlers and routing
    pub use conduit_framework::{
        FallbackHandler, FallbackRegistration, HandlerCollection, MessageHandler, MessageRouter,
        Registration, fallback_fn, handler_fn,
    };

    // Hosting
    pub use conduit_runtime::{
        ConduitConfig, ConfigLoader, InMemoryQueue, MessagePump, MessageSource, PumpHandle,
        Settlement,
    };

    // Logging macros
    pub use conduit_runtime::prelude::*;
}
