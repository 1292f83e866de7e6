//! # Conduit Framework
//!
//! Handler registration and message routing.
//!
//! This layer provides:
//! - Handler traits for typed messages and for the fallback
//! - Registrations binding a payload type, a context type, optional paired
//!   filters and a handler factory
//! - An ordered [`HandlerCollection`] built once during startup
//! - The [`MessageRouter`], which picks the first matching registration for
//!   each message
//!
//! The router selects; it does not retry. Handler errors reach the transport
//! unchanged.
//!
//! ```rust,ignore
//! use conduit_framework::{HandlerCollection, MessageRouter, Registration};
//!
//! let mut handlers = HandlerCollection::new();
//! handlers.add(Registration::<Order, MessageContext>::builder().factory(ShipOrder::new))?;
//!
//! let router = MessageRouter::new(handlers);
//! let outcome = router.dispatch(body, &ctx).await?;
//! ```

pub mod collection;
pub mod handler;
pub mod registration;
pub mod router;

pub use collection::HandlerCollection;
pub use handler::{FallbackFn, FallbackHandler, HandlerFn, MessageHandler, fallback_fn, handler_fn};
pub use registration::{
    BodyFilter, ContextFilter, FallbackBuilder, FallbackFactory, FallbackRegistration, Filters,
    HandlerFactory, Registration, RegistrationBuilder, Route,
};
pub use router::{InboundMessage, MessageRouter};
