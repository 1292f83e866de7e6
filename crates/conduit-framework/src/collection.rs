//! The ordered set of handler registrations.
//!
//! A [`HandlerCollection`] is filled by the composition root during startup
//! and then handed to a [`MessageRouter`](crate::router::MessageRouter).
//! Insertion order is match priority: the first registration added is the
//! first one tried.
//!
//! ```rust,ignore
//! let mut handlers = HandlerCollection::new();
//! handlers
//!     .add(Registration::<Order, QueueMessageContext>::builder().factory(ShipOrder::new))?
//!     .add(Registration::<Refund, QueueMessageContext>::builder().factory(IssueRefund::new))?
//!     .set_fallback(FallbackRegistration::builder().factory(ParkMessage::new))?;
//! ```

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use conduit_core::{ConfigurationResult, Context, FromContext};

use crate::registration::{FallbackBuilder, FallbackRegistration, RegistrationBuilder, Route};

/// An ordered collection of registrations plus at most one fallback.
///
/// Cloning is cheap: registrations are shared behind `Arc`s, which lets the
/// router publish copy-on-write snapshots.
#[derive(Clone, Default)]
pub struct HandlerCollection {
    routes: Vec<Arc<dyn Route>>,
    fallback: Option<Arc<FallbackRegistration>>,
}

impl HandlerCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            fallback: None,
        }
    }

    /// Validates and appends a registration.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigurationError`](conduit_core::ConfigurationError)
    /// from [`RegistrationBuilder::build`]; the collection is left unchanged.
    pub fn add<M, C>(&mut self, registration: RegistrationBuilder<M, C>) -> ConfigurationResult<&mut Self>
    where
        M: DeserializeOwned + Send + Sync + 'static,
        C: FromContext,
    {
        let registration = registration.build()?;
        self.routes.push(Arc::new(registration));
        Ok(self)
    }

    /// Validates and appends a registration (builder pattern).
    pub fn with<M, C>(mut self, registration: RegistrationBuilder<M, C>) -> ConfigurationResult<Self>
    where
        M: DeserializeOwned + Send + Sync + 'static,
        C: FromContext,
    {
        self.add(registration)?;
        Ok(self)
    }

    /// Appends an already validated route.
    pub fn add_route(&mut self, route: Arc<dyn Route>) -> &mut Self {
        self.routes.push(route);
        self
    }

    /// Sets the fallback, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingFactory`](conduit_core::ConfigurationError::MissingFactory)
    /// when the builder has no factory; the previous fallback is kept.
    pub fn set_fallback(&mut self, fallback: FallbackBuilder) -> ConfigurationResult<&mut Self> {
        let fallback = fallback.build()?;
        Ok(self.replace_fallback(Arc::new(fallback)))
    }

    /// Installs an already validated fallback, replacing any previous one.
    pub fn replace_fallback(&mut self, fallback: Arc<FallbackRegistration>) -> &mut Self {
        self.fallback = Some(fallback);
        self
    }

    /// Returns the registrations compatible with the given context, in
    /// insertion order, paired with their insertion index.
    ///
    /// The iterator is lazy and can be cloned to restart it.
    pub fn registrations_for<'a>(
        &'a self,
        ctx: &'a dyn Context,
    ) -> impl Iterator<Item = (usize, &'a Arc<dyn Route>)> + Clone + 'a {
        self.routes
            .iter()
            .enumerate()
            .filter(move |(_, route)| route.accepts(ctx))
    }

    /// Returns every registration in insertion order.
    pub fn routes(&self) -> &[Arc<dyn Route>] {
        &self.routes
    }

    /// Returns the fallback registration, if one is set.
    pub fn fallback(&self) -> Option<&FallbackRegistration> {
        self.fallback.as_deref()
    }

    /// Returns `true` if a fallback is set.
    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Returns the number of primary registrations.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if there are no primary registrations.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl fmt::Debug for HandlerCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerCollection")
            .field(
                "routes",
                &self.routes.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field("fallback", &self.fallback.as_ref().map(|f| f.name()))
            .finish()
    }
}
