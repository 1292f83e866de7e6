//! Handler registrations.
//!
//! A [`Registration<M, C>`] binds a payload type `M` and a context type `C` to
//! a handler factory, optionally guarded by a pair of filters and a custom body
//! serializer. Registrations are immutable once built.
//!
//! # Filters
//!
//! Filters come in pairs: either both a context filter and a body filter are
//! supplied, or neither is. The builder accepts them one at a time for
//! convenience, and [`RegistrationBuilder::build`] rejects a half-specified
//! pair with a [`ConfigurationError`] naming the missing side.
//!
//! ```rust,ignore
//! let registration = Registration::<Order, QueueMessageContext>::builder()
//!     .name("large-orders")
//!     .context_filter(|ctx| ctx.property_str("type") == Some("order"))
//!     .body_filter(|order| order.amount > 100)
//!     .factory(|| ShipOrder::new())
//!     .build()?;
//! ```
//!
//! # Routing one candidate
//!
//! [`Route::try_handle`] runs the gates for a single registration, in order:
//!
//! 1. context filter (no deserialization when it fails)
//! 2. deserialization through the override serializer, or [`JsonSerializer`]
//! 3. body filter
//! 4. handler construction through the factory, then processing

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::trace;

use conduit_core::{
    BodySerializer, ConfigurationError, ConfigurationResult, Context, DeserializeResult,
    DispatchOutcome, FromContext, HandlerError, JsonSerializer, MatchSource, MatchedHandler,
    RejectReason, Rejection,
};

use crate::handler::{FallbackHandler, MessageHandler};

/// A type-erased context filter.
pub type ContextFilter<C> = Arc<dyn Fn(&C) -> bool + Send + Sync>;

/// A type-erased body filter.
pub type BodyFilter<M> = Arc<dyn Fn(&M) -> bool + Send + Sync>;

/// A type-erased factory producing a fresh handler per matched message.
pub type HandlerFactory<M, C> = Arc<dyn Fn() -> Box<dyn MessageHandler<M, C>> + Send + Sync>;

/// A type-erased factory producing a fresh fallback handler.
pub type FallbackFactory = Arc<dyn Fn() -> Box<dyn FallbackHandler> + Send + Sync>;

// ============================================================================
// Filters
// ============================================================================

/// The filters guarding a registration.
///
/// There is no variant carrying only one filter.
pub enum Filters<M, C> {
    /// Accept every compatible message.
    None,
    /// Accept only messages passing both filters.
    Both {
        /// Evaluated first, on metadata only.
        context: ContextFilter<C>,
        /// Evaluated on the deserialized payload.
        body: BodyFilter<M>,
    },
}

impl<M, C> Filters<M, C> {
    /// Creates a filter pair.
    pub fn both<CF, BF>(context: CF, body: BF) -> Self
    where
        CF: Fn(&C) -> bool + Send + Sync + 'static,
        BF: Fn(&M) -> bool + Send + Sync + 'static,
    {
        Self::Both {
            context: Arc::new(context),
            body: Arc::new(body),
        }
    }

    fn accepts_context(&self, ctx: &C) -> bool {
        match self {
            Self::None => true,
            Self::Both { context, .. } => context(ctx),
        }
    }

    fn accepts_body(&self, message: &M) -> bool {
        match self {
            Self::None => true,
            Self::Both { body, .. } => body(message),
        }
    }
}

impl<M, C> Clone for Filters<M, C> {
    fn clone(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Both { context, body } => Self::Both {
                context: Arc::clone(context),
                body: Arc::clone(body),
            },
        }
    }
}

impl<M, C> fmt::Debug for Filters<M, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Both { .. } => f.write_str("Both"),
        }
    }
}

// ============================================================================
// Route - the type-erased registration
// ============================================================================

/// A registration with its payload and context types erased.
///
/// This is the single interface the router dispatches through.
#[async_trait]
pub trait Route: Send + Sync {
    /// Name of the registration, used in outcomes and logs.
    fn name(&self) -> &str;

    /// Type name of the payload this registration accepts.
    fn message_type(&self) -> &'static str;

    /// Returns `true` if the incoming context can be viewed as the context
    /// type this registration was declared for.
    fn accepts(&self, ctx: &dyn Context) -> bool;

    /// Runs every gate for this candidate and, on a full match, invokes the
    /// handler.
    ///
    /// Returns [`DispatchOutcome::Unmatched`] with a single rejection when a
    /// filter fails, [`DispatchOutcome::DeserializationFailed`] when the body
    /// does not decode, and the handler's own error unchanged when processing
    /// fails. `index` is recorded in the [`MatchSource`] of a match.
    async fn try_handle(
        &self,
        index: usize,
        body: &[u8],
        ctx: &dyn Context,
    ) -> Result<DispatchOutcome, HandlerError>;
}

// ============================================================================
// Registration
// ============================================================================

/// A validated, immutable handler registration.
pub struct Registration<M, C> {
    name: String,
    filters: Filters<M, C>,
    serializer: Option<Arc<dyn BodySerializer<M>>>,
    factory: HandlerFactory<M, C>,
}

impl<M, C> Registration<M, C>
where
    M: DeserializeOwned + Send + Sync + 'static,
    C: FromContext,
{
    /// Starts building a registration for payload `M` and context `C`.
    pub fn builder() -> RegistrationBuilder<M, C> {
        RegistrationBuilder::new()
    }

    /// Returns the filters guarding this registration.
    pub fn filters(&self) -> &Filters<M, C> {
        &self.filters
    }

    /// Returns `true` if this registration overrides the default serializer.
    pub fn has_serializer_override(&self) -> bool {
        self.serializer.is_some()
    }

    fn deserialize(&self, body: &[u8]) -> DeserializeResult<M> {
        match &self.serializer {
            Some(serializer) => serializer.deserialize(body),
            None => JsonSerializer::new().deserialize(body),
        }
    }
}

impl<M, C> fmt::Debug for Registration<M, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("message_type", &std::any::type_name::<M>())
            .field("context_type", &std::any::type_name::<C>())
            .field("filters", &self.filters)
            .field("serializer_override", &self.serializer.is_some())
            .finish()
    }
}

#[async_trait]
impl<M, C> Route for Registration<M, C>
where
    M: DeserializeOwned + Send + Sync + 'static,
    C: FromContext,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn message_type(&self) -> &'static str {
        std::any::type_name::<M>()
    }

    fn accepts(&self, ctx: &dyn Context) -> bool {
        C::from_context(ctx).is_some()
    }

    async fn try_handle(
        &self,
        index: usize,
        body: &[u8],
        ctx: &dyn Context,
    ) -> Result<DispatchOutcome, HandlerError> {
        let Some(context) = C::from_context(ctx) else {
            return Ok(DispatchOutcome::Unmatched(Vec::new()));
        };

        if !self.filters.accepts_context(context) {
            trace!(handler = %self.name, "Context filter rejected message");
            return Ok(DispatchOutcome::Unmatched(vec![Rejection::new(
                &self.name,
                RejectReason::ContextFilter,
            )]));
        }

        let message = match self.deserialize(body) {
            Ok(message) => message,
            Err(e) => {
                trace!(handler = %self.name, error = %e, "Body does not match payload type");
                return Ok(DispatchOutcome::DeserializationFailed(e));
            }
        };

        if !self.filters.accepts_body(&message) {
            trace!(handler = %self.name, "Body filter rejected message");
            return Ok(DispatchOutcome::Unmatched(vec![Rejection::new(
                &self.name,
                RejectReason::BodyFilter,
            )]));
        }

        let handler = (self.factory)();
        handler.process(&message, context).await?;

        Ok(DispatchOutcome::Matched(MatchedHandler::new(
            self.name.clone(),
            MatchSource::Registration { index },
            message,
        )))
    }
}

// ============================================================================
// RegistrationBuilder
// ============================================================================

/// Builder for [`Registration`].
pub struct RegistrationBuilder<M, C> {
    name: Option<String>,
    handler_type: Option<&'static str>,
    context_filter: Option<ContextFilter<C>>,
    body_filter: Option<BodyFilter<M>>,
    serializer: Option<Arc<dyn BodySerializer<M>>>,
    factory: Option<HandlerFactory<M, C>>,
}

impl<M, C> Default for RegistrationBuilder<M, C>
where
    M: DeserializeOwned + Send + Sync + 'static,
    C: FromContext,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M, C> RegistrationBuilder<M, C>
where
    M: DeserializeOwned + Send + Sync + 'static,
    C: FromContext,
{
    /// Creates an empty builder: no filters, default serializer, no factory.
    pub fn new() -> Self {
        Self {
            name: None,
            handler_type: None,
            context_filter: None,
            body_filter: None,
            serializer: None,
            factory: None,
        }
    }

    /// Sets the registration name.
    ///
    /// Defaults to the handler's type name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the context filter. Requires a body filter as well.
    pub fn context_filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.context_filter = Some(Arc::new(f));
        self
    }

    /// Sets the body filter. Requires a context filter as well.
    pub fn body_filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&M) -> bool + Send + Sync + 'static,
    {
        self.body_filter = Some(Arc::new(f));
        self
    }

    /// Sets both filters at once.
    pub fn filters<CF, BF>(self, context: CF, body: BF) -> Self
    where
        CF: Fn(&C) -> bool + Send + Sync + 'static,
        BF: Fn(&M) -> bool + Send + Sync + 'static,
    {
        self.context_filter(context).body_filter(body)
    }

    /// Overrides the default [`JsonSerializer`] for this registration.
    pub fn serializer<S>(mut self, serializer: S) -> Self
    where
        S: BodySerializer<M> + 'static,
    {
        self.serializer = Some(Arc::new(serializer));
        self
    }

    /// Sets the factory that creates a handler for each matched message.
    ///
    /// The closure captures whatever dependencies the handler needs.
    pub fn factory<H, F>(mut self, factory: F) -> Self
    where
        H: MessageHandler<M, C> + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.handler_type = Some(std::any::type_name::<H>());
        self.factory = Some(Arc::new(move || Box::new(factory()) as Box<dyn MessageHandler<M, C>>));
        self
    }

    /// Uses one shared handler instance for every matched message.
    pub fn handler<H>(self, handler: H) -> Self
    where
        H: MessageHandler<M, C> + 'static,
    {
        let shared = Arc::new(handler);
        let mut builder = self.factory(move || Arc::clone(&shared));
        builder.handler_type = Some(std::any::type_name::<H>());
        builder
    }

    /// Validates the builder and produces an immutable [`Registration`].
    ///
    /// # Errors
    ///
    /// - [`ConfigurationError::MissingFactory`] when no factory was set
    /// - [`ConfigurationError::MissingBodyFilter`] when only the context
    ///   filter was set
    /// - [`ConfigurationError::MissingContextFilter`] when only the body
    ///   filter was set
    pub fn build(self) -> ConfigurationResult<Registration<M, C>> {
        let name = self
            .name
            .or_else(|| self.handler_type.map(str::to_string))
            .unwrap_or_else(|| std::any::type_name::<M>().to_string());

        let Some(factory) = self.factory else {
            return Err(ConfigurationError::MissingFactory { handler: name });
        };

        let filters = match (self.context_filter, self.body_filter) {
            (None, None) => Filters::None,
            (Some(context), Some(body)) => Filters::Both { context, body },
            (Some(_), None) => return Err(ConfigurationError::MissingBodyFilter { handler: name }),
            (None, Some(_)) => {
                return Err(ConfigurationError::MissingContextFilter { handler: name });
            }
        };

        Ok(Registration {
            name,
            filters,
            serializer: self.serializer,
            factory,
        })
    }
}

// ============================================================================
// FallbackRegistration
// ============================================================================

/// The handler invoked when no primary registration matches.
pub struct FallbackRegistration {
    name: String,
    factory: FallbackFactory,
}

impl FallbackRegistration {
    /// Starts building a fallback registration.
    pub fn builder() -> FallbackBuilder {
        FallbackBuilder::default()
    }

    /// Name of the fallback registration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invokes the fallback with the raw body.
    ///
    /// A successful run is reported as a match with [`MatchSource::Fallback`]
    /// whose payload is the raw body.
    pub async fn handle(
        &self,
        body: &[u8],
        ctx: &dyn Context,
    ) -> Result<DispatchOutcome, HandlerError> {
        let handler = (self.factory)();
        handler.process(body, ctx).await?;

        Ok(DispatchOutcome::Matched(MatchedHandler::new(
            self.name.clone(),
            MatchSource::Fallback,
            body.to_vec(),
        )))
    }
}

impl fmt::Debug for FallbackRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackRegistration")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Builder for [`FallbackRegistration`].
#[derive(Default)]
pub struct FallbackBuilder {
    name: Option<String>,
    handler_type: Option<&'static str>,
    factory: Option<FallbackFactory>,
}

impl FallbackBuilder {
    /// Sets the fallback name. Defaults to the handler's type name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the factory that creates the fallback handler.
    pub fn factory<H, F>(mut self, factory: F) -> Self
    where
        H: FallbackHandler + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.handler_type = Some(std::any::type_name::<H>());
        self.factory = Some(Arc::new(move || Box::new(factory()) as Box<dyn FallbackHandler>));
        self
    }

    /// Uses one shared fallback instance for every unmatched message.
    pub fn handler<H>(self, handler: H) -> Self
    where
        H: FallbackHandler + 'static,
    {
        let shared = Arc::new(handler);
        let mut builder = self.factory(move || Arc::clone(&shared));
        builder.handler_type = Some(std::any::type_name::<H>());
        builder
    }

    /// Validates the builder.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::MissingFactory`] when no factory was set.
    pub fn build(self) -> ConfigurationResult<FallbackRegistration> {
        let name = self
            .name
            .or_else(|| self.handler_type.map(str::to_string))
            .unwrap_or_else(|| "fallback".to_string());

        match self.factory {
            Some(factory) => Ok(FallbackRegistration { name, factory }),
            None => Err(ConfigurationError::MissingFactory { handler: name }),
        }
    }
}
