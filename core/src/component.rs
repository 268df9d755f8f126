//! Handler capabilities and composition components.
//!
//! A composition component may play any combination of four roles:
//!
//! | Capability | Trait | Invoked |
//! |------------|-------|---------|
//! | Request handler | [`RequestHandler`] | concurrently, during the execution phase |
//! | Events subscriber | [`EventsSubscriber`] | sequentially, before any request handler starts |
//! | Error handler | [`ErrorHandler`] | sequentially, after the join if any handler failed |
//! | View model factory | [`ViewModelFactory`] | once, before the subscription phase |
//!
//! A resolved [`Component`] holds one optional slot per role. The same
//! instance may fill several slots:
//!
//! ```
//! use std::sync::Arc;
//! use view_composer_core::async_trait;
//! use view_composer_core::component::{Component, EventsSubscriber, RequestHandler};
//! use view_composer_core::context::{CompositionContext, Subscriptions};
//! use view_composer_core::error::HandlerResult;
//!
//! struct Prices;
//!
//! #[async_trait]
//! impl RequestHandler for Prices {
//!     async fn handle(&self, _context: &CompositionContext) -> HandlerResult {
//!         Ok(())
//!     }
//! }
//!
//! impl EventsSubscriber for Prices {
//!     fn subscribe(&self, _subscriptions: &Subscriptions<'_>) {}
//! }
//!
//! let prices = Arc::new(Prices);
//! let component = Component::new("prices")
//!     .with_request_handler(prices.clone())
//!     .with_events_subscriber(prices);
//!
//! assert!(component.request_handler().is_some());
//! assert!(component.error_handler().is_none());
//! ```

use crate::context::{CompositionContext, Subscriptions};
use crate::error::{CompositionError, HandlerResult, ResolveError};
use crate::view_model::ViewModel;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Contributes state to the view model of a request.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle one request
    ///
    /// The view model is reachable through
    /// [`CompositionContext::view_model`].
    ///
    /// # Errors
    ///
    /// Any error fails the whole request once all sibling handlers finish.
    async fn handle(&self, context: &CompositionContext) -> HandlerResult;
}

/// Registers event callbacks before any request handler runs.
pub trait EventsSubscriber: Send + Sync {
    /// Register callbacks on the request's event bus
    fn subscribe(&self, subscriptions: &Subscriptions<'_>);
}

/// Notified when one or more request handlers of a request fail.
///
/// Error handlers observe failures; they cannot turn them into a success.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    /// React to a failed request
    ///
    /// # Errors
    ///
    /// Returned errors are logged and otherwise ignored; the original failure
    /// is what the caller receives.
    async fn on_request_error(
        &self,
        context: &CompositionContext,
        error: &CompositionError,
    ) -> HandlerResult;
}

/// Creates the view model for a request.
pub trait ViewModelFactory: Send + Sync {
    /// Build the view model every request handler will mutate
    fn create_view_model(&self, context: &CompositionContext) -> Arc<dyn ViewModel>;
}

/// One of the roles a composition component can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Implements [`RequestHandler`]
    RequestHandler,
    /// Implements [`EventsSubscriber`]
    EventsSubscriber,
    /// Implements [`ErrorHandler`]
    ErrorHandler,
    /// Implements [`ViewModelFactory`]
    ViewModelFactory,
}

impl Capability {
    /// Every capability, in declaration order
    pub const ALL: [Self; 4] = [
        Self::RequestHandler,
        Self::EventsSubscriber,
        Self::ErrorHandler,
        Self::ViewModelFactory,
    ];

    const fn bit(self) -> u8 {
        match self {
            Self::RequestHandler => 0b0001,
            Self::EventsSubscriber => 0b0010,
            Self::ErrorHandler => 0b0100,
            Self::ViewModelFactory => 0b1000,
        }
    }

    /// Human readable name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RequestHandler => "request handler",
            Self::EventsSubscriber => "events subscriber",
            Self::ErrorHandler => "error handler",
            Self::ViewModelFactory => "view model factory",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of [`Capability`] values.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    /// The empty set
    pub const NONE: Self = Self(0);

    /// A set holding only `capability`
    #[must_use]
    pub const fn of(capability: Capability) -> Self {
        Self(capability.bit())
    }

    /// This set plus `capability`
    #[must_use]
    pub const fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    /// Check membership
    #[must_use]
    pub const fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// Check if no capability is present
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate the members in declaration order
    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL
            .into_iter()
            .filter(move |capability| self.contains(*capability))
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Registry-side description of a component: its name and declared roles.
///
/// Descriptors are what routes are bound to. The engine hands them to an
/// [`InstanceResolver`] to obtain a [`Component`] for each request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentDescriptor {
    name: String,
    capabilities: Capabilities,
}

impl ComponentDescriptor {
    /// Create a descriptor with explicit capabilities
    #[must_use]
    pub fn new(name: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            name: name.into(),
            capabilities,
        }
    }

    /// Descriptor of a request handler
    #[must_use]
    pub fn request_handler(name: impl Into<String>) -> Self {
        Self::new(name, Capabilities::of(Capability::RequestHandler))
    }

    /// Descriptor of an events subscriber
    #[must_use]
    pub fn events_subscriber(name: impl Into<String>) -> Self {
        Self::new(name, Capabilities::of(Capability::EventsSubscriber))
    }

    /// Descriptor of a view model factory
    #[must_use]
    pub fn view_model_factory(name: impl Into<String>) -> Self {
        Self::new(name, Capabilities::of(Capability::ViewModelFactory))
    }

    /// Add a declared capability
    #[must_use]
    pub fn with(mut self, capability: Capability) -> Self {
        self.capabilities = self.capabilities.with(capability);
        self
    }

    /// Component name, unique within a registry
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared capabilities
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Check whether the descriptor declares `capability`
    #[must_use]
    pub const fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }
}

/// A resolved component instance, with one slot per capability.
#[derive(Clone)]
pub struct Component {
    name: String,
    request_handler: Option<Arc<dyn RequestHandler>>,
    events_subscriber: Option<Arc<dyn EventsSubscriber>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    view_model_factory: Option<Arc<dyn ViewModelFactory>>,
}

impl Component {
    /// Create a component with no capabilities
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request_handler: None,
            events_subscriber: None,
            error_handler: None,
            view_model_factory: None,
        }
    }

    /// Fill the request handler slot
    #[must_use]
    pub fn with_request_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.request_handler = Some(handler);
        self
    }

    /// Fill the events subscriber slot
    #[must_use]
    pub fn with_events_subscriber(mut self, subscriber: Arc<dyn EventsSubscriber>) -> Self {
        self.events_subscriber = Some(subscriber);
        self
    }

    /// Fill the error handler slot
    #[must_use]
    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Fill the view model factory slot
    #[must_use]
    pub fn with_view_model_factory(mut self, factory: Arc<dyn ViewModelFactory>) -> Self {
        self.view_model_factory = Some(factory);
        self
    }

    /// Component name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request handler role, if provided
    #[must_use]
    pub const fn request_handler(&self) -> Option<&Arc<dyn RequestHandler>> {
        self.request_handler.as_ref()
    }

    /// Events subscriber role, if provided
    #[must_use]
    pub const fn events_subscriber(&self) -> Option<&Arc<dyn EventsSubscriber>> {
        self.events_subscriber.as_ref()
    }

    /// Error handler role, if provided
    #[must_use]
    pub const fn error_handler(&self) -> Option<&Arc<dyn ErrorHandler>> {
        self.error_handler.as_ref()
    }

    /// View model factory role, if provided
    #[must_use]
    pub const fn view_model_factory(&self) -> Option<&Arc<dyn ViewModelFactory>> {
        self.view_model_factory.as_ref()
    }

    /// Capabilities this instance actually provides
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        let mut capabilities = Capabilities::NONE;
        if self.request_handler.is_some() {
            capabilities = capabilities.with(Capability::RequestHandler);
        }
        if self.events_subscriber.is_some() {
            capabilities = capabilities.with(Capability::EventsSubscriber);
        }
        if self.error_handler.is_some() {
            capabilities = capabilities.with(Capability::ErrorHandler);
        }
        if self.view_model_factory.is_some() {
            capabilities = capabilities.with(Capability::ViewModelFactory);
        }
        capabilities
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// Ordered component descriptors per route key.
///
/// Populated and validated before any request runs; read-only afterwards.
pub trait ComponentRegistry: Send + Sync {
    /// Components bound to `route_key`, in registration order
    ///
    /// Unknown routes yield an empty slice.
    fn components_for(&self, route_key: &str) -> &[ComponentDescriptor];

    /// The global view model factory, if one is registered
    fn global_view_model_factory(&self) -> Option<&ComponentDescriptor>;
}

/// Turns a descriptor into a component instance.
///
/// Instance lifetime belongs to the resolver: it may build a fresh instance
/// per call or hand out a shared one.
pub trait InstanceResolver: Send + Sync {
    /// Resolve an instance for `descriptor`
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] if the component is unknown or cannot be built.
    fn resolve(&self, descriptor: &ComponentDescriptor) -> Result<Component, ResolveError>;
}
