//! # View Composer Core
//!
//! Core traits and types for composing a view model out of independently
//! registered handlers.
//!
//! A request is answered by concurrently running every handler registered for
//! its route. Handlers share one view model and one request-scoped event bus,
//! and their results are joined into a single object.
//!
//! ## Core Concepts
//!
//! - **View Model**: The per-request result object handlers mutate in place
//!   ([`DynamicViewModel`] by default)
//! - **Composition Context**: Request identity plus an event bus shared by all
//!   handlers of that request
//! - **Capabilities**: The roles a component may play: [`RequestHandler`],
//!   [`EventsSubscriber`], [`ErrorHandler`], [`ViewModelFactory`]
//! - **Registry / Resolver**: External collaborators that map routes to
//!   component descriptors and descriptors to instances
//!
//! The engine that drives a request lives in `view-composer-runtime`.
//!
//! ## Example
//!
//! ```
//! use view_composer_core::async_trait;
//! use view_composer_core::{CompositionContext, HandlerResult, RequestHandler};
//!
//! struct Greeting;
//!
//! #[async_trait]
//! impl RequestHandler for Greeting {
//!     async fn handle(&self, context: &CompositionContext) -> HandlerResult {
//!         if let Some(vm) = context.dynamic_view_model() {
//!             vm.set("Greeting", "hi");
//!         }
//!         Ok(())
//!     }
//! }
//! ```

pub mod component;
pub mod context;
pub mod environment;
pub mod error;
pub mod view_model;

// Re-export commonly used types
pub use async_trait::async_trait;
pub use component::{
    Capabilities, Capability, Component, ComponentDescriptor, ComponentRegistry, ErrorHandler,
    EventsSubscriber, InstanceResolver, RequestHandler, ViewModelFactory,
};
pub use context::{CompositionContext, RequestId, Subscriptions};
pub use environment::{Clock, SystemClock};
pub use error::{
    AggregateHandlerError, CompositionError, EventError, HandlerFailure, HandlerResult,
    RegistrationError, ResolveError,
};
pub use tokio_util::sync::CancellationToken;
pub use view_model::{DynamicViewModel, Keys, ViewModel};
