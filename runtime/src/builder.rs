//! One-stop construction of a [`CompositionEngine`].
//!
//! The builder registers each component in a [`CompositionRegistry`] and its
//! constructor in a [`ComponentProvider`] at the same time, so the two can
//! never disagree about which names exist.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use view_composer_core::async_trait;
//! use view_composer_core::{Component, ComponentDescriptor, CompositionContext, HandlerResult, RequestHandler};
//! use view_composer_runtime::CompositionEngine;
//!
//! struct Title;
//!
//! #[async_trait]
//! impl RequestHandler for Title {
//!     async fn handle(&self, context: &CompositionContext) -> HandlerResult {
//!         if let Some(vm) = context.dynamic_view_model() {
//!             vm.set("Title", "Home");
//!         }
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<(), view_composer_core::RegistrationError> {
//! let engine = CompositionEngine::builder()
//!     .component(ComponentDescriptor::request_handler("title"), || {
//!         Component::new("title").with_request_handler(Arc::new(Title))
//!     })?
//!     .route("home", ["title"])?
//!     .build();
//! # let _ = engine;
//! # Ok(())
//! # }
//! ```

use crate::config::EngineConfig;
use crate::engine::CompositionEngine;
use crate::registry::{ComponentProvider, CompositionRegistry};
use std::sync::Arc;
use view_composer_core::{Clock, Component, ComponentDescriptor, RegistrationError};

/// Builder for [`CompositionEngine`].
#[derive(Default)]
pub struct CompositionEngineBuilder {
    registry: CompositionRegistry,
    provider: ComponentProvider,
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl CompositionEngineBuilder {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transient component, constructed afresh for every request
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] if the descriptor is rejected by the
    /// registry or the name is already taken.
    pub fn component<F>(
        mut self,
        descriptor: ComponentDescriptor,
        constructor: F,
    ) -> Result<Self, RegistrationError>
    where
        F: Fn() -> Component + Send + Sync + 'static,
    {
        let name = descriptor.name().to_string();
        self.registry.register_component(descriptor)?;
        self.provider.add_transient(name, constructor)?;
        Ok(self)
    }

    /// Register a component instance shared by every request
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] if the descriptor is rejected by the
    /// registry or the name is already taken.
    pub fn singleton(
        mut self,
        descriptor: ComponentDescriptor,
        component: Component,
    ) -> Result<Self, RegistrationError> {
        if component.name() != descriptor.name() {
            tracing::warn!(
                descriptor = descriptor.name(),
                component = component.name(),
                "Singleton instance name differs from its descriptor"
            );
        }
        let name = descriptor.name().to_string();
        self.registry.register_component(descriptor)?;
        self.provider.add_singleton(name, component)?;
        Ok(self)
    }

    /// Bind registered components to `route`, in order
    ///
    /// # Errors
    ///
    /// See [`CompositionRegistry::bind_route`].
    pub fn route<I, S>(
        mut self,
        route: impl Into<String>,
        components: I,
    ) -> Result<Self, RegistrationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.registry.bind_route(route, components)?;
        Ok(self)
    }

    /// Register the view model factory used by routes without their own
    ///
    /// # Errors
    ///
    /// See [`CompositionRegistry::register_global_view_model_factory`].
    pub fn global_view_model_factory<F>(
        mut self,
        descriptor: ComponentDescriptor,
        constructor: F,
    ) -> Result<Self, RegistrationError>
    where
        F: Fn() -> Component + Send + Sync + 'static,
    {
        let name = descriptor.name().to_string();
        self.registry.register_global_view_model_factory(descriptor)?;
        if !self.provider.contains(&name) {
            self.provider.add_transient(name, constructor)?;
        }
        Ok(self)
    }

    /// Set the engine configuration
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the clock used to stamp request start times
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Finish building the engine
    #[must_use]
    pub fn build(self) -> CompositionEngine {
        let engine = CompositionEngine::new(Arc::new(self.registry), Arc::new(self.provider))
            .with_config(self.config);
        match self.clock {
            Some(clock) => engine.with_clock(clock),
            None => engine,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use view_composer_core::{
        ComponentRegistry, CompositionContext, HandlerResult, InstanceResolver, RequestHandler,
        async_trait,
    };

    struct Noop;

    #[async_trait]
    impl RequestHandler for Noop {
        async fn handle(&self, _context: &CompositionContext) -> HandlerResult {
            Ok(())
        }
    }

    #[test]
    fn singleton_resolves_to_the_shared_instance_under_its_descriptor_name() {
        let handler: Arc<dyn RequestHandler> = Arc::new(Noop);
        let descriptor = ComponentDescriptor::request_handler("cart");
        let builder = CompositionEngineBuilder::new()
            .singleton(
                descriptor.clone(),
                Component::new("basket").with_request_handler(Arc::clone(&handler)),
            )
            .unwrap();

        for _ in 0..2 {
            let resolved = builder.provider.resolve(&descriptor).unwrap();
            assert_eq!(resolved.name(), "basket");
            assert!(Arc::ptr_eq(resolved.request_handler().unwrap(), &handler));
        }
    }

    #[test]
    fn registration_errors_surface_from_the_builder() {
        let result = CompositionEngineBuilder::new()
            .component(ComponentDescriptor::request_handler("a"), || {
                Component::new("a")
            })
            .and_then(|builder| builder.route("r", ["a", "b"]));
        assert!(matches!(
            result,
            Err(RegistrationError::UnknownComponent { .. })
        ));
    }

    #[test]
    fn component_names_are_unique_across_kinds() {
        let result = CompositionEngineBuilder::new()
            .component(ComponentDescriptor::request_handler("a"), || {
                Component::new("a")
            })
            .and_then(|builder| {
                builder.singleton(ComponentDescriptor::events_subscriber("a"), Component::new("a"))
            });
        assert!(matches!(
            result,
            Err(RegistrationError::DuplicateComponent(name)) if name == "a"
        ));
    }

    #[test]
    fn global_factory_may_share_a_route_component() {
        let builder = CompositionEngineBuilder::new()
            .component(ComponentDescriptor::view_model_factory("vm"), || {
                Component::new("vm")
            })
            .unwrap()
            .global_view_model_factory(ComponentDescriptor::view_model_factory("vm"), || {
                Component::new("vm")
            })
            .unwrap();
        assert!(builder.registry.global_view_model_factory().is_some());
    }
}
