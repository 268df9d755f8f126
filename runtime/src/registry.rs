//! Route registration and instance resolution.
//!
//! [`CompositionRegistry`] is the validated catalog the engine reads from:
//! components are registered by name, then bound to routes in order. All
//! validation happens here, before the first request runs.
//!
//! [`ComponentProvider`] is a name-keyed [`InstanceResolver`] built from
//! constructors. Transient components are constructed on every resolution,
//! singletons are shared across requests.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;
use view_composer_core::{
    Capability, Component, ComponentDescriptor, ComponentRegistry, InstanceResolver,
    RegistrationError, ResolveError,
};

/// Validated mapping from route keys to ordered component descriptors.
#[derive(Debug, Default, Clone)]
pub struct CompositionRegistry {
    components: HashMap<String, ComponentDescriptor>,
    routes: HashMap<String, Vec<ComponentDescriptor>>,
    global_view_model_factory: Option<ComponentDescriptor>,
}

impl CompositionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component to the catalog
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::NoRecognizedCapability`] if the component is
    ///   neither a request handler, an events subscriber, nor a view model
    ///   factory
    /// - [`RegistrationError::DuplicateComponent`] if the name is taken
    pub fn register_component(
        &mut self,
        descriptor: ComponentDescriptor,
    ) -> Result<(), RegistrationError> {
        let recognized = descriptor.has(Capability::RequestHandler)
            || descriptor.has(Capability::EventsSubscriber)
            || descriptor.has(Capability::ViewModelFactory);
        if !recognized {
            return Err(RegistrationError::NoRecognizedCapability(
                descriptor.name().to_string(),
            ));
        }

        match self.components.entry(descriptor.name().to_string()) {
            Entry::Occupied(entry) => {
                Err(RegistrationError::DuplicateComponent(entry.key().clone()))
            }
            Entry::Vacant(entry) => {
                tracing::debug!(
                    component = descriptor.name(),
                    capabilities = ?descriptor.capabilities(),
                    "Registered component"
                );
                entry.insert(descriptor);
                Ok(())
            }
        }
    }

    /// Bind registered components to `route`, appending in the given order
    ///
    /// Binding is all-or-nothing: on error the route is left unchanged.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::UnknownComponent`] if a name was never registered
    /// - [`RegistrationError::DuplicateRouteComponent`] if a component would be
    ///   bound to the route twice
    /// - [`RegistrationError::MultipleRouteScopedFactories`] if the route would
    ///   end up with more than one view model factory
    pub fn bind_route<I, S>(
        &mut self,
        route: impl Into<String>,
        components: I,
    ) -> Result<(), RegistrationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let route = route.into();
        let existing = self.routes.get(&route).map_or(&[][..], Vec::as_slice);

        let mut factory = existing
            .iter()
            .find(|descriptor| descriptor.has(Capability::ViewModelFactory))
            .map(|descriptor| descriptor.name().to_string());
        let mut bound: Vec<ComponentDescriptor> = Vec::new();

        for name in components {
            let name = name.as_ref();
            let descriptor =
                self.components
                    .get(name)
                    .ok_or_else(|| RegistrationError::UnknownComponent {
                        route: route.clone(),
                        component: name.to_string(),
                    })?;

            let already_bound = existing
                .iter()
                .chain(bound.iter())
                .any(|other| other.name() == name);
            if already_bound {
                return Err(RegistrationError::DuplicateRouteComponent {
                    route,
                    component: name.to_string(),
                });
            }

            if descriptor.has(Capability::ViewModelFactory) {
                if let Some(existing) = &factory {
                    return Err(RegistrationError::MultipleRouteScopedFactories {
                        route,
                        existing: existing.clone(),
                        rejected: name.to_string(),
                    });
                }
                factory = Some(name.to_string());
            }

            bound.push(descriptor.clone());
        }

        tracing::debug!(route = %route, components = bound.len(), "Bound route");
        self.routes.entry(route).or_default().extend(bound);
        Ok(())
    }

    /// Register the view model factory used by routes without their own
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::NotAViewModelFactory`] if the descriptor does not
    ///   declare the view model factory capability
    /// - [`RegistrationError::DuplicateGlobalViewModelFactory`] if one is
    ///   already registered
    pub fn register_global_view_model_factory(
        &mut self,
        descriptor: ComponentDescriptor,
    ) -> Result<(), RegistrationError> {
        if !descriptor.has(Capability::ViewModelFactory) {
            return Err(RegistrationError::NotAViewModelFactory(
                descriptor.name().to_string(),
            ));
        }
        if let Some(existing) = &self.global_view_model_factory {
            return Err(RegistrationError::DuplicateGlobalViewModelFactory {
                existing: existing.name().to_string(),
            });
        }

        tracing::debug!(
            component = descriptor.name(),
            "Registered global view model factory"
        );
        self.global_view_model_factory = Some(descriptor);
        Ok(())
    }

    /// Registered component by name
    #[must_use]
    pub fn component(&self, name: &str) -> Option<&ComponentDescriptor> {
        self.components.get(name)
    }

    /// Every route with at least one bound component
    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

impl ComponentRegistry for CompositionRegistry {
    fn components_for(&self, route_key: &str) -> &[ComponentDescriptor] {
        self.routes.get(route_key).map_or(&[], Vec::as_slice)
    }

    fn global_view_model_factory(&self) -> Option<&ComponentDescriptor> {
        self.global_view_model_factory.as_ref()
    }
}

type Constructor = Arc<dyn Fn() -> Result<Component, ResolveError> + Send + Sync>;

/// Name-keyed [`InstanceResolver`] backed by constructors.
#[derive(Default, Clone)]
pub struct ComponentProvider {
    constructors: HashMap<String, Constructor>,
}

impl ComponentProvider {
    /// Create an empty provider
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fresh instance of `name` on every resolution
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateComponent`] if `name` is taken.
    pub fn add_transient<F>(
        &mut self,
        name: impl Into<String>,
        constructor: F,
    ) -> Result<(), RegistrationError>
    where
        F: Fn() -> Component + Send + Sync + 'static,
    {
        self.insert(name.into(), Arc::new(move || Ok(constructor())))
    }

    /// Build a fresh instance of `name` on every resolution with a constructor
    /// that may fail
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateComponent`] if `name` is taken.
    pub fn add_fallible<F>(
        &mut self,
        name: impl Into<String>,
        constructor: F,
    ) -> Result<(), RegistrationError>
    where
        F: Fn() -> Result<Component, ResolveError> + Send + Sync + 'static,
    {
        self.insert(name.into(), Arc::new(constructor))
    }

    /// Share `component` across every resolution of `name`
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateComponent`] if `name` is taken.
    pub fn add_singleton(
        &mut self,
        name: impl Into<String>,
        component: Component,
    ) -> Result<(), RegistrationError> {
        self.insert(name.into(), Arc::new(move || Ok(component.clone())))
    }

    /// Check whether `name` can be resolved
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    fn insert(&mut self, name: String, constructor: Constructor) -> Result<(), RegistrationError> {
        match self.constructors.entry(name) {
            Entry::Occupied(entry) => {
                Err(RegistrationError::DuplicateComponent(entry.key().clone()))
            }
            Entry::Vacant(entry) => {
                entry.insert(constructor);
                Ok(())
            }
        }
    }
}

impl InstanceResolver for ComponentProvider {
    fn resolve(&self, descriptor: &ComponentDescriptor) -> Result<Component, ResolveError> {
        let constructor = self
            .constructors
            .get(descriptor.name())
            .ok_or_else(|| ResolveError::UnknownComponent(descriptor.name().to_string()))?;
        constructor()
    }
}

impl fmt::Debug for ComponentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ComponentProvider")
            .field("components", &names)
            .finish()
    }
}
