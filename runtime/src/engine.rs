//! The composition engine.
//!
//! One call to [`CompositionEngine::handle_composable_request`] answers one
//! request:
//!
//! ```text
//! route key
//!    │
//!    ▼
//! resolve components ──► no request handler? ──► Ok(None)
//!    │
//!    ▼
//! view model: route-scoped factory > global factory > DynamicViewModel
//!    │
//!    ▼
//! subscription phase   every EventsSubscriber, sequentially, in order
//!    │
//!    ▼
//! execution phase      every RequestHandler, concurrently, all joined
//!    │
//!    ├── all succeeded ──► Ok(Some(Composition))
//!    └── any failed ─────► notify ErrorHandlers ──► Err(HandlersFailed)
//!
//! cleanup runs on every path
//! ```

use crate::builder::CompositionEngineBuilder;
use crate::config::EngineConfig;
use crate::metrics::CompositionMetrics;
use futures::future::join_all;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;
use tracing::Instrument;
use view_composer_core::{
    AggregateHandlerError, CancellationToken, Capability, Clock, Component, ComponentRegistry,
    CompositionContext, CompositionError, DynamicViewModel, HandlerFailure, InstanceResolver,
    RequestHandler, RequestId, SystemClock, ViewModel, view_model::downcast_view_model,
};

/// Result of a successfully composed request.
pub struct Composition {
    request_id: RequestId,
    view_model: Arc<dyn ViewModel>,
    response_override: Option<Arc<dyn Any + Send + Sync>>,
}

impl Composition {
    /// Identifier of the composed request
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// The composed view model
    #[must_use]
    pub const fn view_model(&self) -> &Arc<dyn ViewModel> {
        &self.view_model
    }

    /// Take the composed view model
    #[must_use]
    pub fn into_view_model(self) -> Arc<dyn ViewModel> {
        self.view_model
    }

    /// The view model downcast to a concrete type
    #[must_use]
    pub fn view_model_as<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        downcast_view_model::<T>(&self.view_model)
    }

    /// The view model as the default property bag
    #[must_use]
    pub fn dynamic_view_model(&self) -> Option<Arc<DynamicViewModel>> {
        self.view_model_as::<DynamicViewModel>()
    }

    /// Out-of-band result a handler asked to render instead of the view model
    #[must_use]
    pub const fn response_override(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.response_override.as_ref()
    }
}

impl fmt::Debug for Composition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composition")
            .field("request_id", &self.request_id)
            .field("view_model", &self.view_model)
            .field("response_override", &self.response_override.is_some())
            .finish()
    }
}

enum JoinOutcome {
    Completed {
        failures: Vec<HandlerFailure>,
        attempted: usize,
    },
    Cancelled,
    TimedOut(Duration),
}

/// Cleans the context when a request ends, including when the caller drops
/// the request future midway.
struct RequestGuard {
    context: CompositionContext,
    finished: bool,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if !self.finished {
            // Abandoned by the caller: stop handlers still running
            self.context.cancellation_token().cancel();
        }
        self.context.cleanup();
    }
}

struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.iter().for_each(AbortHandle::abort);
    }
}

/// Drives composition requests against a component registry.
///
/// The engine is immutable once built and can serve any number of
/// concurrent requests; requests share nothing but the registry and the
/// resolver.
pub struct CompositionEngine {
    registry: Arc<dyn ComponentRegistry>,
    resolver: Arc<dyn InstanceResolver>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl CompositionEngine {
    /// Create an engine with the default configuration and system clock
    #[must_use]
    pub fn new(registry: Arc<dyn ComponentRegistry>, resolver: Arc<dyn InstanceResolver>) -> Self {
        Self {
            registry,
            resolver,
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    /// Start building an engine from components and routes
    #[must_use]
    pub fn builder() -> CompositionEngineBuilder {
        CompositionEngineBuilder::new()
    }

    /// Replace the configuration
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the clock used to stamp request start times
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Current configuration
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compose the view model for `route_key`
    ///
    /// Returns `Ok(None)` if no request handler is bound to the route; in that
    /// case no factory and no subscriber is invoked.
    ///
    /// # Errors
    ///
    /// - [`CompositionError::Resolve`] or [`CompositionError::MissingCapability`]
    ///   if components cannot be resolved
    /// - [`CompositionError::HandlersFailed`] if any request handler failed,
    ///   after every error handler was notified
    /// - [`CompositionError::TimedOut`] if the configured request timeout elapsed
    pub async fn handle_composable_request(
        &self,
        route_key: &str,
    ) -> Result<Option<Composition>, CompositionError> {
        self.handle_composable_request_with_cancellation(route_key, CancellationToken::new())
            .await
    }

    /// Compose the view model for `route_key`, abandoning it when
    /// `cancellation` fires
    ///
    /// The request observes a child of `cancellation`, so cancelling one
    /// request never affects another.
    ///
    /// # Errors
    ///
    /// As [`handle_composable_request`](Self::handle_composable_request), plus
    /// [`CompositionError::Cancelled`] when `cancellation` fires before the
    /// join completes. Error handlers are not invoked on cancellation.
    #[tracing::instrument(
        name = "composition_request",
        skip(self, cancellation),
        fields(request_id = tracing::field::Empty)
    )]
    pub async fn handle_composable_request_with_cancellation(
        &self,
        route_key: &str,
        cancellation: CancellationToken,
    ) -> Result<Option<Composition>, CompositionError> {
        let start = Instant::now();
        let context =
            CompositionContext::new(route_key, self.clock.now(), cancellation.child_token())
                .with_metrics(self.config.record_metrics);
        tracing::Span::current().record(
            "request_id",
            tracing::field::display(context.request_id()),
        );

        let mut guard = RequestGuard {
            context: context.clone(),
            finished: false,
        };
        let result = self.compose(&context).await;
        guard.finished = true;
        drop(guard);

        let outcome = match &result {
            Ok(Some(_)) => "composed",
            Ok(None) => "not_found",
            Err(error) => error.outcome(),
        };
        if self.config.record_metrics {
            CompositionMetrics::record_request(outcome, start.elapsed());
        }
        tracing::debug!(
            outcome,
            duration_ms = start.elapsed().as_millis(),
            "Composition request finished"
        );

        result
    }

    async fn compose(
        &self,
        context: &CompositionContext,
    ) -> Result<Option<Composition>, CompositionError> {
        let route_key = context.route_key();
        let components = self
            .registry
            .components_for(route_key)
            .iter()
            .map(|descriptor| self.resolver.resolve(descriptor))
            .collect::<Result<Vec<Component>, _>>()
            .map_err(|source| CompositionError::Resolve {
                route: route_key.to_string(),
                source,
            })?;

        let handlers: Vec<(String, Arc<dyn RequestHandler>)> = components
            .iter()
            .filter_map(|component| {
                component
                    .request_handler()
                    .map(|handler| (component.name().to_string(), Arc::clone(handler)))
            })
            .collect();

        if handlers.is_empty() {
            tracing::debug!(
                components = components.len(),
                "No request handlers bound to route"
            );
            return Ok(None);
        }

        let view_model = self.create_view_model(context, &components)?;
        context.bind_view_model(Arc::clone(&view_model));

        let subscriptions = context.subscriptions();
        for component in &components {
            if let Some(subscriber) = component.events_subscriber() {
                tracing::trace!(component = component.name(), "Subscribing");
                subscriber.subscribe(&subscriptions);
            }
        }

        match self.execute(context, handlers).await {
            JoinOutcome::Completed {
                failures,
                attempted,
            } if failures.is_empty() => {
                tracing::debug!(handlers = attempted, "All request handlers succeeded");
                Ok(Some(Composition {
                    request_id: context.request_id(),
                    view_model,
                    response_override: context.response_override(),
                }))
            }
            JoinOutcome::Completed {
                failures,
                attempted,
            } => {
                tracing::error!(
                    failed = failures.len(),
                    attempted,
                    "Request handlers failed"
                );
                if self.config.record_metrics {
                    CompositionMetrics::record_handler_failures(failures.len());
                }
                let error = CompositionError::HandlersFailed {
                    request_id: context.request_id(),
                    source: AggregateHandlerError::new(failures, attempted),
                };
                self.notify_error_handlers(context, &components, &error)
                    .await;
                Err(error)
            }
            JoinOutcome::Cancelled => {
                tracing::warn!("Composition request cancelled");
                Err(CompositionError::Cancelled {
                    request_id: context.request_id(),
                })
            }
            JoinOutcome::TimedOut(timeout) => {
                tracing::warn!(timeout_ms = timeout.as_millis(), "Composition request timed out");
                Err(CompositionError::TimedOut {
                    request_id: context.request_id(),
                    timeout,
                })
            }
        }
    }

    fn create_view_model(
        &self,
        context: &CompositionContext,
        components: &[Component],
    ) -> Result<Arc<dyn ViewModel>, CompositionError> {
        if let Some(factory) = components
            .iter()
            .find_map(Component::view_model_factory)
        {
            tracing::trace!("Using route-scoped view model factory");
            return Ok(factory.create_view_model(context));
        }

        if let Some(descriptor) = self.registry.global_view_model_factory() {
            let component =
                self.resolver
                    .resolve(descriptor)
                    .map_err(|source| CompositionError::Resolve {
                        route: context.route_key().to_string(),
                        source,
                    })?;
            let factory = component.view_model_factory().ok_or_else(|| {
                CompositionError::MissingCapability {
                    component: descriptor.name().to_string(),
                    capability: Capability::ViewModelFactory.name(),
                }
            })?;
            tracing::trace!(component = descriptor.name(), "Using global view model factory");
            return Ok(factory.create_view_model(context));
        }

        Ok(Arc::new(DynamicViewModel::new()))
    }

    async fn execute(
        &self,
        context: &CompositionContext,
        handlers: Vec<(String, Arc<dyn RequestHandler>)>,
    ) -> JoinOutcome {
        if context.is_cancelled() {
            return JoinOutcome::Cancelled;
        }

        let attempted = handlers.len();
        let mut names = Vec::with_capacity(attempted);
        let mut tasks = Vec::with_capacity(attempted);

        for (name, handler) in handlers {
            let task_context = context.clone();
            let span = tracing::debug_span!("request_handler", component = %name);
            tasks.push(tokio::spawn(
                async move { handler.handle(&task_context).await }.instrument(span),
            ));
            names.push(name);
        }
        if self.config.record_metrics {
            CompositionMetrics::record_handlers_invoked(attempted);
        }

        // Aborts whatever is still running if this future returns early or is dropped
        let _abort_guard = AbortOnDrop(
            tasks
                .iter()
                .map(tokio::task::JoinHandle::abort_handle)
                .collect(),
        );

        let results = tokio::select! {
            results = join_all(tasks) => results,
            () = context.cancellation_token().cancelled() => {
                return JoinOutcome::Cancelled;
            }
            () = sleep_or_pending(self.config.request_timeout) => {
                context.cancellation_token().cancel();
                return JoinOutcome::TimedOut(
                    self.config.request_timeout.unwrap_or_default(),
                );
            }
        };

        let failures = names
            .into_iter()
            .zip(results)
            .filter_map(|(name, result)| {
                let error = match result {
                    Ok(Ok(())) => return None,
                    Ok(Err(error)) => error,
                    Err(join_error) => anyhow::Error::new(join_error),
                };
                tracing::warn!(component = %name, error = %error, "Request handler failed");
                Some(HandlerFailure::new(name, error))
            })
            .collect();

        JoinOutcome::Completed {
            failures,
            attempted,
        }
    }

    async fn notify_error_handlers(
        &self,
        context: &CompositionContext,
        components: &[Component],
        error: &CompositionError,
    ) {
        for component in components {
            let Some(handler) = component.error_handler() else {
                continue;
            };
            if self.config.record_metrics {
                CompositionMetrics::record_error_handler_invoked();
            }

            let notification = handler.on_request_error(context, error);
            let result = match self.config.error_handler_timeout {
                Some(limit) => tokio::time::timeout(limit, notification)
                    .await
                    .unwrap_or_else(|_| {
                        Err(anyhow::anyhow!("error handler timed out after {limit:?}"))
                    }),
                None => notification.await,
            };

            if let Err(handler_error) = result {
                tracing::warn!(
                    component = component.name(),
                    error = %handler_error,
                    "Error handler failed"
                );
            }
        }
    }
}

impl fmt::Debug for CompositionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositionEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn sleep_or_pending(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::registry::{ComponentProvider, CompositionRegistry};
    use view_composer_core::async_trait;
    use view_composer_core::{ComponentDescriptor, HandlerResult};

    struct SetProperty(&'static str);

    #[async_trait]
    impl RequestHandler for SetProperty {
        async fn handle(&self, context: &CompositionContext) -> HandlerResult {
            context
                .dynamic_view_model()
                .ok_or_else(|| anyhow::anyhow!("no view model"))?
                .set(self.0, true);
            Ok(())
        }
    }

    fn engine_with(routes: &[(&'static str, &[&'static str])]) -> CompositionEngine {
        let mut registry = CompositionRegistry::new();
        let mut provider = ComponentProvider::new();
        let mut seen = std::collections::HashSet::new();
        for (_, names) in routes {
            for name in *names {
                if seen.insert(*name) {
                    registry
                        .register_component(ComponentDescriptor::request_handler(*name))
                        .unwrap();
                    let property: &'static str = *name;
                    provider
                        .add_transient(*name, move || {
                            Component::new(property)
                                .with_request_handler(Arc::new(SetProperty(property)))
                        })
                        .unwrap();
                }
            }
        }
        for (route, names) in routes {
            registry.bind_route(*route, names.iter()).unwrap();
        }
        CompositionEngine::new(Arc::new(registry), Arc::new(provider))
    }

    #[tokio::test]
    async fn unknown_route_yields_none() {
        let engine = engine_with(&[("a", &["x"])]);
        assert!(engine.handle_composable_request("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn handlers_share_one_view_model() {
        let engine = engine_with(&[("a", &["x", "y"])]);
        let composition = engine.handle_composable_request("a").await.unwrap().unwrap();
        let view_model = composition.dynamic_view_model().unwrap();
        assert_eq!(view_model.len(), 2);
        assert!(view_model.contains("x"));
        assert!(view_model.contains("y"));
    }

    #[tokio::test]
    async fn sleep_or_pending_without_timeout_never_fires() {
        let pending = sleep_or_pending(None);
        assert!(
            tokio::time::timeout(Duration::from_millis(20), pending)
                .await
                .is_err()
        );
    }
}
