//! Per-request composition context and event bus.
//!
//! A [`CompositionContext`] is created for exactly one request. It carries the
//! request identity, the view model all handlers share, and a request-local
//! event bus: handlers subscribe to event types during the subscription phase
//! and raise events while executing.
//!
//! # Event dispatch
//!
//! ```text
//! raise_event(Ping)
//!       │
//!       ▼
//! ┌──────────────────────┐
//! │ snapshot subscribers │  exact TypeId match, no supertype matching
//! │  for TypeId<Ping>    │
//! └──────────┬───────────┘
//!       ┌────┴────┐
//!       ▼         ▼
//!   callback   callback     run concurrently, all awaited
//!       └────┬────┘
//!            ▼
//!   Ok(()) or EventError::SubscribersFailed
//! ```
//!
//! The context is a cheap handle: cloning it shares the same request state.
//! Callbacks that capture a clone form a reference cycle with the subscription
//! table, which [`CompositionContext::cleanup`] breaks when the request ends.

use crate::error::{EventError, HandlerResult};
use crate::view_model::{DynamicViewModel, ViewModel, downcast_view_model};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, join_all};
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique identifier of one composition request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh random request id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type EventCallback = Arc<
    dyn Fn(Arc<dyn Any + Send + Sync>, CompositionContext) -> BoxFuture<'static, HandlerResult>
        + Send
        + Sync,
>;

struct ContextInner {
    request_id: RequestId,
    route_key: String,
    started_at: DateTime<Utc>,
    subscriptions: RwLock<HashMap<TypeId, Vec<EventCallback>>>,
    closed: AtomicBool,
    record_metrics: AtomicBool,
    view_model: OnceLock<Arc<dyn ViewModel>>,
    response_override: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
    cancellation: CancellationToken,
}

/// Request identity, shared view model and event bus for one request.
#[derive(Clone)]
pub struct CompositionContext {
    inner: Arc<ContextInner>,
}

impl CompositionContext {
    /// Create a context for a new request with a freshly generated id
    ///
    /// # Arguments
    ///
    /// - `route_key`: The route being composed
    /// - `started_at`: When the request started
    /// - `cancellation`: Token observed by handlers and event dispatch
    #[must_use]
    pub fn new(
        route_key: impl Into<String>,
        started_at: DateTime<Utc>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                request_id: RequestId::new(),
                route_key: route_key.into(),
                started_at,
                subscriptions: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
                record_metrics: AtomicBool::new(true),
                view_model: OnceLock::new(),
                response_override: Mutex::new(None),
                cancellation,
            }),
        }
    }

    /// Create a standalone context for `route_key`, starting now
    #[must_use]
    pub fn for_route(route_key: impl Into<String>) -> Self {
        Self::new(route_key, Utc::now(), CancellationToken::new())
    }

    /// Enable or disable the event counters recorded by [`raise_event`](Self::raise_event)
    ///
    /// Enabled by default.
    #[must_use]
    pub fn with_metrics(self, enabled: bool) -> Self {
        self.inner.record_metrics.store(enabled, Ordering::Relaxed);
        self
    }

    /// Identifier of this request
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.inner.request_id
    }

    /// Route key being composed
    #[must_use]
    pub fn route_key(&self) -> &str {
        &self.inner.route_key
    }

    /// When the request started
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Cancellation token for this request
    ///
    /// Long-running handlers should select on
    /// [`CancellationToken::cancelled`] to stop early.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancellation
    }

    /// Check if the request has been cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    /// Attach the request's view model
    ///
    /// Called by the engine once the view model is resolved. Only the first
    /// call has an effect; returns `false` if a view model was already bound.
    pub fn bind_view_model(&self, view_model: Arc<dyn ViewModel>) -> bool {
        self.inner.view_model.set(view_model).is_ok()
    }

    /// The view model shared by every handler of this request
    #[must_use]
    pub fn view_model(&self) -> Option<Arc<dyn ViewModel>> {
        self.inner.view_model.get().cloned()
    }

    /// The view model downcast to a concrete type
    ///
    /// Returns `None` if no view model is bound or it is of another type.
    #[must_use]
    pub fn view_model_as<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.inner
            .view_model
            .get()
            .and_then(downcast_view_model::<T>)
    }

    /// The default property bag view model, if that is what this request uses
    #[must_use]
    pub fn dynamic_view_model(&self) -> Option<Arc<DynamicViewModel>> {
        self.view_model_as::<DynamicViewModel>()
    }

    /// Place an out-of-band result that replaces the view model when rendering
    ///
    /// Last write wins.
    pub fn set_response_override<T>(&self, value: T)
    where
        T: Any + Send + Sync,
    {
        *self
            .inner
            .response_override
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(value));
    }

    /// The out-of-band result placed by a handler, if any
    #[must_use]
    pub fn response_override(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner
            .response_override
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Subscribe `handler` to events of exactly type `E`
    ///
    /// Every subscription is kept, in insertion order. Subscriptions made after
    /// [`cleanup`](Self::cleanup) are ignored.
    ///
    /// # Example
    ///
    /// ```
    /// use view_composer_core::context::CompositionContext;
    ///
    /// struct Ping;
    ///
    /// let context = CompositionContext::for_route("b");
    /// context.subscribe(|_ping: std::sync::Arc<Ping>, _ctx| async { Ok(()) });
    /// assert_eq!(context.subscriber_count::<Ping>(), 1);
    /// ```
    pub fn subscribe<E, F, Fut>(&self, handler: F)
    where
        E: Any + Send + Sync,
        F: Fn(Arc<E>, CompositionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let event_type = type_name::<E>();
        let callback: EventCallback = Arc::new(
            move |event: Arc<dyn Any + Send + Sync>,
                  context: CompositionContext|
                  -> BoxFuture<'static, HandlerResult> {
                match event.downcast::<E>() {
                    Ok(event) => Box::pin(handler(event, context)),
                    Err(_) => Box::pin(futures::future::ready(Err(anyhow::anyhow!(
                        "event routed to a subscriber of '{event_type}' has a different type"
                    )))),
                }
            },
        );

        {
            // Checked under the write lock so a concurrent cleanup cannot miss it
            let mut subscriptions = self
                .inner
                .subscriptions
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if self.inner.closed.load(Ordering::Acquire) {
                drop(subscriptions);
                tracing::debug!(
                    request_id = %self.inner.request_id,
                    event_type,
                    "Ignoring subscription on a completed request"
                );
                return;
            }
            subscriptions
                .entry(TypeId::of::<E>())
                .or_default()
                .push(callback);
        }

        tracing::trace!(request_id = %self.inner.request_id, event_type, "Subscribed to event");
    }

    /// Number of subscribers currently registered for `E`
    #[must_use]
    pub fn subscriber_count<E: Any>(&self) -> usize {
        self.inner
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<E>())
            .map_or(0, Vec::len)
    }

    /// Deliver `event` to every subscriber of exactly type `E`
    ///
    /// Subscribers are snapshotted when the call starts, then invoked
    /// concurrently; the call completes when all of them have finished. With no
    /// subscribers this is a no-op.
    ///
    /// # Errors
    ///
    /// - [`EventError::SubscribersFailed`] if any subscriber returned an error
    /// - [`EventError::Cancelled`] if the request was cancelled during dispatch
    pub async fn raise_event<E>(&self, event: E) -> Result<(), EventError>
    where
        E: Any + Send + Sync,
    {
        let event_type = type_name::<E>();
        let subscribers: Vec<EventCallback> = self
            .inner
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<E>())
            .cloned()
            .unwrap_or_default();

        if subscribers.is_empty() {
            tracing::trace!(
                request_id = %self.inner.request_id,
                event_type,
                "No subscribers for event"
            );
            return Ok(());
        }

        tracing::trace!(
            request_id = %self.inner.request_id,
            event_type,
            subscribers = subscribers.len(),
            "Raising event"
        );
        let record_metrics = self.inner.record_metrics.load(Ordering::Relaxed);
        if record_metrics {
            metrics::counter!("composition_events_raised_total").increment(1);
        }

        let event: Arc<dyn Any + Send + Sync> = Arc::new(event);
        let dispatch = join_all(
            subscribers
                .iter()
                .map(|callback| callback(Arc::clone(&event), self.clone())),
        );

        let results = tokio::select! {
            results = dispatch => results,
            () = self.inner.cancellation.cancelled() => {
                return Err(EventError::Cancelled { event_type });
            }
        };

        let mut failures = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            if let Err(error) = result {
                tracing::debug!(
                    request_id = %self.inner.request_id,
                    event_type,
                    subscriber = index,
                    error = %error,
                    "Event subscriber failed"
                );
                failures.push(error);
            }
        }
        if failures.is_empty() {
            return Ok(());
        }

        if record_metrics {
            metrics::counter!("composition_event_subscriber_failures_total")
                .increment(failures.len() as u64);
        }

        Err(EventError::SubscribersFailed {
            event_type,
            failures,
        })
    }

    /// Drop every subscription and refuse new ones
    ///
    /// Idempotent. The engine calls this once per request, whatever the outcome.
    pub fn cleanup(&self) {
        let removed: usize = {
            let mut subscriptions = self
                .inner
                .subscriptions
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            self.inner.closed.store(true, Ordering::Release);
            let removed = subscriptions.values().map(Vec::len).sum();
            subscriptions.clear();
            removed
        };
        tracing::trace!(request_id = %self.inner.request_id, removed, "Cleared subscriptions");
    }

    /// Subscription-only view of this context, handed to events subscribers
    #[must_use]
    pub const fn subscriptions(&self) -> Subscriptions<'_> {
        Subscriptions { context: self }
    }
}

impl fmt::Debug for CompositionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositionContext")
            .field("request_id", &self.inner.request_id)
            .field("route_key", &self.inner.route_key)
            .field("started_at", &self.inner.started_at)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Subscription-only view of a [`CompositionContext`].
///
/// Given to [`EventsSubscriber::subscribe`](crate::component::EventsSubscriber::subscribe)
/// so subscribers can register callbacks without raising events during the
/// subscription phase.
#[derive(Clone, Copy)]
pub struct Subscriptions<'a> {
    context: &'a CompositionContext,
}

impl Subscriptions<'_> {
    /// Subscribe `handler` to events of exactly type `E`
    ///
    /// See [`CompositionContext::subscribe`].
    pub fn subscribe<E, F, Fut>(&self, handler: F)
    where
        E: Any + Send + Sync,
        F: Fn(Arc<E>, CompositionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.context.subscribe(handler);
    }

    /// Identifier of the request being subscribed to
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.context.request_id()
    }

    /// Route key of the request being subscribed to
    #[must_use]
    pub fn route_key(&self) -> &str {
        self.context.route_key()
    }
}

impl fmt::Debug for Subscriptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriptions")
            .field("request_id", &self.context.request_id())
            .finish()
    }
}
