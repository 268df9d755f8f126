//! Integration tests for failure handling
//!
//! Handler failures are joined, aggregated in registration order, reported to
//! every error handler, and always propagated to the caller.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use view_composer_core::async_trait;
use view_composer_core::{
    Capability, Component, ComponentDescriptor, CompositionContext, CompositionError, ErrorHandler,
    EventError, HandlerResult, RequestHandler, ResolveError, Subscriptions,
};
use view_composer_runtime::{
    ComponentProvider, CompositionEngine, CompositionRegistry, EngineConfig,
};
use view_composer_testing::{
    CallLog, CompositionTest, FailingRequestHandler, FnEventsSubscriber, FnRequestHandler,
    RecordingErrorHandler,
};

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("inventory service unavailable")]
struct InventoryUnavailable;

#[derive(Debug)]
struct Ping;

struct Panicking;

#[async_trait]
impl RequestHandler for Panicking {
    async fn handle(&self, _context: &CompositionContext) -> HandlerResult {
        panic!("handler blew up");
    }
}

/// Error handler that logs its name, optionally after a delay
struct NamedErrorHandler {
    name: &'static str,
    log: CallLog,
    delay: Duration,
}

#[async_trait]
impl ErrorHandler for NamedErrorHandler {
    async fn on_request_error(
        &self,
        _context: &CompositionContext,
        _error: &CompositionError,
    ) -> HandlerResult {
        tokio::time::sleep(self.delay).await;
        self.log.record(self.name);
        Ok(())
    }
}

/// Error handler that downcasts the first failure it is handed
#[derive(Clone, Default)]
struct InventoryErrorInspector {
    seen: Arc<Mutex<Vec<Option<InventoryUnavailable>>>>,
}

#[async_trait]
impl ErrorHandler for InventoryErrorInspector {
    async fn on_request_error(
        &self,
        _context: &CompositionContext,
        error: &CompositionError,
    ) -> HandlerResult {
        let downcast = error
            .failures()
            .first()
            .and_then(|failure| failure.error().downcast_ref::<InventoryUnavailable>())
            .cloned();
        self.seen.lock().unwrap().push(downcast);
        Ok(())
    }
}

fn failing(name: &str, message: &str) -> Component {
    Component::new(name).with_request_handler(Arc::new(FailingRequestHandler::new(message)))
}

fn succeeding(name: &str) -> Component {
    Component::new(name).with_request_handler(Arc::new(FnRequestHandler::new(
        |_context: CompositionContext| async { Ok(()) },
    )))
}

fn handler_with_error_handler(
    name: &str,
    handler: Component,
    errors: RecordingErrorHandler,
) -> Component {
    let mut component = Component::new(name).with_error_handler(Arc::new(errors));
    if let Some(request_handler) = handler.request_handler() {
        component = component.with_request_handler(Arc::clone(request_handler));
    }
    component
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn failure_reaches_error_handler_and_caller() {
    let errors = RecordingErrorHandler::new();
    let inspector = InventoryErrorInspector::default();

    let engine = CompositionEngine::builder()
        .singleton(
            ComponentDescriptor::request_handler("inventory").with(Capability::ErrorHandler),
            Component::new("inventory")
                .with_request_handler(Arc::new(FnRequestHandler::new(
                    |_context: CompositionContext| async {
                        Err(anyhow::Error::new(InventoryUnavailable))
                    },
                )))
                .with_error_handler(Arc::new(errors.clone())),
        )
        .unwrap()
        .singleton(
            ComponentDescriptor::request_handler("audit").with(Capability::ErrorHandler),
            succeeding("audit").with_error_handler(Arc::new(inspector.clone())),
        )
        .unwrap()
        .route("c", ["inventory", "audit"])
        .unwrap()
        .build();

    let error = engine.handle_composable_request("c").await.unwrap_err();

    let CompositionError::HandlersFailed { request_id, source } = &error else {
        panic!("unexpected error: {error}");
    };
    assert_eq!(source.attempted(), 2);
    assert_eq!(error.failures().len(), 1);
    assert_eq!(
        error.failures()[0].error().downcast_ref::<InventoryUnavailable>(),
        Some(&InventoryUnavailable)
    );

    let calls = errors.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].request_id, *request_id);
    assert_eq!(calls[0].failed_components, vec!["inventory"]);
    assert_eq!(calls[0].failure_messages, vec!["inventory service unavailable"]);
    assert!(calls[0].message.contains(&request_id.to_string()));
    assert!(calls[0].message.contains("inventory service unavailable"));

    assert_eq!(
        *inspector.seen.lock().unwrap(),
        vec![Some(InventoryUnavailable)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn aggregate_lists_failures_in_registration_order() {
    let errors = RecordingErrorHandler::new();

    let engine = CompositionEngine::builder()
        .singleton(
            ComponentDescriptor::request_handler("slow"),
            Component::new("slow").with_request_handler(Arc::new(
                FailingRequestHandler::new("slow failed").with_delay(Duration::from_millis(40)),
            )),
        )
        .unwrap()
        .singleton(ComponentDescriptor::request_handler("ok"), succeeding("ok"))
        .unwrap()
        .singleton(
            ComponentDescriptor::request_handler("fast").with(Capability::ErrorHandler),
            handler_with_error_handler("fast", failing("fast", "fast failed"), errors.clone()),
        )
        .unwrap()
        .route("r", ["slow", "ok", "fast"])
        .unwrap()
        .build();

    for _ in 0..5 {
        CompositionTest::new(&engine)
            .when_route("r")
            .then_error(|error| {
                let components: Vec<&str> =
                    error.failures().iter().map(|f| f.component()).collect();
                assert_eq!(components, vec!["slow", "fast"]);
                assert_eq!(error.failures()[0].error().to_string(), "slow failed");
                assert_eq!(error.failures()[1].error().to_string(), "fast failed");
                assert_eq!(error.outcome(), "failed");
            })
            .run()
            .await;
    }

    assert_eq!(errors.call_count(), 5);
    assert!(
        errors
            .calls()
            .iter()
            .all(|call| call.failed_components == vec!["slow", "fast"])
    );
}

#[tokio::test]
async fn siblings_run_to_completion_before_failure_is_reported() {
    let log = CallLog::new();
    let sibling_log = log.clone();

    let engine = CompositionEngine::builder()
        .singleton(ComponentDescriptor::request_handler("fails"), failing("fails", "no"))
        .unwrap()
        .singleton(
            ComponentDescriptor::request_handler("slow"),
            Component::new("slow").with_request_handler(Arc::new(FnRequestHandler::new(
                move |_context: CompositionContext| {
                    let log = sibling_log.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        log.record("slow finished");
                        Ok(())
                    }
                },
            ))),
        )
        .unwrap()
        .route("r", ["fails", "slow"])
        .unwrap()
        .build();

    let error = engine.handle_composable_request("r").await.unwrap_err();
    assert_eq!(error.failures().len(), 1);
    assert_eq!(log.entries(), vec!["slow finished"]);
}

#[tokio::test]
async fn error_handlers_run_sequentially_in_registration_order() {
    let log = CallLog::new();

    let engine = CompositionEngine::builder()
        .singleton(
            ComponentDescriptor::request_handler("first").with(Capability::ErrorHandler),
            Component::new("first")
                .with_request_handler(Arc::new(FailingRequestHandler::new("boom")))
                .with_error_handler(Arc::new(NamedErrorHandler {
                    name: "first",
                    log: log.clone(),
                    delay: Duration::from_millis(30),
                })),
        )
        .unwrap()
        .singleton(
            ComponentDescriptor::events_subscriber("second").with(Capability::ErrorHandler),
            Component::new("second")
                .with_events_subscriber(Arc::new(FnEventsSubscriber::new(
                    |_subscriptions: &Subscriptions<'_>| {},
                )))
                .with_error_handler(Arc::new(NamedErrorHandler {
                    name: "second",
                    log: log.clone(),
                    delay: Duration::ZERO,
                })),
        )
        .unwrap()
        .route("r", ["first", "second"])
        .unwrap()
        .build();

    assert!(engine.handle_composable_request("r").await.is_err());
    assert_eq!(log.entries(), vec!["first", "second"]);
}

#[tokio::test]
async fn failing_error_handler_cannot_replace_the_original_failure() {
    let broken = RecordingErrorHandler::failing("error handler broke too");
    let healthy = RecordingErrorHandler::new();

    let engine = CompositionEngine::builder()
        .singleton(
            ComponentDescriptor::request_handler("a").with(Capability::ErrorHandler),
            handler_with_error_handler("a", failing("a", "original"), broken.clone()),
        )
        .unwrap()
        .singleton(
            ComponentDescriptor::request_handler("b").with(Capability::ErrorHandler),
            handler_with_error_handler("b", succeeding("b"), healthy.clone()),
        )
        .unwrap()
        .route("r", ["a", "b"])
        .unwrap()
        .build();

    CompositionTest::new(&engine)
        .when_route("r")
        .then_error(|error| {
            assert_eq!(error.failures().len(), 1);
            assert_eq!(error.failures()[0].error().to_string(), "original");
        })
        .run()
        .await;

    assert_eq!(broken.call_count(), 1);
    assert_eq!(healthy.call_count(), 1);
}

#[tokio::test]
async fn hung_error_handler_is_bounded_by_timeout() {
    let log = CallLog::new();

    let engine = CompositionEngine::builder()
        .singleton(
            ComponentDescriptor::request_handler("a").with(Capability::ErrorHandler),
            Component::new("a")
                .with_request_handler(Arc::new(FailingRequestHandler::new("boom")))
                .with_error_handler(Arc::new(NamedErrorHandler {
                    name: "hung",
                    log: log.clone(),
                    delay: Duration::from_secs(60),
                })),
        )
        .unwrap()
        .route("r", ["a"])
        .unwrap()
        .config(EngineConfig::default().with_error_handler_timeout(Some(Duration::from_millis(50))))
        .build();

    let started = Instant::now();
    let error = engine.handle_composable_request("r").await.unwrap_err();
    assert!(matches!(error, CompositionError::HandlersFailed { .. }));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(log.entries().is_empty());
}

#[tokio::test]
async fn panicking_handler_is_reported_as_failure() {
    let errors = RecordingErrorHandler::new();

    let engine = CompositionEngine::builder()
        .singleton(
            ComponentDescriptor::request_handler("panics").with(Capability::ErrorHandler),
            Component::new("panics")
                .with_request_handler(Arc::new(Panicking))
                .with_error_handler(Arc::new(errors.clone())),
        )
        .unwrap()
        .singleton(ComponentDescriptor::request_handler("ok"), succeeding("ok"))
        .unwrap()
        .route("r", ["panics", "ok"])
        .unwrap()
        .build();

    let error = engine.handle_composable_request("r").await.unwrap_err();
    assert_eq!(error.failures().len(), 1);
    assert_eq!(error.failures()[0].component(), "panics");
    assert!(
        error.failures()[0]
            .error()
            .downcast_ref::<tokio::task::JoinError>()
            .is_some_and(tokio::task::JoinError::is_panic)
    );
    assert_eq!(errors.call_count(), 1);
}

#[tokio::test]
async fn subscriber_failure_fails_the_raising_handler() {
    let engine = CompositionEngine::builder()
        .singleton(
            ComponentDescriptor::request_handler("raiser"),
            Component::new("raiser").with_request_handler(Arc::new(FnRequestHandler::new(
                |context: CompositionContext| async move {
                    context.raise_event(Ping).await?;
                    Ok(())
                },
            ))),
        )
        .unwrap()
        .singleton(
            ComponentDescriptor::events_subscriber("strict"),
            Component::new("strict").with_events_subscriber(Arc::new(FnEventsSubscriber::new(
                |subscriptions: &Subscriptions<'_>| {
                    subscriptions.subscribe(|_ping: Arc<Ping>, _context| async {
                        Err(anyhow::anyhow!("rejected ping"))
                    });
                },
            ))),
        )
        .unwrap()
        .route("r", ["raiser", "strict"])
        .unwrap()
        .build();

    let error = engine.handle_composable_request("r").await.unwrap_err();
    assert_eq!(error.failures().len(), 1);
    assert_eq!(error.failures()[0].component(), "raiser");

    let event_error = error.failures()[0]
        .error()
        .downcast_ref::<EventError>()
        .expect("event error is preserved");
    match event_error {
        EventError::SubscribersFailed { failures, .. } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].to_string(), "rejected ping");
        }
        EventError::Cancelled { .. } => panic!("dispatch was not cancelled"),
    }
}

#[tokio::test]
async fn unresolvable_component_fails_the_request() {
    let mut registry = CompositionRegistry::new();
    registry
        .register_component(ComponentDescriptor::request_handler("missing"))
        .unwrap();
    registry.bind_route("r", ["missing"]).unwrap();

    let engine = CompositionEngine::new(Arc::new(registry), Arc::new(ComponentProvider::new()));

    let error = engine.handle_composable_request("r").await.unwrap_err();
    assert!(matches!(
        error,
        CompositionError::Resolve {
            source: ResolveError::UnknownComponent(ref name),
            ..
        } if name == "missing"
    ));
    assert_eq!(error.outcome(), "setup_failed");
}

#[tokio::test]
async fn global_factory_without_factory_instance_is_reported() {
    let engine = CompositionEngine::builder()
        .singleton(ComponentDescriptor::request_handler("ok"), succeeding("ok"))
        .unwrap()
        .global_view_model_factory(ComponentDescriptor::view_model_factory("hollow"), || {
            Component::new("hollow")
        })
        .unwrap()
        .route("r", ["ok"])
        .unwrap()
        .build();

    let error = engine.handle_composable_request("r").await.unwrap_err();
    assert!(matches!(
        error,
        CompositionError::MissingCapability { ref component, .. } if component == "hollow"
    ));
}
