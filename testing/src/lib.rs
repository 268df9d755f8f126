//! # View Composer Testing
//!
//! Testing utilities and helpers for view model composition.
//!
//! This crate provides:
//! - Closure-backed components (handlers, subscribers, factories)
//! - Recording error handlers and call logs for ordering assertions
//! - A deterministic clock
//! - Property-based testing strategies for view model contents
//! - A Given-When-Then harness for engine requests ([`CompositionTest`])
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use view_composer_core::{Component, ComponentDescriptor};
//! use view_composer_runtime::CompositionEngine;
//! use view_composer_testing::{CompositionTest, FnRequestHandler};
//!
//! # tokio_test::block_on(async {
//! let engine = CompositionEngine::builder()
//!     .component(ComponentDescriptor::request_handler("a"), || {
//!         Component::new("a").with_request_handler(Arc::new(FnRequestHandler::new(
//!             |context| async move {
//!                 if let Some(vm) = context.dynamic_view_model() {
//!                     vm.set("A", 1);
//!                 }
//!                 Ok(())
//!             },
//!         )))
//!     })
//!     .and_then(|builder| builder.route("r", ["a"]))
//!     .map(|builder| builder.build())
//!     .unwrap_or_else(|e| panic!("{e}"));
//!
//! CompositionTest::new(&engine)
//!     .when_route("r")
//!     .then_view_model(|vm| assert_eq!(vm.get("A"), Some(1.into())))
//!     .run()
//!     .await;
//! # });
//! ```

use chrono::{DateTime, Utc};
use view_composer_core::environment::Clock;


pub use composition_test::CompositionTest;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::future::Future;
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;
    use view_composer_core::async_trait;
    use view_composer_core::{
        CompositionContext, CompositionError, ErrorHandler, EventsSubscriber, HandlerResult,
        RequestHandler, RequestId, Subscriptions, ViewModel, ViewModelFactory,
    };

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use view_composer_testing::mocks::FixedClock;
    /// use view_composer_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which cannot happen.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Request handler backed by a closure
    ///
    /// The closure receives a clone of the context, so the returned future
    /// owns everything it touches.
    pub struct FnRequestHandler<F> {
        handler: F,
    }

    impl<F, Fut> FnRequestHandler<F>
    where
        F: Fn(CompositionContext) -> Fut + Send + Sync,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        /// Wrap `handler`
        #[must_use]
        pub const fn new(handler: F) -> Self {
            Self { handler }
        }
    }

    #[async_trait]
    impl<F, Fut> RequestHandler for FnRequestHandler<F>
    where
        F: Fn(CompositionContext) -> Fut + Send + Sync,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        async fn handle(&self, context: &CompositionContext) -> HandlerResult {
            (self.handler)(context.clone()).await
        }
    }

    /// Events subscriber backed by a closure
    pub struct FnEventsSubscriber<F> {
        subscribe: F,
    }

    impl<F> FnEventsSubscriber<F>
    where
        F: Fn(&Subscriptions<'_>) + Send + Sync,
    {
        /// Wrap `subscribe`
        #[must_use]
        pub const fn new(subscribe: F) -> Self {
            Self { subscribe }
        }
    }

    impl<F> EventsSubscriber for FnEventsSubscriber<F>
    where
        F: Fn(&Subscriptions<'_>) + Send + Sync,
    {
        fn subscribe(&self, subscriptions: &Subscriptions<'_>) {
            (self.subscribe)(subscriptions);
        }
    }

    /// View model factory backed by a closure
    pub struct FnViewModelFactory<F> {
        create: F,
    }

    impl<F> FnViewModelFactory<F>
    where
        F: Fn(&CompositionContext) -> Arc<dyn ViewModel> + Send + Sync,
    {
        /// Wrap `create`
        #[must_use]
        pub const fn new(create: F) -> Self {
            Self { create }
        }
    }

    impl<F> ViewModelFactory for FnViewModelFactory<F>
    where
        F: Fn(&CompositionContext) -> Arc<dyn ViewModel> + Send + Sync,
    {
        fn create_view_model(&self, context: &CompositionContext) -> Arc<dyn ViewModel> {
            (self.create)(context)
        }
    }

    /// Request handler that fails with a fixed message
    #[derive(Debug, Clone)]
    pub struct FailingRequestHandler {
        message: String,
        delay: Option<Duration>,
    }

    impl FailingRequestHandler {
        /// Fail immediately with `message`
        #[must_use]
        pub fn new(message: impl Into<String>) -> Self {
            Self {
                message: message.into(),
                delay: None,
            }
        }

        /// Sleep for `delay` before failing
        #[must_use]
        pub const fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl RequestHandler for FailingRequestHandler {
        async fn handle(&self, _context: &CompositionContext) -> HandlerResult {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Err(anyhow::anyhow!("{}", self.message))
        }
    }

    /// What a [`RecordingErrorHandler`] observed for one failed request
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RecordedError {
        /// Request that failed
        pub request_id: RequestId,
        /// Display form of the error
        pub message: String,
        /// Failed components, in the order the error reported them
        pub failed_components: Vec<String>,
        /// Each failed handler's own error, in the same order
        pub failure_messages: Vec<String>,
    }

    /// Error handler that records every notification
    #[derive(Debug, Clone, Default)]
    pub struct RecordingErrorHandler {
        calls: Arc<Mutex<Vec<RecordedError>>>,
        fail_with: Option<String>,
    }

    impl RecordingErrorHandler {
        /// Record and succeed
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Record, then fail with `message`
        #[must_use]
        pub fn failing(message: impl Into<String>) -> Self {
            Self {
                calls: Arc::default(),
                fail_with: Some(message.into()),
            }
        }

        /// Every notification received so far
        #[must_use]
        pub fn calls(&self) -> Vec<RecordedError> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Number of notifications received so far
        #[must_use]
        pub fn call_count(&self) -> usize {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }
    }

    #[async_trait]
    impl ErrorHandler for RecordingErrorHandler {
        async fn on_request_error(
            &self,
            context: &CompositionContext,
            error: &CompositionError,
        ) -> HandlerResult {
            let recorded = RecordedError {
                request_id: context.request_id(),
                message: error.to_string(),
                failed_components: error
                    .failures()
                    .iter()
                    .map(|failure| failure.component().to_string())
                    .collect(),
                failure_messages: error
                    .failures()
                    .iter()
                    .map(|failure| format!("{:#}", failure.error()))
                    .collect(),
            };
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(recorded);

            match &self.fail_with {
                Some(message) => Err(anyhow::anyhow!("{message}")),
                None => Ok(()),
            }
        }
    }

    /// Shared, ordered log of named steps
    ///
    /// Clones append to the same log.
    #[derive(Debug, Clone, Default)]
    pub struct CallLog {
        entries: Arc<Mutex<Vec<String>>>,
    }

    impl CallLog {
        /// Create an empty log
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Append an entry
        pub fn record(&self, entry: impl Into<String>) {
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(entry.into());
        }

        /// Snapshot of every entry, oldest first
        #[must_use]
        pub fn entries(&self) -> Vec<String> {
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Number of entries equal to `entry`
        #[must_use]
        pub fn count(&self, entry: &str) -> usize {
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|e| e.as_str() == entry)
                .count()
        }

        /// Position of the first entry equal to `entry`
        #[must_use]
        pub fn position(&self, entry: &str) -> Option<usize> {
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .position(|e| e.as_str() == entry)
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use tracing_subscriber::EnvFilter;

    /// Install a test-friendly tracing subscriber
    ///
    /// Honors `RUST_LOG`, defaulting to `debug` for the composer crates.
    /// Safe to call from every test; only the first call installs.
    pub fn init_test_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("view_composer_core=debug,view_composer_runtime=debug")
        });
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use serde_json::Value;
    use std::collections::HashMap;

    /// Property names as handlers typically write them
    pub fn property_name() -> impl Strategy<Value = String> {
        "[A-Z][A-Za-z0-9]{0,15}"
    }

    /// Scalar JSON values
    pub fn scalar_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[ -~]{0,24}".prop_map(Value::from),
        ]
    }

    /// JSON values up to two levels deep
    pub fn json_value() -> impl Strategy<Value = Value> {
        scalar_value().prop_recursive(2, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
                prop::collection::hash_map(property_name(), inner, 0..4)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    /// A set of named properties, as one handler might contribute
    pub fn property_map(max_len: usize) -> impl Strategy<Value = HashMap<String, Value>> {
        prop::collection::hash_map(property_name(), json_value(), 0..=max_len)
    }
}

// Re-export commonly used items
pub use helpers::init_test_tracing;
pub use mocks::{
    CallLog, FailingRequestHandler, FixedClock, FnEventsSubscriber, FnRequestHandler,
    FnViewModelFactory, RecordedError, RecordingErrorHandler, test_clock,
};
