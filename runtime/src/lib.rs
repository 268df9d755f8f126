//! # View Composer Runtime
//!
//! Runtime for composing request-scoped view models.
//!
//! The [`CompositionEngine`] resolves the components bound to a route, runs
//! their two phases (subscribe, then execute concurrently) against a fresh
//! [`CompositionContext`](view_composer_core::CompositionContext), and either
//! returns the composed view model or an aggregate of every handler failure.
//!
//! ## Core Components
//!
//! - **Engine**: Per-request orchestration, error handlers and cleanup
//! - **Registry**: Validated route to component bindings
//! - **Provider**: Name-keyed instance resolution (transient or singleton)
//! - **Config / Metrics**: Timeouts, environment loading, Prometheus export
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use view_composer_core::async_trait;
//! use view_composer_core::{Component, ComponentDescriptor, CompositionContext, HandlerResult, RequestHandler};
//! use view_composer_runtime::CompositionEngine;
//!
//! struct Name;
//!
//! #[async_trait]
//! impl RequestHandler for Name {
//!     async fn handle(&self, context: &CompositionContext) -> HandlerResult {
//!         if let Some(vm) = context.dynamic_view_model() {
//!             vm.set("Name", "Ada");
//!         }
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = CompositionEngine::builder()
//!     .component(ComponentDescriptor::request_handler("name"), || {
//!         Component::new("name").with_request_handler(Arc::new(Name))
//!     })?
//!     .route("person", ["name"])?
//!     .build();
//!
//! let composition = engine.handle_composable_request("person").await?;
//! let vm = composition.and_then(|c| c.dynamic_view_model());
//! assert_eq!(vm.and_then(|vm| vm.get("Name")), Some("Ada".into()));
//! # Ok(())
//! # }
//! ```

/// Builder wiring registry and provider together
pub mod builder;

/// Engine configuration
pub mod config;

/// The per-request composition engine
pub mod engine;

/// Prometheus metrics for observability
pub mod metrics;

/// Route registration and instance resolution
pub mod registry;

pub use builder::CompositionEngineBuilder;
pub use config::{ConfigError, EngineConfig};
pub use engine::{Composition, CompositionEngine};
pub use registry::{ComponentProvider, CompositionRegistry};
