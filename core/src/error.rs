//! Error taxonomy for view model composition.
//!
//! Errors are split by the layer that raises them:
//!
//! - [`EventError`] - a `raise_event` call whose subscribers failed or were cancelled
//! - [`ResolveError`] - the instantiation provider could not produce a component
//! - [`RegistrationError`] - setup-time validation, before any request runs
//! - [`CompositionError`] - the request-level outcome observed by callers
//!
//! Handler-authored failures are plain [`anyhow::Error`] values. The engine wraps
//! each one in a [`HandlerFailure`] so the originating component stays visible, and
//! groups them in an [`AggregateHandlerError`] when the join completes.

use crate::context::RequestId;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type returned by request handlers, event callbacks and error handlers.
pub type HandlerResult = Result<(), anyhow::Error>;

/// Errors raised by [`CompositionContext::raise_event`](crate::context::CompositionContext::raise_event).
#[derive(Error, Debug)]
pub enum EventError {
    /// One or more subscribers returned an error
    #[error("{} subscriber(s) failed while handling event '{event_type}'", .failures.len())]
    SubscribersFailed {
        /// Type name of the raised event
        event_type: &'static str,
        /// Every failure, in subscription order
        failures: Vec<anyhow::Error>,
    },

    /// The request was cancelled while subscribers were running
    #[error("Dispatch of event '{event_type}' was cancelled")]
    Cancelled {
        /// Type name of the raised event
        event_type: &'static str,
    },
}

/// Errors returned by an [`InstanceResolver`](crate::component::InstanceResolver).
#[derive(Error, Debug)]
pub enum ResolveError {
    /// No constructor is known for the descriptor
    #[error("No provider registered for component '{0}'")]
    UnknownComponent(String),

    /// The constructor ran but could not build the instance
    #[error("Failed to construct component '{component}': {reason}")]
    Construction {
        /// Component name
        component: String,
        /// Why construction failed
        reason: String,
    },
}

/// Setup-time validation failures.
///
/// These are raised while routes and components are being registered, never
/// while a request is executing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// The component declares none of the capabilities a route can use
    #[error(
        "Component '{0}' must be a request handler, an events subscriber, or a route-scoped view model factory"
    )]
    NoRecognizedCapability(String),

    /// A component with the same name was already registered
    #[error("Component '{0}' is already registered")]
    DuplicateComponent(String),

    /// A route references a component that was never registered
    #[error("Route '{route}' references unknown component '{component}'")]
    UnknownComponent {
        /// Route key
        route: String,
        /// Component name
        component: String,
    },

    /// The same component was bound twice to one route
    #[error("Component '{component}' is bound more than once to route '{route}'")]
    DuplicateRouteComponent {
        /// Route key
        route: String,
        /// Component name
        component: String,
    },

    /// More than one view model factory bound to one route
    #[error(
        "Only one route-scoped view model factory is allowed per route. Route '{route}' is bound to both '{existing}' and '{rejected}'"
    )]
    MultipleRouteScopedFactories {
        /// Route key
        route: String,
        /// Factory already bound
        existing: String,
        /// Factory that was rejected
        rejected: String,
    },

    /// A global view model factory is already registered
    #[error(
        "Only one global view model factory is supported. '{existing}' is already registered as the global view model factory"
    )]
    DuplicateGlobalViewModelFactory {
        /// Factory already registered
        existing: String,
    },

    /// The component registered as global factory cannot create view models
    #[error("Component '{0}' does not declare the view model factory capability")]
    NotAViewModelFactory(String),
}

/// A single request handler failure, tagged with the component that raised it.
#[derive(Error, Debug)]
#[error("Component '{component}' failed")]
pub struct HandlerFailure {
    component: String,
    #[source]
    error: anyhow::Error,
}

impl HandlerFailure {
    /// Create a failure for `component`
    #[must_use]
    pub fn new(component: impl Into<String>, error: anyhow::Error) -> Self {
        Self {
            component: component.into(),
            error,
        }
    }

    /// Name of the component whose handler failed
    #[must_use]
    pub fn component(&self) -> &str {
        &self.component
    }

    /// The error the handler returned
    ///
    /// Use [`anyhow::Error::downcast_ref`] to recover a concrete error type.
    #[must_use]
    pub const fn error(&self) -> &anyhow::Error {
        &self.error
    }
}

/// Every request handler failure observed at the join point of one request.
///
/// Failures are ordered by component registration order, never by completion
/// order, so the same set of failures always produces the same aggregate.
///
/// The message lists every failure. [`source`](std::error::Error::source) is the
/// first failure, whose own source is the handler's error.
#[derive(Debug)]
pub struct AggregateHandlerError {
    failures: Vec<HandlerFailure>,
    attempted: usize,
}

impl AggregateHandlerError {
    /// Build an aggregate from failures already in registration order
    #[must_use]
    pub const fn new(failures: Vec<HandlerFailure>, attempted: usize) -> Self {
        Self {
            failures,
            attempted,
        }
    }

    /// Individual failures, in registration order
    #[must_use]
    pub fn failures(&self) -> &[HandlerFailure] {
        &self.failures
    }

    /// Number of request handlers that were started
    #[must_use]
    pub const fn attempted(&self) -> usize {
        self.attempted
    }
}

impl fmt::Display for AggregateHandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} request handler(s) failed",
            self.failures.len(),
            self.attempted
        )?;
        for (index, failure) in self.failures.iter().enumerate() {
            let separator = if index == 0 { ": " } else { "; " };
            write!(f, "{separator}{}: {:#}", failure.component, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateHandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|failure| failure as &(dyn std::error::Error + 'static))
    }
}

/// Request-level failure returned by the composition engine.
#[derive(Error, Debug)]
pub enum CompositionError {
    /// A component could not be resolved to an instance
    #[error("Failed to resolve components for route '{route}': {source}")]
    Resolve {
        /// Route key
        route: String,
        /// Resolver error
        #[source]
        source: ResolveError,
    },

    /// A resolved instance does not provide a capability the engine needed
    #[error("Component '{component}' does not provide the {capability} capability")]
    MissingCapability {
        /// Component name
        component: String,
        /// Capability that was expected
        capability: &'static str,
    },

    /// One or more request handlers failed
    #[error("Composition of request {request_id} failed: {source}")]
    HandlersFailed {
        /// Request identifier
        request_id: RequestId,
        /// Every failure, in registration order
        #[source]
        source: AggregateHandlerError,
    },

    /// The caller cancelled the request
    #[error("Composition of request {request_id} was cancelled")]
    Cancelled {
        /// Request identifier
        request_id: RequestId,
    },

    /// The configured request timeout elapsed before all handlers completed
    #[error("Composition of request {request_id} timed out after {timeout:?}")]
    TimedOut {
        /// Request identifier
        request_id: RequestId,
        /// The timeout that elapsed
        timeout: Duration,
    },
}

impl CompositionError {
    /// Handler failures carried by this error
    ///
    /// Empty for every variant except [`CompositionError::HandlersFailed`].
    #[must_use]
    pub fn failures(&self) -> &[HandlerFailure] {
        match self {
            Self::HandlersFailed { source, .. } => source.failures(),
            _ => &[],
        }
    }

    /// Check if this error is a cancellation or timeout rather than a failure
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::TimedOut { .. })
    }

    /// Short label used as the `outcome` metrics dimension
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::Resolve { .. } | Self::MissingCapability { .. } => "setup_failed",
            Self::HandlersFailed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
            Self::TimedOut { .. } => "timed_out",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error, PartialEq)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn aggregate_preserves_order_and_original_errors() {
        let aggregate = AggregateHandlerError::new(
            vec![
                HandlerFailure::new("first", anyhow::Error::new(Boom)),
                HandlerFailure::new("second", anyhow::anyhow!("plain")),
            ],
            3,
        );

        assert_eq!(aggregate.attempted(), 3);
        assert_eq!(aggregate.failures()[0].component(), "first");
        assert_eq!(aggregate.failures()[0].error().downcast_ref::<Boom>(), Some(&Boom));
        assert_eq!(
            aggregate.to_string(),
            "2 of 3 request handler(s) failed: first: boom; second: plain"
        );
    }

    #[test]
    fn handler_error_is_reachable_through_the_source_chain() {
        let error = CompositionError::HandlersFailed {
            request_id: RequestId::new(),
            source: AggregateHandlerError::new(
                vec![HandlerFailure::new("inventory", anyhow::Error::new(Boom))],
                1,
            ),
        };

        let chain: Vec<String> = anyhow::Error::new(error)
            .chain()
            .map(ToString::to_string)
            .collect();
        assert_eq!(chain.len(), 4);
        assert!(chain[0].ends_with("1 of 1 request handler(s) failed: inventory: boom"));
        assert_eq!(chain[2], "Component 'inventory' failed");
        assert_eq!(chain[3], "boom");

        let failure = HandlerFailure::new("a", anyhow::Error::new(Boom));
        let root = std::error::Error::source(&failure)
            .and_then(|source| source.downcast_ref::<Boom>());
        assert_eq!(root, Some(&Boom));
    }

    #[test]
    fn failures_are_empty_for_cancellation() {
        let error = CompositionError::Cancelled {
            request_id: RequestId::new(),
        };
        assert!(error.failures().is_empty());
        assert!(error.is_cancellation());
        assert_eq!(error.outcome(), "cancelled");
    }

    #[test]
    fn registration_error_messages_name_the_route() {
        let error = RegistrationError::MultipleRouteScopedFactories {
            route: "products/{id}".to_string(),
            existing: "a".to_string(),
            rejected: "b".to_string(),
        };
        assert!(error.to_string().contains("products/{id}"));
    }
}
