//! Injected environment dependencies.
//!
//! The engine never reads process-wide state directly; time comes from a
//! [`Clock`] handed to it at construction.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time for testability
///
/// # Examples
///
/// ```
/// use view_composer_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let before = clock.now();
/// assert!(clock.now() >= before);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
