//! Engine configuration.
//!
//! Configuration is plain data with builder-style setters. It can also be read
//! from environment variables, where unset variables keep their defaults:
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `VIEW_COMPOSER_REQUEST_TIMEOUT_MS` | Abandon the join after this many ms | unset (no timeout) |
//! | `VIEW_COMPOSER_ERROR_HANDLER_TIMEOUT_MS` | Bound on each error handler, `0` disables | `5000` |
//! | `VIEW_COMPOSER_RECORD_METRICS` | `true`/`false` | `true` |
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use view_composer_runtime::config::EngineConfig;
//!
//! let config = EngineConfig::default()
//!     .with_request_timeout(Duration::from_secs(2))
//!     .with_metrics(false);
//!
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;
use thiserror::Error;

/// Request timeout variable
pub const REQUEST_TIMEOUT_VAR: &str = "VIEW_COMPOSER_REQUEST_TIMEOUT_MS";
/// Error handler timeout variable
pub const ERROR_HANDLER_TIMEOUT_VAR: &str = "VIEW_COMPOSER_ERROR_HANDLER_TIMEOUT_MS";
/// Metrics toggle variable
pub const RECORD_METRICS_VAR: &str = "VIEW_COMPOSER_RECORD_METRICS";

const DEFAULT_ERROR_HANDLER_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable holds a value that cannot be parsed
    #[error("Invalid value '{value}' for {variable}: {reason}")]
    InvalidValue {
        /// Variable name
        variable: &'static str,
        /// Raw value
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// Configuration values are inconsistent
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Runtime settings for a [`CompositionEngine`](crate::engine::CompositionEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Abandon the join with a timeout outcome after this long
    pub request_timeout: Option<Duration>,
    /// Upper bound on each error handler notification
    pub error_handler_timeout: Option<Duration>,
    /// Whether the engine records request metrics
    pub record_metrics: bool,
}

impl EngineConfig {
    /// Create a configuration with custom values
    #[must_use]
    pub const fn new(
        request_timeout: Option<Duration>,
        error_handler_timeout: Option<Duration>,
        record_metrics: bool,
    ) -> Self {
        Self {
            request_timeout,
            error_handler_timeout,
            record_metrics,
        }
    }

    /// Set the request timeout
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set or clear the per error handler timeout
    #[must_use]
    pub const fn with_error_handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.error_handler_timeout = timeout;
        self
    }

    /// Enable or disable metrics recording
    #[must_use]
    pub const fn with_metrics(mut self, enabled: bool) -> Self {
        self.record_metrics = enabled;
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if a timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ConfigError::Validation(
                "request_timeout must be > 0".to_string(),
            ));
        }
        if self.error_handler_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ConfigError::Validation(
                "error_handler_timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is malformed or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is malformed or the result is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(REQUEST_TIMEOUT_VAR) {
            config.request_timeout = Some(parse_millis(REQUEST_TIMEOUT_VAR, &raw)?);
        }

        if let Some(raw) = lookup(ERROR_HANDLER_TIMEOUT_VAR) {
            let timeout = parse_millis(ERROR_HANDLER_TIMEOUT_VAR, &raw)?;
            config.error_handler_timeout = (!timeout.is_zero()).then_some(timeout);
        }

        if let Some(raw) = lookup(RECORD_METRICS_VAR) {
            config.record_metrics = match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        variable: RECORD_METRICS_VAR,
                        value: raw,
                        reason: "expected a boolean".to_string(),
                    });
                }
            };
        }

        config.validate()?;
        Ok(config)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: None,
            error_handler_timeout: Some(DEFAULT_ERROR_HANDLER_TIMEOUT),
            record_metrics: true,
        }
    }
}

fn parse_millis(variable: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ConfigError::InvalidValue {
            variable,
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = EngineConfig::from_lookup(|_| None).unwrap_or_default();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.request_timeout, None);
        assert!(config.record_metrics);
    }

    #[test]
    fn reads_every_variable() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            (REQUEST_TIMEOUT_VAR, "1500"),
            (ERROR_HANDLER_TIMEOUT_VAR, "0"),
            (RECORD_METRICS_VAR, "off"),
        ]));

        assert_eq!(
            config,
            Ok(EngineConfig::new(
                Some(Duration::from_millis(1500)),
                None,
                false
            ))
        );
    }

    #[test]
    fn rejects_malformed_values() {
        let result = EngineConfig::from_lookup(lookup_from(&[(REQUEST_TIMEOUT_VAR, "soon")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                variable: REQUEST_TIMEOUT_VAR,
                ..
            })
        ));

        let result = EngineConfig::from_lookup(lookup_from(&[(RECORD_METRICS_VAR, "maybe")]));
        assert!(result.is_err());
    }

    #[test]
    fn zero_request_timeout_is_invalid() {
        let result = EngineConfig::from_lookup(lookup_from(&[(REQUEST_TIMEOUT_VAR, "0")]));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }
}
