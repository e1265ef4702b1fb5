//! Exporter, responder and logging configuration.
//!
//! Every struct deserializes with defaults for missing fields and can be
//! built from environment variables via `from_env()`.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default response wait for `publish_signal`.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(20);

/// Default interval between repeated `initialization` announcements.
pub const DEFAULT_REPUBLISH_INTERVAL: Duration = Duration::from_secs(1);

/// Default buffer for listener diagnostics.
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 64;

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    EmptyName(&'static str),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),
}

fn env_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

fn default_runner_host(lookup: &impl Fn(&str) -> Option<String>) -> String {
    lookup("HOSTNAME").unwrap_or_else(|| "localhost".to_string())
}

// =============================================================================
// EXPORTER
// =============================================================================

/// Exporter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Name of the exporting process, embedded in the publisher id
    pub process_name: String,
    /// Host the exporter runs on
    pub runner_host: String,
    /// Response wait used when a publish does not set its own
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
    /// Interval for periodic `initialization` re-announcement
    #[serde(with = "humantime_serde")]
    pub republish_interval: Duration,
    /// Listener diagnostics buffer
    pub diagnostics_capacity: usize,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            process_name: "state-signals".to_string(),
            runner_host: "localhost".to_string(),
            default_timeout: DEFAULT_RESPONSE_TIMEOUT,
            republish_interval: DEFAULT_REPUBLISH_INTERVAL,
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
        }
    }
}

impl ExporterConfig {
    /// Configuration for a named process, other fields at their defaults.
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            ..Self::default()
        }
    }

    pub fn with_runner_host(mut self, runner_host: impl Into<String>) -> Self {
        self.runner_host = runner_host.into();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_republish_interval(mut self, interval: Duration) -> Self {
        self.republish_interval = interval;
        self
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SIGNALS_PROCESS_NAME`: Process name (default: state-signals)
    /// - `SIGNALS_RUNNER_HOST` or `HOSTNAME`: Runner host (default: localhost)
    /// - `SIGNALS_DEFAULT_TIMEOUT_MS`: Response wait in milliseconds (default: 20000)
    /// - `SIGNALS_REPUBLISH_INTERVAL_MS`: Re-announcement interval (default: 1000)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            process_name: lookup("SIGNALS_PROCESS_NAME").unwrap_or(defaults.process_name),
            runner_host: lookup("SIGNALS_RUNNER_HOST")
                .unwrap_or_else(|| default_runner_host(&lookup)),
            default_timeout: lookup("SIGNALS_DEFAULT_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_timeout),
            republish_interval: lookup("SIGNALS_REPUBLISH_INTERVAL_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.republish_interval),
            diagnostics_capacity: defaults.diagnostics_capacity,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.process_name.trim().is_empty() {
            return Err(ConfigError::EmptyName("process_name"));
        }
        if self.default_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("default_timeout"));
        }
        if self.republish_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("republish_interval"));
        }
        if self.diagnostics_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("diagnostics_capacity"));
        }
        Ok(())
    }
}

// =============================================================================
// RESPONDER
// =============================================================================

/// Responder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// Name embedded in the responder id
    pub responder_name: String,
    /// Only handle signals carrying this tag (reserved events always pass)
    pub lock_tag: Option<String>,
    /// Listener diagnostics buffer
    pub diagnostics_capacity: usize,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            responder_name: "responder".to_string(),
            lock_tag: None,
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
        }
    }
}

impl ResponderConfig {
    pub fn new(responder_name: impl Into<String>) -> Self {
        Self {
            responder_name: responder_name.into(),
            ..Self::default()
        }
    }

    pub fn with_lock_tag(mut self, tag: impl Into<String>) -> Self {
        self.lock_tag = Some(tag.into());
        self
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SIGNALS_RESPONDER_NAME`: Responder name (default: responder)
    /// - `SIGNALS_LOCK_TAG`: Tag filter (default: none)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            responder_name: lookup("SIGNALS_RESPONDER_NAME").unwrap_or(defaults.responder_name),
            lock_tag: lookup("SIGNALS_LOCK_TAG").filter(|tag| !tag.is_empty()),
            diagnostics_capacity: defaults.diagnostics_capacity,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.responder_name.trim().is_empty() {
            return Err(ConfigError::EmptyName("responder_name"));
        }
        if self.diagnostics_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("diagnostics_capacity"));
        }
        Ok(())
    }
}

// =============================================================================
// LOGGING
// =============================================================================

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to emit JSON formatted logs
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SIGNALS_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `SIGNALS_JSON_LOGS`: Enable JSON logs (default: false)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            level: lookup("SIGNALS_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or_else(|| "info".to_string()),
            json: lookup("SIGNALS_JSON_LOGS")
                .map(|v| env_flag(&v))
                .unwrap_or(false),
        }
    }
}
