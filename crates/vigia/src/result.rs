//! Result and error types for Vigia.
//!
//! Cardinality and staleness errors are expected while the page under test
//! is still rendering; the poller retries them. Everything else is an
//! infrastructure failure and propagates immediately.

use std::time::Duration;
use thiserror::Error;

/// Result type for Vigia operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors that can occur while driving a browser
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Locator matched no element
    #[error("Unable to find {selector}{}{}", scope_suffix(.scope.as_deref()), waited_suffix(*.waited))]
    NotFound {
        /// Selector description
        selector: String,
        /// Parent scope description, if any
        scope: Option<String>,
        /// How long the locator waited before giving up
        waited: Option<Duration>,
    },

    /// Locator matched several elements where one was required
    #[error("Ambiguous match, found {count} elements matching {selector}{}", scope_suffix(.scope.as_deref()))]
    AmbiguousMatch {
        /// Selector description
        selector: String,
        /// Parent scope description, if any
        scope: Option<String>,
        /// Number of matching elements
        count: usize,
    },

    /// A polled condition missed its deadline
    #[error(
        "Timed out after {:.2}s waiting for {label} (timeout {:.2}s): {last_failure}",
        .elapsed.as_secs_f64(),
        .timeout.as_secs_f64()
    )]
    Timeout {
        /// Label of the condition
        label: String,
        /// Time spent polling
        elapsed: Duration,
        /// Configured timeout
        timeout: Duration,
        /// Last observed failure
        last_failure: String,
        /// Last retryable error, if the final attempt failed with one
        cause: Option<Box<HarnessError>>,
    },

    /// A page's ready signal never appeared after navigation
    #[error(
        "Page {page} never became ready at {url}: {ready} not present after {:.2}s",
        .elapsed.as_secs_f64()
    )]
    NavigationTimeout {
        /// Page object name
        page: String,
        /// Navigated URL
        url: String,
        /// Ready signal description
        ready: String,
        /// Time spent waiting
        elapsed: Duration,
    },

    /// Element handle no longer attached to the document
    #[error("Stale element reference: {element}")]
    StaleReference {
        /// Element handle id
        element: String,
    },

    /// Element exists but cannot receive the action yet
    #[error("Element {selector} is not interactable: {reason}")]
    NotInteractable {
        /// Selector description
        selector: String,
        /// Why the action was refused
        reason: String,
    },

    /// An expectation evaluated inside a retried block did not hold
    #[error("Assertion failed: {message}")]
    AssertionFailed {
        /// Error message
        message: String,
    },

    /// Cleanup after a scenario failed
    #[error("Scenario teardown failed: {}", .failures.join("; "))]
    ContextTeardown {
        /// One entry per failed cleanup step
        failures: Vec<String>,
    },

    /// Selector cannot be evaluated by the driver
    #[error("Invalid selector {selector}: {message}")]
    InvalidSelector {
        /// Selector description
        selector: String,
        /// Error message
        message: String,
    },

    /// The browser process or connection is gone
    #[error("Browser closed: {message}")]
    BrowserClosed {
        /// Error message
        message: String,
    },

    /// Low-level driver failure
    #[error("Driver error: {message}")]
    Driver {
        /// Error message
        message: String,
        /// Whether retrying may help
        transient: bool,
    },

    /// Browser permission missing (clipboard, ...)
    #[error("Permission denied: {permission}")]
    PermissionDenied {
        /// Permission name
        permission: String,
    },

    /// Fixture setup or teardown failure
    #[error("Fixture '{fixture}' failed: {message}")]
    Fixture {
        /// Fixture name
        fixture: String,
        /// Error message
        message: String,
    },

    /// Service double failure
    #[error("Service double {double} failed: {message}")]
    Double {
        /// Double name
        double: String,
        /// Error message
        message: String,
    },

    /// Invalid configuration or route
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

fn scope_suffix(scope: Option<&str>) -> String {
    scope.map(|s| format!(" within {s}")).unwrap_or_default()
}

fn waited_suffix(waited: Option<Duration>) -> String {
    waited
        .map(|w| format!(" (waited {:.2}s)", w.as_secs_f64()))
        .unwrap_or_default()
}

impl HarnessError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a non-transient driver error
    #[must_use]
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
            transient: false,
        }
    }

    /// Create a transient driver error
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
            transient: true,
        }
    }

    /// Create an assertion failure
    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::AssertionFailed {
            message: message.into(),
        }
    }

    /// Create a service double error
    #[must_use]
    pub fn double(double: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Double {
            double: double.into(),
            message: message.into(),
        }
    }

    /// Whether the poller should treat this error as "not yet".
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::NotFound { .. }
            | Self::AmbiguousMatch { .. }
            | Self::StaleReference { .. }
            | Self::NotInteractable { .. }
            | Self::AssertionFailed { .. } => true,
            Self::Driver { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Whether this error means the element is not on the page.
    #[must_use]
    pub const fn is_absence(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::StaleReference { .. })
    }

    /// Selectors mentioned by this error, for failure reports.
    #[must_use]
    pub fn selectors(&self) -> Vec<String> {
        match self {
            Self::NotFound {
                selector, scope, ..
            }
            | Self::AmbiguousMatch {
                selector, scope, ..
            } => {
                let mut out = vec![selector.clone()];
                out.extend(scope.iter().cloned());
                out
            }
            Self::NotInteractable { selector, .. } | Self::InvalidSelector { selector, .. } => {
                vec![selector.clone()]
            }
            Self::NavigationTimeout { ready, .. } => vec![ready.clone()],
            Self::Timeout { cause, .. } => cause.as_ref().map(|c| c.selectors()).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Short machine-readable kind used in reports.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AmbiguousMatch { .. } => "ambiguous_match",
            Self::Timeout { .. } => "timeout",
            Self::NavigationTimeout { .. } => "navigation_timeout",
            Self::StaleReference { .. } => "stale_reference",
            Self::NotInteractable { .. } => "not_interactable",
            Self::AssertionFailed { .. } => "assertion_failed",
            Self::ContextTeardown { .. } => "context_teardown",
            Self::InvalidSelector { .. } => "invalid_selector",
            Self::BrowserClosed { .. } => "browser_closed",
            Self::Driver { .. } => "driver",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Fixture { .. } => "fixture",
            Self::Double { .. } => "double",
            Self::Config { .. } => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Yaml(_) => "yaml",
        }
    }
}
