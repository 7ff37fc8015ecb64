//! Result and error types for Pawl.

use thiserror::Error;

use crate::driver::DriverError;

/// Result type for Pawl operations
pub type PawlResult<T> = Result<T, PawlError>;

/// Errors that can occur in Pawl
#[derive(Debug, Error)]
pub enum PawlError {
    /// Built without a browser backend
    #[error("Browser support is not compiled in. Rebuild with the `browser` feature")]
    BrowserUnavailable,

    /// Browser launch error
    #[error("Failed to launch browser: {message}")]
    BrowserLaunchError {
        /// Error message
        message: String,
    },

    /// Error reported by the automation driver
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// A polling wait ran out of time
    #[error("Timed out after {ms}ms waiting for {waited_for} ({attempts} attempts){}", reason_suffix(.last_error))]
    Timeout {
        /// What was being waited for
        waited_for: String,
        /// Timeout in milliseconds
        ms: u64,
        /// Number of attempts made
        attempts: u32,
        /// Reason of the last recoverable failure
        last_error: Option<String>,
    },

    /// Element operation failed after stale-element recovery ran out of time
    #[error("Could not {action} element '{locator}'")]
    ElementOperation {
        /// Operation description ("click", "fill"...)
        action: String,
        /// Locator display form
        locator: String,
        /// Underlying failure
        #[source]
        source: Box<PawlError>,
    },

    /// Assertion failed
    #[error("Assertion failed: {message}")]
    AssertionFailed {
        /// Error message
        message: String,
    },

    /// No received message matched recipient and subject
    #[error("Email to '{recipient}' with subject '{subject}' was not received. Received:{received}")]
    MailNotFound {
        /// Expected recipient
        recipient: String,
        /// Expected subject
        subject: String,
        /// `\nrecipient - X, subject - Y` lines of everything that did arrive
        received: String,
    },

    /// Mail server error
    #[error("Mail server error: {message}")]
    MailServer {
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Story run error
    #[error("Story run failed: {message}")]
    StoryFailed {
        /// Error message
        message: String,
    },

    /// Screenshot error
    #[error("Screenshot failed: {message}")]
    ScreenshotError {
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

fn reason_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_ref()
        .map(|e| format!(": {e}"))
        .unwrap_or_default()
}

impl PawlError {
    /// Shorthand for an assertion failure
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::AssertionFailed {
            message: message.into(),
        }
    }

    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True if the driver reported a stale element reference
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Driver(e) if e.is_stale())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod display_tests {
        use super::*;

        #[test]
        fn test_timeout_without_last_error() {
            let err = PawlError::Timeout {
                waited_for: "title".to_string(),
                ms: 500,
                attempts: 3,
                last_error: None,
            };
            assert_eq!(
                err.to_string(),
                "Timed out after 500ms waiting for title (3 attempts)"
            );
        }

        #[test]
        fn test_timeout_with_last_error() {
            let err = PawlError::Timeout {
                waited_for: "title".to_string(),
                ms: 500,
                attempts: 3,
                last_error: Some("still loading".to_string()),
            };
            assert!(err.to_string().ends_with(": still loading"));
        }

        #[test]
        fn test_element_operation_message() {
            let err = PawlError::ElementOperation {
                action: "click".to_string(),
                locator: "By.id: login".to_string(),
                source: Box::new(PawlError::assertion("x")),
            };
            assert_eq!(err.to_string(), "Could not click element 'By.id: login'");
        }

        #[test]
        fn test_mail_not_found_lists_received() {
            let err = PawlError::MailNotFound {
                recipient: "a@x.com".to_string(),
                subject: "hello".to_string(),
                received: "\nrecipient - b@x.com, subject - bye".to_string(),
            };
            let text = err.to_string();
            assert!(text.contains("'a@x.com'"));
            assert!(text.contains("recipient - b@x.com, subject - bye"));
        }
    }

    mod classification_tests {
        use super::*;

        #[test]
        fn test_stale_driver_error_is_stale() {
            let err: PawlError = DriverError::Stale {
                message: "gone".to_string(),
            }
            .into();
            assert!(err.is_stale());
        }

        #[test]
        fn test_other_errors_are_not_stale() {
            assert!(!PawlError::assertion("nope").is_stale());
            let err: PawlError = DriverError::NoSuchElement {
                locator: "By.id: x".to_string(),
            }
            .into();
            assert!(!err.is_stale());
        }
    }
}
