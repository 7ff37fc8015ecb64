//! Error types for the CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Story generation error
    #[error("Generation failed: {message}")]
    Generation {
        /// Error message
        message: String,
    },

    /// One or more stories failed
    #[error("Story run failed: {message}")]
    StoryRun {
        /// Error message
        message: String,
    },

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Pawl library error
    #[error("Pawl error: {0}")]
    Pawl(#[from] pawl::PawlError),
}

impl CliError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a generation error
    #[must_use]
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    /// Create a story run error
    #[must_use]
    pub fn story_run(message: impl Into<String>) -> Self {
        Self::StoryRun {
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error() {
        let err = CliError::config("bad config");
        assert!(err.to_string().contains("Configuration"));
        assert!(err.to_string().contains("bad config"));
    }

    #[test]
    fn test_generation_error() {
        let err = CliError::generation("stories directory missing");
        assert_eq!(
            err.to_string(),
            "Generation failed: stories directory missing"
        );
    }

    #[test]
    fn test_story_run_error() {
        let err = CliError::story_run("2 of 5 stories failed");
        assert!(err.to_string().contains("2 of 5"));
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let cli_err: CliError = io_err.into();
        assert!(cli_err.to_string().contains("I/O"));
    }

    #[test]
    fn test_pawl_error_from() {
        let cli_err: CliError = pawl::PawlError::config("no such key").into();
        assert!(cli_err.to_string().starts_with("Pawl error: Configuration error"));
    }
}
