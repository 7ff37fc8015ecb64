//! CLI configuration

use serde::{Deserialize, Serialize};

/// CLI verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Verbosity {
    /// Quiet - errors and warnings only
    Quiet,
    /// Normal - default output
    #[default]
    Normal,
    /// Verbose - per-story detail
    Verbose,
    /// Debug - maximum output
    Debug,
}

impl Verbosity {
    /// Verbosity for `-q` and a count of `-v` flags
    #[must_use]
    pub const fn from_flags(quiet: bool, verbose: u8) -> Self {
        if quiet {
            return Self::Quiet;
        }
        match verbose {
            0 => Self::Normal,
            1 => Self::Verbose,
            _ => Self::Debug,
        }
    }

    /// Check if quiet mode
    #[must_use]
    pub const fn is_quiet(self) -> bool {
        matches!(self, Self::Quiet)
    }

    /// Check if verbose or higher
    #[must_use]
    pub const fn is_verbose(self) -> bool {
        matches!(self, Self::Verbose | Self::Debug)
    }

    /// Check if debug mode
    #[must_use]
    pub const fn is_debug(self) -> bool {
        matches!(self, Self::Debug)
    }

    /// Log filter directive used when `RUST_LOG` is unset
    #[must_use]
    pub const fn log_directive(self) -> &'static str {
        match self {
            Self::Quiet => "warn",
            Self::Normal => "info",
            Self::Verbose => "debug",
            Self::Debug => "trace",
        }
    }
}

/// Color output choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorChoice {
    /// Always use colors
    Always,
    /// Use colors when output is a terminal
    #[default]
    Auto,
    /// Never use colors
    Never,
}

impl ColorChoice {
    /// Should use colors based on output detection
    #[must_use]
    pub fn should_color(self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => std::io::IsTerminal::is_terminal(&std::io::stderr()),
        }
    }
}

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Verbosity level
    pub verbosity: Verbosity,
    /// Color output choice
    pub color: ColorChoice,
    /// Stories directory override
    pub stories_dir: Option<String>,
    /// Concurrent stories override (0 = use configuration)
    pub threads: usize,
    /// Per-story timeout override in seconds
    pub timeout_secs: Option<u64>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::Normal,
            color: ColorChoice::Auto,
            stories_dir: None,
            threads: 0,
            timeout_secs: None,
        }
    }
}

impl CliConfig {
    /// Create new default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity
    #[must_use]
    pub const fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set color choice
    #[must_use]
    pub const fn with_color(mut self, color: ColorChoice) -> Self {
        self.color = color;
        self
    }

    /// Set stories directory
    #[must_use]
    pub fn with_stories_dir(mut self, dir: impl Into<String>) -> Self {
        self.stories_dir = Some(dir.into());
        self
    }

    /// Set concurrent stories
    #[must_use]
    pub const fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set per-story timeout
    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Apply the overrides to a story runner
    #[must_use]
    pub fn apply(&self, mut runner: pawl::StoryRunner) -> pawl::StoryRunner {
        if let Some(dir) = &self.stories_dir {
            runner = runner.with_stories_dir(dir);
        }
        if self.threads > 0 {
            runner = runner.with_threads(self.threads);
        }
        if let Some(secs) = self.timeout_secs {
            runner = runner.with_timeout(std::time::Duration::from_secs(secs));
        }
        runner
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod verbosity_tests {
        use super::*;

        #[test]
        fn test_default_verbosity() {
            assert_eq!(Verbosity::default(), Verbosity::Normal);
        }

        #[test]
        fn test_from_flags() {
            assert_eq!(Verbosity::from_flags(false, 0), Verbosity::Normal);
            assert_eq!(Verbosity::from_flags(false, 1), Verbosity::Verbose);
            assert_eq!(Verbosity::from_flags(false, 4), Verbosity::Debug);
            assert_eq!(Verbosity::from_flags(true, 3), Verbosity::Quiet);
        }

        #[test]
        fn test_predicates() {
            assert!(Verbosity::Quiet.is_quiet());
            assert!(!Verbosity::Normal.is_verbose());
            assert!(Verbosity::Verbose.is_verbose());
            assert!(!Verbosity::Verbose.is_debug());
            assert!(Verbosity::Debug.is_debug());
        }

        #[test]
        fn test_log_directive() {
            assert_eq!(Verbosity::Quiet.log_directive(), "warn");
            assert_eq!(Verbosity::Normal.log_directive(), "info");
            assert_eq!(Verbosity::Verbose.log_directive(), "debug");
        }

        #[test]
        fn test_deserialize() {
            let v: Verbosity = serde_json::from_str("\"Quiet\"").unwrap();
            assert_eq!(v, Verbosity::Quiet);
        }
    }

    mod color_choice_tests {
        use super::*;

        #[test]
        fn test_default_color() {
            assert_eq!(ColorChoice::default(), ColorChoice::Auto);
        }

        #[test]
        fn test_should_color_fixed() {
            assert!(ColorChoice::Always.should_color());
            assert!(!ColorChoice::Never.should_color());
        }
    }

    mod cli_config_tests {
        use super::*;
        use pawl::Resources;

        #[test]
        fn test_default_config() {
            let config = CliConfig::default();
            assert_eq!(config.verbosity, Verbosity::Normal);
            assert_eq!(config.stories_dir, None);
            assert_eq!(config.threads, 0);
            assert_eq!(config.timeout_secs, None);
        }

        #[test]
        fn test_chained_builders() {
            let config = CliConfig::new()
                .with_verbosity(Verbosity::Verbose)
                .with_color(ColorChoice::Never)
                .with_stories_dir("acceptance")
                .with_threads(3)
                .with_timeout_secs(30);
            assert_eq!(config.color, ColorChoice::Never);
            assert_eq!(config.stories_dir.as_deref(), Some("acceptance"));
            assert_eq!(config.threads, 3);
            assert_eq!(config.timeout_secs, Some(30));
        }

        #[test]
        fn test_apply_overrides() {
            let config = CliConfig::new()
                .with_stories_dir("acceptance")
                .with_threads(4)
                .with_timeout_secs(12);
            let runner = config.apply(pawl::StoryRunner::new(Resources::new()));
            assert_eq!(runner.stories_dir(), std::path::Path::new("acceptance"));
            assert_eq!(runner.threads(), 4);
            assert_eq!(runner.timeout(), std::time::Duration::from_secs(12));
        }

        #[test]
        fn test_apply_keeps_configured_values() {
            let runner = CliConfig::new().apply(pawl::StoryRunner::new(Resources::new()));
            assert_eq!(runner.stories_dir(), std::path::Path::new("stories"));
            assert_eq!(runner.threads(), 1);
            assert_eq!(runner.timeout(), std::time::Duration::from_secs(300));
        }

        #[test]
        fn test_serialize() {
            let json = serde_json::to_string(&CliConfig::new().with_threads(2)).unwrap();
            assert!(json.contains("\"threads\":2"));
        }
    }
}
