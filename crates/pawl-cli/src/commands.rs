//! CLI command definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Pawl: generate and run behaviour-driven web stories
#[derive(Parser, Debug)]
#[command(name = "pawl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate one test runner per story file
    Generate(GenerateArgs),

    /// Run story files against a browser
    Run(RunArgs),

    /// Show resolved configuration
    Config(ConfigArgs),
}

/// Arguments for the generate command
#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// Directory scanned recursively for `.story` files
    #[arg(short, long, default_value = "stories")]
    pub stories: PathBuf,

    /// Directory receiving the generated runners
    #[arg(short, long, default_value = "target/pawl/generated")]
    pub output: PathBuf,
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Stories root (default: `stories.directory`)
    #[arg(short, long)]
    pub stories: Option<PathBuf>,

    /// Glob of stories to run, relative to the stories root
    /// (default: `user.web.stories.to.run`)
    #[arg(short, long)]
    pub pattern: Option<String>,

    /// Stories run at once (default: `story.threads`)
    #[arg(short = 'j', long, default_value = "0")]
    pub threads: usize,

    /// Per-story timeout in seconds (default: `story.timeout.seconds`)
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Show a single key
    #[arg(short, long)]
    pub key: Option<String>,
}

/// Color argument for CLI
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ColorChoice;

    mod cli_tests {
        use super::*;

        #[test]
        fn test_parse_generate_defaults() {
            let cli = Cli::parse_from(["pawl", "generate"]);
            if let Commands::Generate(args) = cli.command {
                assert_eq!(args.stories, PathBuf::from("stories"));
                assert_eq!(args.output, PathBuf::from("target/pawl/generated"));
            } else {
                panic!("expected Generate command");
            }
        }

        #[test]
        fn test_parse_generate_dirs() {
            let cli = Cli::parse_from(["pawl", "generate", "-s", "acceptance", "-o", "tests/gen"]);
            if let Commands::Generate(args) = cli.command {
                assert_eq!(args.stories, PathBuf::from("acceptance"));
                assert_eq!(args.output, PathBuf::from("tests/gen"));
            } else {
                panic!("expected Generate command");
            }
        }

        #[test]
        fn test_parse_run_defaults() {
            let cli = Cli::parse_from(["pawl", "run"]);
            if let Commands::Run(args) = cli.command {
                assert_eq!(args.stories, None);
                assert_eq!(args.pattern, None);
                assert_eq!(args.threads, 0);
                assert_eq!(args.timeout, None);
            } else {
                panic!("expected Run command");
            }
        }

        #[test]
        fn test_parse_run_options() {
            let cli = Cli::parse_from([
                "pawl",
                "run",
                "--pattern",
                "checkout/*.story",
                "-j",
                "4",
                "--timeout",
                "90",
            ]);
            if let Commands::Run(args) = cli.command {
                assert_eq!(args.pattern.as_deref(), Some("checkout/*.story"));
                assert_eq!(args.threads, 4);
                assert_eq!(args.timeout, Some(90));
            } else {
                panic!("expected Run command");
            }
        }

        #[test]
        fn test_parse_config_key() {
            let cli = Cli::parse_from(["pawl", "config", "--key", "explicit.wait.seconds"]);
            if let Commands::Config(args) = cli.command {
                assert_eq!(args.key.as_deref(), Some("explicit.wait.seconds"));
            } else {
                panic!("expected Config command");
            }
        }

        #[test]
        fn test_global_flags() {
            let cli = Cli::parse_from(["pawl", "run", "-vv", "--color", "never"]);
            assert_eq!(cli.verbose, 2);
            assert!(!cli.quiet);
            assert!(matches!(cli.color, ColorArg::Never));
        }

        #[test]
        fn test_missing_subcommand_fails() {
            assert!(Cli::try_parse_from(["pawl"]).is_err());
        }
    }

    mod color_arg_tests {
        use super::*;

        #[test]
        fn test_into_color_choice() {
            assert_eq!(ColorChoice::from(ColorArg::Auto), ColorChoice::Auto);
            assert_eq!(ColorChoice::from(ColorArg::Always), ColorChoice::Always);
            assert_eq!(ColorChoice::from(ColorArg::Never), ColorChoice::Never);
        }
    }
}
