//! Pawl CLI: generate and run behaviour-driven web stories
//!
//! ## Usage
//!
//! ```bash
//! pawl generate --stories stories --output tests/stories  # One runner per story
//! pawl run --pattern "checkout/**/*.story" -j 4            # Bulk story run
//! pawl config --key explicit.wait.seconds                  # Resolved value
//! ```

use clap::Parser;
use pawl::resources::Resources;
use pawl::StoryRunner;
use pawl_cli::{
    Cli, CliConfig, CliError, CliResult, ColorChoice, Commands, ConfigArgs, GenerateArgs,
    ProgressReporter, RunArgs, Verbosity,
};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let config = build_config(&cli);
    init_tracing(config.verbosity);

    match cli.command {
        Commands::Generate(args) => run_generate(&config, &args),
        Commands::Run(args) => run_stories(config, &args),
        Commands::Config(args) => run_config(&args),
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(ColorChoice::from(cli.color))
}

fn init_tracing(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.log_directive()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn reporter(config: &CliConfig) -> ProgressReporter {
    ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet())
}

fn run_generate(config: &CliConfig, args: &GenerateArgs) -> CliResult<()> {
    let reporter = reporter(config);
    reporter.header("Generating story runners");

    let report = pawl_cli::generate(&args.stories, &args.output)?;
    for runner in &report.generated {
        if config.verbosity.is_verbose() || runner.written {
            reporter.success(&format!(
                "{} -> {}",
                runner.story.display(),
                runner.qualified_name
            ));
        }
    }
    for skipped in &report.skipped {
        reporter.warning(&format!("{}: {}", skipped.story.display(), skipped.reason));
    }
    reporter.info(&format!(
        "{} runners ({} written, {} skipped) in {}",
        report.generated.len(),
        report.written_count(),
        report.skipped.len(),
        args.output.display()
    ));
    Ok(())
}

fn run_stories(mut config: CliConfig, args: &RunArgs) -> CliResult<()> {
    if let Some(dir) = &args.stories {
        config = config.with_stories_dir(dir.to_string_lossy());
    }
    config = config.with_threads(args.threads);
    if let Some(secs) = args.timeout {
        config = config.with_timeout_secs(secs);
    }

    let runner = config.apply(StoryRunner::from_env()?);
    let pattern = args.pattern.as_deref();
    let mut reporter = reporter(&config);

    let stories = runner.discover(pattern)?;
    if stories.is_empty() {
        reporter.warning(&format!(
            "No stories found under {}",
            runner.stories_dir().display()
        ));
        return Ok(());
    }

    reporter.header(&format!(
        "Running {} stories ({} at a time)",
        stories.len(),
        runner.threads()
    ));
    reporter.start_progress(stories.len() as u64, "stories");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let summary = rt.block_on(runner.run_stories_with(pattern, |_| reporter.increment(1)))?;
    reporter.finish();
    reporter.report(&summary);

    if summary.all_passed() {
        Ok(())
    } else {
        Err(CliError::story_run(format!(
            "{} of {} stories failed",
            summary.failures().len(),
            summary.reports.len()
        )))
    }
}

fn run_config(args: &ConfigArgs) -> CliResult<()> {
    let resources = Resources::from_env()?;

    if let Some(key) = &args.key {
        let resolved = resources
            .resolve(key)
            .ok_or_else(|| CliError::config(format!("no value for key '{key}'")))?;
        println!("{}", resolved.value);
        return Ok(());
    }

    if let Some(locale) = resources.locale() {
        println!("# locale: {locale}");
    }
    for (key, resolved) in resources.entries() {
        println!("{key} = {}  # {}", resolved.value, resolved.source);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod config_tests {
        use super::*;

        #[test]
        fn test_build_config_flags() {
            let cli = Cli::parse_from(["pawl", "-vv", "--color", "never", "config"]);
            let config = build_config(&cli);
            assert_eq!(config.verbosity, Verbosity::Debug);
            assert_eq!(config.color, ColorChoice::Never);
        }

        #[test]
        fn test_build_config_quiet() {
            let cli = Cli::parse_from(["pawl", "-q", "generate"]);
            assert!(build_config(&cli).verbosity.is_quiet());
        }
    }
}
