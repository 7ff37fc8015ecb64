//! Pawl CLI Library
//!
//! Command-line interface for the Pawl story harness: generates one test
//! runner per `.story` file, runs stories in bulk and shows the resolved
//! configuration.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::format_push_string)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod config;
mod error;
pub mod generate;
mod output;

pub use commands::{Cli, ColorArg, Commands, ConfigArgs, GenerateArgs, RunArgs};
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
pub use generate::{generate, GeneratedRunner, GenerationReport, SkippedStory};
pub use output::ProgressReporter;
