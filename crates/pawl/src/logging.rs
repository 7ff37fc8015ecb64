//! Tracing setup for story binaries.
//!
//! `RUST_LOG` wins when set; otherwise the given default directive applies.

use tracing_subscriber::EnvFilter;

/// Default filter directive
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Install the fmt subscriber with the default `info` filter.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init() -> bool {
    init_with(DEFAULT_DIRECTIVE)
}

/// Install the fmt subscriber, falling back to `directive` when `RUST_LOG`
/// is unset or invalid
pub fn init_with(directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(directive))
        .with_target(false)
        .try_init()
        .is_ok()
}

fn filter(directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive))
}
