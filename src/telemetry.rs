//! Tracing subscriber for the binary.
//!
//! Filter priority, highest first: `LIFECOURSE_LOG`, `RUST_LOG`, then the `-v`/`-q` flags.
//! Logs go to stderr.

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

pub const LOG_ENV: &str = "LIFECOURSE_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Run progress at info level.
    Normal,
    /// Per-batch and per-row diagnostics.
    Verbose,
}

impl Verbosity {
    #[must_use]
    pub const fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Self::Verbose
        } else if quiet {
            Self::Quiet
        } else {
            Self::Normal
        }
    }

    #[must_use]
    pub const fn default_level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
        }
    }
}

/// Install the global subscriber. A second call is ignored.
pub fn init_subscriber(verbosity: Verbosity) {
    let stderr_is_tty = std::io::IsTerminal::is_terminal(&std::io::stderr());
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(stderr_is_tty)
        .with_target(true)
        .with_thread_names(verbosity == Verbosity::Verbose);

    let _ = tracing_subscriber::registry()
        .with(build_env_filter(verbosity))
        .with(fmt_layer)
        .try_init();
}

fn build_env_filter(verbosity: Verbosity) -> EnvFilter {
    if let Some(filter) = std::env::var(LOG_ENV)
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
    {
        return filter;
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    directive_filter(verbosity)
}

fn directive_filter(verbosity: Verbosity) -> EnvFilter {
    let level = verbosity.default_level();
    // Dependencies stay at warn unless the run is quiet.
    let deps = if verbosity == Verbosity::Quiet {
        Level::ERROR
    } else {
        Level::WARN
    };
    EnvFilter::new(format!(
        "{deps},lifecourse={level},lifecourse_indexer={level}"
    ))
}
