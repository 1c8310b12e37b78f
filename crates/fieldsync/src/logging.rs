//! Tracing setup for the `fieldsync` binary.
//!
//! Only fieldsync's own targets follow the chosen verbosity. The HTTP and
//! SQLite stacks stay at `warn` so a `-vv` sync pass is still readable.
//! `RUST_LOG` replaces the whole filter when set.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Dependencies whose output is capped at `warn`.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "rusqlite"];

/// How much of the sync engine's activity to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Errors only (`-q`).
    Quiet,
    /// Captures, queue changes and pass summaries.
    #[default]
    Normal,
    /// Per-record delivery and trigger dispatch (`-v`).
    Verbose,
    /// Every request and response (`-vv`).
    Trace,
}

impl Verbosity {
    /// Map the `-q` flag and the number of `-v` flags. `-q` wins.
    #[must_use]
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// Level applied to fieldsync's targets.
    #[must_use]
    pub fn level(self) -> LevelFilter {
        match self {
            Self::Quiet => LevelFilter::ERROR,
            Self::Normal => LevelFilter::INFO,
            Self::Verbose => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }

    /// Filter directives used when `RUST_LOG` is unset.
    #[must_use]
    pub fn directives(self) -> String {
        std::iter::once(format!("fieldsync={}", self.level()))
            .chain(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Install the global subscriber. Later calls are no-ops.
///
/// ```no_run
/// use fieldsync::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::from_flags(false, 1));
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directives()));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .try_init();
}
