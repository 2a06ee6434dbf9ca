//! Logging infrastructure.
//!
//! Diagnostics go to stderr so query output on stdout stays clean for pipes.
//! Filter precedence: explicit directive > `TSQ_LOG` > `RUST_LOG` > default.

use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when no directive is supplied anywhere.
const DEFAULT_FILTER: &str = "tsq=warn,tsq_core=warn";

/// Filter used by `--verbose`.
const VERBOSE_FILTER: &str = "tsq=debug,tsq_core=debug";

/// Initialize the global subscriber for the CLI.
///
/// `verbose` promotes the default filter to debug level for our own crates;
/// environment directives still win over the non-verbose default.
pub fn init_logging(verbose: bool) {
    let filter = build_env_filter(verbose.then_some(VERBOSE_FILTER));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_target(false)
        .compact()
        .init();
}

/// Build the environment filter from the directive chain.
pub fn build_env_filter(custom: Option<&str>) -> EnvFilter {
    if let Some(directive) = custom {
        return EnvFilter::new(directive);
    }
    if let Ok(directive) = std::env::var("TSQ_LOG") {
        if !directive.is_empty() {
            return EnvFilter::new(directive);
        }
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
