use std::io::IsTerminal;
use tracing_subscriber::{fmt, EnvFilter};

/// Default directive when `RUST_LOG` is unset.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

fn filter(rust_log: Option<&str>, debug: bool) -> EnvFilter {
    rust_log
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive(debug)))
}

/// Install the global subscriber. Logs go to stderr: stdout is the stdio transport's wire.
///
/// Calling this twice is a no-op.
pub fn init(debug: bool) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let _ = fmt()
        .with_env_filter(filter(rust_log.as_deref(), debug))
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();
}
