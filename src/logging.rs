//! Logging initialisation
//!
//! The filter comes from `UVM_LOG`, then `RUST_LOG`. Without either, the
//! level is `warn`, raised to `info` by `-v` and `debug` by `-vv`. Output
//! goes to stderr so guest output streamed on stdout stays clean.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directive used when no environment filter is set.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

fn filter(verbosity: u8) -> EnvFilter {
    ["UVM_LOG", "RUST_LOG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .find_map(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive(verbosity)))
}

/// Install the global subscriber. Call once from `main`.
pub fn init(verbosity: u8) {
    let _ = tracing_subscriber::registry()
        .with(filter(verbosity))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}
