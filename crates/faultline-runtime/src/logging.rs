//! Tracing setup for binaries that embed the runtime.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging with sensible defaults.
///
/// Environment-based filtering (RUST_LOG) over a compact fmt layer. Default
/// level is INFO.
pub fn init() {
    init_with_level("info")
}

/// Initialize logging with a specific default level, still overridable by
/// the RUST_LOG environment variable.
pub fn init_with_level(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}
