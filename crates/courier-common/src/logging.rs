//! Structured logging setup
//!
//! Provides:
//! - JSON output for production (LOG_FORMAT=json)
//! - Human-readable output for development (default)
//! - Level filtering via RUST_LOG (default: info)

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Initialize the global tracing subscriber for the given service name.
///
/// Reads `LOG_FORMAT` to pick the output format ("json" for log
/// aggregation, anything else for development text) and `RUST_LOG` for
/// filtering, e.g. `RUST_LOG=courier_batch=debug`.
pub fn init_logging(_service_name: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_ansi(true))
            .init();
    }
}
