//! Telemetry and structured logging setup.
//!
//! Provides consistent logging across all components with:
//! - Channel-tagged log lines for filtering
//! - Structured output for log aggregation
//! - Configurable verbosity via RUST_LOG

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Default directives when RUST_LOG is unset.
const DEFAULT_FILTER: &str = "info,crash_observer=debug";

/// Initializes the telemetry/logging system.
///
/// Uses RUST_LOG environment variable for configuration.
///
/// Example RUST_LOG values:
/// - `info` - All info and above
/// - `crash_observer=debug` - Debug for our crate, default for others
/// - `crash_observer=trace,tokio_tungstenite=warn` - Trace for us, warn for the socket
pub fn init_telemetry() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initializes telemetry with JSON output (for production).
pub fn init_telemetry_json() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json().with_span_events(FmtSpan::CLOSE))
        .init();
}
