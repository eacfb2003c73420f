//! Structured logging setup for CommandLink services.
//!
//! Log level is configured via the `RUST_LOG` environment variable and
//! defaults to `info`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize human-readable logging.
///
/// # Example
/// ```no_run
/// use commandlink_core::logging;
///
/// logging::init();
/// tracing::info!("Listening for commands");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize JSON logging for log aggregation.
///
/// # Example
/// ```no_run
/// use commandlink_core::logging;
///
/// logging::init_json();
/// tracing::info!(stream = "commands", "Reader started");
/// ```
pub fn init_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize logging unless a global subscriber is already installed.
///
/// Returns `false` when another subscriber won. Test harnesses call this from
/// every test.
pub fn try_init() -> bool {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true).with_test_writer())
        .try_init()
        .is_ok()
}
