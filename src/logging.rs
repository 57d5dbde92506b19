//! Tracing subscriber setup for the `regcache` binary.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber. `RUST_LOG` takes precedence over `config.level`.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
    };

    // Already installed (tests, embedding applications): keep the existing one.
    if result.is_ok() {
        tracing::debug!(level = %config.level, "Logging initialized");
    }
}
