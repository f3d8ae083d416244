//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for structured logging. The filter comes from
//! `RUST_LOG` when set, otherwise from `core.log_level` (or `--log`).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber with the given log level.
///
/// Priority: `RUST_LOG` env var > `log_level` parameter > default "info"
///
/// Debug builds print human-readable lines to stderr; release builds emit JSON
/// with the current span attached so the daemon's logs can be shipped as-is.
pub fn init_telemetry_with_level(log_level: &str) {
    let default_filter = format!("warn,hub_engine={},hub={}", log_level, log_level);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}
