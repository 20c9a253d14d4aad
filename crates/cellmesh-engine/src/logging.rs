//! `tracing`/`tracing-subscriber` initialization (SPEC_FULL C13): verbosity
//! is controlled by `-v` and by `RUST_LOG`, with an optional JSON writer
//! for machine-readable deployments.

use tracing_subscriber::{fmt, EnvFilter};

fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Installs the global subscriber. Safe to call once at process start;
/// a second call is a no-op (the underlying `set_global_default` failure
/// is swallowed).
pub fn init(verbosity: u8, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));
    let subscriber = fmt().with_env_filter(filter);
    let result = if json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already initialized");
    }
}
