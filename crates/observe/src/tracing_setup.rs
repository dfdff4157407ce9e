use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber.
///
/// `env_filter` is a directive string such as `"daemon=debug,ledger=info"`;
/// it's used when `RUST_LOG` is unset. `json` switches the formatter to
/// newline-delimited JSON for log aggregation in production.
pub fn initialize(env_filter: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));

    if json {
        fmt().with_env_filter(filter).with_target(true).json().init();
    } else {
        fmt().with_env_filter(filter).with_target(true).init();
    }
}
