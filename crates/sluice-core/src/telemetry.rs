use tracing_subscriber::EnvFilter;

use crate::broker::config::{LogFormat, LoggingConfig};

/// Install the global tracing subscriber. Call once, after the
/// configuration is loaded.
///
/// `RUST_LOG` takes precedence over `logging.filter`. Admin actions are
/// logged on the `sluice::audit` target, so `sluice::audit=off` in either
/// silences them. Maintenance threads are named, and the name is part of
/// every line they log.
pub fn init_tracing(config: &LoggingConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter_for(&config.filter))
        .with_thread_names(true);

    if json_output(config.format, cfg!(debug_assertions)) {
        builder.json().init();
    } else {
        builder.with_target(true).init();
    }
}

fn filter_for(configured: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn json_output(format: LogFormat, debug_build: bool) -> bool {
    match format {
        LogFormat::Auto => !debug_build,
        LogFormat::Pretty => false,
        LogFormat::Json => true,
    }
}
