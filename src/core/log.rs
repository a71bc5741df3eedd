use tracing_subscriber::{
    EnvFilter, fmt, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

/// Installs the global subscriber. Without `RUST_LOG` the crate and request traces log
/// at `info` (`debug` when verbose) and everything else at `warn`; a valid `RUST_LOG`
/// replaces those defaults entirely.
pub fn init_logging(verbose: bool) {
    let filter = log_filter(verbose, std::env::var(EnvFilter::DEFAULT_ENV).ok());

    tracing_subscriber::registry()
        .with(fmt::layer().compact())
        .with(filter)
        .init();
}

fn log_filter(verbose: bool, rust_log: Option<String>) -> EnvFilter {
    if let Some(Ok(filter)) = rust_log
        .filter(|d| !d.trim().is_empty())
        .map(EnvFilter::try_new)
    {
        return filter;
    }
    let level = if verbose { "debug" } else { "info" };
    EnvFilter::new(format!("warn,divtrack={level},tower_http={level}"))
}
