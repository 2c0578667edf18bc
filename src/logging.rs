//! Structured logging setup for processes embedding the event bus.
//!
//! Not wired in automatically — a host process calls this (or does its
//! own `tracing_subscriber` setup) before constructing an `EventBus`.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes a compact, human-readable subscriber. Log level comes
/// from `RUST_LOG`, defaulting to `info`, or to `debug` when `verbose`
/// is set (mirrors `EventBusConfig::debug`).
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .compact(),
        )
        .init();
}
