// src/logging.rs

//! Logging setup for `remold` using `tracing` + `tracing-subscriber`.
//!
//! The engine itself only emits `tracing` events; embedding applications are
//! free to install their own subscriber instead. Priority for the log level:
//! 1. explicit level passed by the caller
//! 2. `REMOLD_LOG` environment variable (e.g. "info", "debug")
//! 3. default to `info`

use anyhow::Result;
use tracing_subscriber::fmt;

/// Initialise a global logging subscriber.
///
/// Safe to call once at startup; calling it twice panics inside
/// `tracing-subscriber`, so embedders that already install a subscriber
/// should skip this.
pub fn init_logging(level: Option<tracing::Level>) -> Result<()> {
    let level = match level {
        Some(lvl) => lvl,
        None => std::env::var("REMOLD_LOG")
            .ok()
            .and_then(|s| parse_level_str(&s))
            .unwrap_or(tracing::Level::INFO),
    };

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    Ok(())
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}
