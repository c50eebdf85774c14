//! Tracing subscriber setup.
//!
//! The library itself only emits `tracing` events; installing a subscriber is left to
//! binaries and tests. [`init`] honours `RUST_LOG` when set and otherwise falls back to
//! the configured level for this crate.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,liquid_planner={level},lhplan={level}",
            level = config.level.to_ascii_lowercase()
        ))
    })
}

/// Install the global subscriber.
///
/// Returns `false` if a subscriber was already installed; calling this twice is harmless.
pub fn init(config: &LoggingConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(build_filter(config))
        .with_target(true);
    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.is_ok()
}
