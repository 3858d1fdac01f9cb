//! Tracing subscriber setup.

use crate::config::LoggingConfig;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` wins over the configured level. Calling this twice is harmless;
/// the second call leaves the first subscriber in place.
pub fn init(config: &LoggingConfig) {
    let level = tracing::Level::from(config.level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("packlink_core={},warn", level)));

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_format {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(config.include_targets)
                    .json(),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(config.include_targets)
                    .compact(),
            )
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
