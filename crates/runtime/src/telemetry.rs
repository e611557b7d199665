use tracing_subscriber::EnvFilter;

use sidequest_config::TelemetryConfig;

/// Install the global fmt subscriber.  `RUST_LOG` wins over the configured
/// level.  Returns `false` if a subscriber was already installed.
pub fn init_tracing(config: &TelemetryConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
