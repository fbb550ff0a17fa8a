use anyhow::Result;
use tracing_subscriber::EnvFilter;

use super::LogConfig;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = match config.format.to_lowercase().as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };

    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
