//! Tracing subscriber setup.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use grove_core::error::GroveError;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. Fails if a global
/// subscriber is already installed.
pub fn init_logging(level: &str, format: LogFormat) -> Result<(), GroveError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let result = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .try_init(),
    };
    result.map_err(|e| GroveError::Config(format!("logging: {e}")))
}
