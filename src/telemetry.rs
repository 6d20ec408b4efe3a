use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;

/// Install the global subscriber: JSON or human-readable lines on stderr.
///
/// `RUST_LOG` wins over the configured level. A subscriber that is already
/// installed is left in place.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(config.with_span_list)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
            .with(filter)
            .try_init()
    };

    match installed {
        Ok(()) => tracing::info!(json = config.json, level = %config.log_level, "Telemetry initialized"),
        Err(_) => tracing::debug!("Telemetry already initialized"),
    }
    Ok(())
}

/// Correlation ID linking every log line of one bridge operation
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn create_coordination_span(operation: &str, employee: Option<&str>, correlation_id: Option<&str>) -> tracing::Span {
    tracing::info_span!(
        "coordination",
        operation = operation,
        employee = employee,
        correlation_id = correlation_id,
    )
}
