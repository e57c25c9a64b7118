use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;

/// Install the global tracing subscriber. JSON lines by default so the host
/// log pipeline can index the structured fields; RUST_LOG wins over the
/// configured level.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    if config.json_logs {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .try_init()?;
    }

    tracing::info!("erp-flow telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking the side effects of one event
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span wrapping the handling of one project change event
pub fn create_workflow_span(workflow: &str, project_id: &str, correlation_id: &str) -> tracing::Span {
    tracing::info_span!(
        "workflow",
        workflow.name = workflow,
        project.id = project_id,
        correlation.id = correlation_id,
        otel.kind = "internal"
    )
}

/// Span wrapping one atomic ledger operation
pub fn create_ledger_span(operation: &str, item_id: Option<&str>) -> tracing::Span {
    tracing::info_span!(
        "ledger",
        operation = operation,
        item.id = item_id,
        otel.kind = "internal"
    )
}

pub fn shutdown_telemetry() {
    tracing::info!("erp-flow telemetry shutdown complete");
}
