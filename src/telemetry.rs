//! Logging and optional OpenTelemetry export.
//!
//! The subscriber always carries a `fmt` layer filtered by `RUST_LOG` (or the
//! level passed in). When telemetry is enabled an OTLP/gRPC span exporter is
//! layered on top.

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::TracerProvider as SdkTracerProvider;
use opentelemetry_sdk::Resource;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::TelemetryConfig;

/// Install the global tracing subscriber.
///
/// Must be called from within a Tokio runtime when telemetry is enabled,
/// since the batch exporter spawns onto it.
pub fn init_telemetry(config: &TelemetryConfig, log_level: Level) -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if !config.enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
        tracing::debug!("OpenTelemetry export disabled");
        return Ok(());
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.as_str())
        .build()
        .context("Failed to build OTLP span exporter")?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(Resource::new(vec![opentelemetry::KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )]))
        .build();

    let tracer = provider.tracer(config.service_name.clone());
    opentelemetry::global::set_tracer_provider(provider);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .init();

    tracing::info!(
        otlp_endpoint = %config.otlp_endpoint,
        service_name = %config.service_name,
        "OpenTelemetry tracing enabled"
    );
    Ok(())
}

/// Flush pending spans and shut down the global tracer provider
pub fn shutdown_telemetry(config: &TelemetryConfig) {
    if config.enabled {
        opentelemetry::global::shutdown_tracer_provider();
        tracing::info!("OpenTelemetry tracer provider shut down");
    }
}
