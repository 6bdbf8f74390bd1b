//! Logging and OpenTelemetry export for the facilitator binary.
//!
//! Logs always go to stdout through `tracing-subscriber`, filtered by
//! `RUST_LOG` (default `info`). When any `OTEL_EXPORTER_OTLP_*` variable is
//! set, spans and metrics are also exported over OTLP, using
//! `http/protobuf` unless `OTEL_EXPORTER_OTLP_PROTOCOL=grpc`.

use std::env;
use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{KeyValue, global};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{MeterProviderBuilder, PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_semantic_conventions::SCHEMA_URL;
use opentelemetry_semantic_conventions::attribute::{DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_VERSION};
use tracing_opentelemetry::{MetricsLayer, OpenTelemetryLayer};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// OTLP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryProtocol {
    /// OTLP over HTTP with protobuf.
    Http,
    /// OTLP over gRPC.
    Grpc,
}

impl TelemetryProtocol {
    /// The configured transport, or `None` when OTLP export is not configured.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        Self::from_vars(
            env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok().as_deref(),
            env::var("OTEL_EXPORTER_OTLP_HEADERS").ok().as_deref(),
            env::var("OTEL_EXPORTER_OTLP_PROTOCOL").ok().as_deref(),
        )
    }

    fn from_vars(endpoint: Option<&str>, headers: Option<&str>, protocol: Option<&str>) -> Option<Self> {
        if endpoint.is_none() && headers.is_none() && protocol.is_none() {
            return None;
        }
        match protocol {
            Some("grpc") => Some(Self::Grpc),
            _ => Some(Self::Http),
        }
    }
}

/// Telemetry export failure at startup.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The span exporter could not be built.
    #[error("failed to build OTLP span exporter: {0}")]
    SpanExporter(opentelemetry_otlp::ExporterBuildError),
    /// The metric exporter could not be built.
    #[error("failed to build OTLP metric exporter: {0}")]
    MetricExporter(opentelemetry_otlp::ExporterBuildError),
}

/// Installed providers, flushed and shut down on drop.
#[derive(Debug)]
pub struct Telemetry {
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl Telemetry {
    /// Installs the global subscriber.
    ///
    /// # Errors
    ///
    /// OTLP export is configured but an exporter cannot be built.
    pub fn init() -> Result<Self, TelemetryError> {
        let Some(protocol) = TelemetryProtocol::from_env() else {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(tracing_subscriber::fmt::layer())
                .init();
            tracing::info!("OpenTelemetry export is not enabled");
            return Ok(Self {
                tracer_provider: None,
                meter_provider: None,
            });
        };

        let tracer_provider = tracer_provider(protocol)?;
        let meter_provider = meter_provider(protocol)?;
        let tracer = tracer_provider.tracer(env!("CARGO_PKG_NAME"));

        tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer())
            .with(MetricsLayer::new(meter_provider.clone()))
            .with(OpenTelemetryLayer::new(tracer))
            .init();

        tracing::info!(?protocol, "OpenTelemetry export is enabled");
        Ok(Self {
            tracer_provider: Some(tracer_provider),
            meter_provider: Some(meter_provider),
        })
    }

    /// Whether OTLP export is active.
    #[must_use]
    pub const fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "tracer provider shutdown failed");
            }
        }
        if let Some(provider) = self.meter_provider.take() {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "meter provider shutdown failed");
            }
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn resource() -> Resource {
    let deployment = env::var("DEPLOYMENT_ENV").unwrap_or_else(|_| "develop".to_owned());
    Resource::builder()
        .with_service_name(env!("CARGO_PKG_NAME"))
        .with_schema_url(
            [
                KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, deployment),
            ],
            SCHEMA_URL,
        )
        .build()
}

fn tracer_provider(protocol: TelemetryProtocol) -> Result<SdkTracerProvider, TelemetryError> {
    use opentelemetry_otlp::SpanExporter;

    let builder = SpanExporter::builder();
    let exporter = match protocol {
        TelemetryProtocol::Http => builder.with_http().build(),
        TelemetryProtocol::Grpc => builder.with_tonic().build(),
    }
    .map_err(TelemetryError::SpanExporter)?;

    Ok(SdkTracerProvider::builder()
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(1.0))))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource())
        .with_batch_exporter(exporter)
        .build())
}

fn meter_provider(protocol: TelemetryProtocol) -> Result<SdkMeterProvider, TelemetryError> {
    use opentelemetry_otlp::MetricExporter;
    use opentelemetry_sdk::metrics::Temporality;

    let builder = MetricExporter::builder();
    let exporter = match protocol {
        TelemetryProtocol::Http => builder.with_http().with_temporality(Temporality::default()).build(),
        TelemetryProtocol::Grpc => builder.with_tonic().with_temporality(Temporality::default()).build(),
    }
    .map_err(TelemetryError::MetricExporter)?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(Duration::from_secs(30))
        .build();
    let stdout_reader = PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default()).build();

    let provider = MeterProviderBuilder::default()
        .with_resource(resource())
        .with_reader(reader)
        .with_reader(stdout_reader)
        .build();
    global::set_meter_provider(provider.clone());
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_needs_an_otlp_variable() {
        assert_eq!(TelemetryProtocol::from_vars(None, None, None), None);
        assert_eq!(
            TelemetryProtocol::from_vars(Some("http://collector:4318"), None, None),
            Some(TelemetryProtocol::Http)
        );
        assert_eq!(
            TelemetryProtocol::from_vars(None, None, Some("grpc")),
            Some(TelemetryProtocol::Grpc)
        );
        assert_eq!(
            TelemetryProtocol::from_vars(None, Some("x-api-key=1"), Some("http/protobuf")),
            Some(TelemetryProtocol::Http)
        );
    }
}
