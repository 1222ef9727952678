use anyhow::{Context, Error, Result};
use once_cell::sync::OnceCell;
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, SdkTracer, SdkTracerProvider},
};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Where spans go besides the JSON log stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OtelSettings {
    pub endpoint: Option<String>,
    pub sampling_ratio: f64,
}

/// Installs the global subscriber once per process.
///
/// The JSON `fmt` layer is always on. With an OTLP endpoint configured, spans are also exported
/// through `tracing-opentelemetry`; if the exporter cannot be built the worker keeps logging
/// without it.
///
/// # Errors
/// Returns an error when another global subscriber was installed first.
pub fn init(settings: &OtelSettings) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false).json();

        let tracer = match settings.endpoint.as_deref() {
            Some(endpoint) => match init_tracer(endpoint, settings.sampling_ratio) {
                Ok(tracer) => Some(tracer),
                Err(error) => {
                    eprintln!("OTLP exporter disabled: {error:#}");
                    None
                }
            },
            None => None,
        };
        let otel_enabled = tracer.is_some();
        let otel_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()
            .map_err(|e: tracing_subscriber::util::TryInitError| Error::msg(e.to_string()))?;
        info!(otel_enabled, "tracing initialized");

        Ok::<(), Error>(())
    })?;
    Ok(())
}

fn init_tracer(endpoint: &str, sampling_ratio: f64) -> Result<SdkTracer> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("failed to build OTLP span exporter")?;

    let resource = Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", "opinion-worker"),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])
        .build();

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::TraceIdRatioBased(sampling_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    let tracer = tracer_provider.tracer("opinion-worker");
    global::set_tracer_provider(tracer_provider);

    Ok(tracer)
}
