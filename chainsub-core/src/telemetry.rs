//! Logging, tracing and metrics bootstrap
//!
//! All diagnostics in chainsub go through `tracing`. `init_telemetry`
//! installs a JSON `fmt` layer filtered by `RUST_LOG` (or the configured
//! level) and, when an OTLP endpoint is configured, exports spans and
//! metrics to a collector over gRPC.
//!
//! ```rust,no_run
//! use chainsub_core::TelemetryConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::new("wallet-watcher")
//!         .with_otlp_endpoint("http://localhost:4317")
//!         .with_log_level("debug");
//!     chainsub_core::init_telemetry(config).expect("telemetry");
//!
//!     // ... run the manager ...
//!
//!     chainsub_core::shutdown_telemetry();
//! }
//! ```

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

static PROVIDERS: OnceLock<(Option<SdkTracerProvider>, Option<SdkMeterProvider>)> = OnceLock::new();

/// Telemetry settings
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Reported as `service.name`
    pub service_name: String,
    /// Reported as `service.version`
    pub service_version: String,
    /// OTLP gRPC collector; `None` keeps telemetry local to stdout
    pub otlp_endpoint: Option<String>,
    /// Export spans when a collector is configured
    pub enable_traces: bool,
    /// Export metrics when a collector is configured
    pub enable_metrics: bool,
    /// Fallback filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Metrics export interval
    pub metrics_interval: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "chainsub".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            enable_traces: true,
            enable_metrics: true,
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_interval: Duration::from_secs(30),
        }
    }
}

impl TelemetryConfig {
    /// Create a configuration with a custom service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Export to an OTLP collector
    pub fn with_otlp_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }

    /// Keep all telemetry local
    pub fn without_otlp(mut self) -> Self {
        self.otlp_endpoint = None;
        self
    }

    /// Set the fallback log filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set the reported service version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    /// Toggle span export
    pub fn with_traces(mut self, enable: bool) -> Self {
        self.enable_traces = enable;
        self
    }

    /// Toggle metric export
    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    fn resource(&self) -> opentelemetry_sdk::Resource {
        opentelemetry_sdk::Resource::builder_empty()
            .with_attributes(vec![
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                    self.service_name.clone(),
                ),
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                    self.service_version.clone(),
                ),
            ])
            .build()
    }
}

/// Install the global subscriber and, if configured, the OTLP providers
///
/// Must be called at most once per process.
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), BoxError> {
    let tracer_provider = match (&config.otlp_endpoint, config.enable_traces) {
        (Some(endpoint), true) => Some(build_tracer_provider(&config, endpoint)?),
        _ => None,
    };
    let meter_provider = match (&config.otlp_endpoint, config.enable_metrics) {
        (Some(endpoint), true) => Some(build_meter_provider(&config, endpoint)?),
        _ => None,
    };

    let otel_layer = tracer_provider.as_ref().map(|provider| {
        use opentelemetry::trace::TracerProvider as _;
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .json();

    tracing_subscriber::registry()
        .with(otel_layer)
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    if let Some(provider) = &tracer_provider {
        global::set_tracer_provider(provider.clone());
    }
    if let Some(provider) = &meter_provider {
        global::set_meter_provider(provider.clone());
    }

    tracing::info!(
        service_name = %config.service_name,
        otlp_endpoint = ?config.otlp_endpoint,
        traces = tracer_provider.is_some(),
        metrics = meter_provider.is_some(),
        "Telemetry initialized"
    );

    let _ = PROVIDERS.set((tracer_provider, meter_provider));
    Ok(())
}

fn build_tracer_provider(
    config: &TelemetryConfig,
    endpoint: &str,
) -> Result<SdkTracerProvider, BoxError> {
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .build())
}

fn build_meter_provider(
    config: &TelemetryConfig,
    endpoint: &str,
) -> Result<SdkMeterProvider, BoxError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
        .with_interval(config.metrics_interval)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(config.resource())
        .build())
}

/// Flush and shut down the OTLP providers installed by `init_telemetry`
pub fn shutdown_telemetry() {
    let Some((tracer_provider, meter_provider)) = PROVIDERS.get() else {
        return;
    };

    if let Some(provider) = tracer_provider {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = %e, "Tracer provider shutdown failed");
        }
    }
    if let Some(provider) = meter_provider {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = %e, "Meter provider shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_config() {
        let config = TelemetryConfig::new("watcher")
            .with_otlp_endpoint("http://collector:4317")
            .with_log_level("debug")
            .with_version("2.0.0")
            .with_metrics(false);

        assert_eq!(config.service_name, "watcher");
        assert_eq!(config.otlp_endpoint.as_deref(), Some("http://collector:4317"));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.service_version, "2.0.0");
        assert!(config.enable_traces);
        assert!(!config.enable_metrics);
    }

    #[test]
    fn test_without_otlp() {
        let config = TelemetryConfig::new("watcher")
            .with_otlp_endpoint("http://collector:4317")
            .without_otlp();
        assert!(config.otlp_endpoint.is_none());
    }

    #[test]
    fn test_shutdown_without_init_is_noop() {
        shutdown_telemetry();
    }
}
