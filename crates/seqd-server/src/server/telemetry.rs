//! # Logging and telemetry
//!
//! Console logging through `tracing_subscriber` is always on. The filter is
//! read from `RUST_LOG` and defaults to `info`.
//!
//! On top of that, OpenTelemetry export is opt-in through cargo features:
//!
//! - `tracing`: exports spans (sessions, refills) via `tracing-opentelemetry`.
//! - `metrics`: exports the service counters listed below.
//! - `honeycomb`: OTLP/gRPC exporter, configured from `HONEYCOMB_API_KEY`,
//!   `HONEYCOMB_DATASET`, `HONEYCOMB_ENDPOINT` and `HONEYCOMB_COMPRESSION`.
//! - `stdout`: prints exported spans and metrics to stdout.
//!
//! Exporters require at least one of `tracing` or `metrics`.
//!
//! ## Metrics
//!
//! | name | kind | meaning |
//! |---|---|---|
//! | `requests` | counter | decoded allocation requests |
//! | `ids_issued` | counter | IDs handed to clients |
//! | `exhausted` | counter | requests answered with `nil` |
//! | `refills` | counter | successful refills |
//! | `refill_failures` | counter | refills aborted by a store error |
//! | `ids_skipped` | counter | IDs reserved durably but never buffered |
//! | `sessions_inflight` | up/down | open client connections |
//! | `monitors_active` | up/down | running bucket monitors |
//! | `monitors_reaped` | counter | monitors stopped by the idle sweep |
//!
//! Every recording helper compiles to a no-op without `metrics`.
//!
//! ```bash
//! cargo run --features tracing,metrics,stdout
//! ```

#[cfg(all(
    feature = "honeycomb",
    not(any(feature = "tracing", feature = "metrics"))
))]
compile_error!(
    "The 'honeycomb' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

#[cfg(all(feature = "stdout", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "tracing")))]
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};
#[cfg(all(feature = "honeycomb", feature = "metrics"))]
use opentelemetry_sdk::metrics::Temporality;
#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "tracing")))]
use tonic::{metadata::MetadataMap, transport::ClientTlsConfig};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;

const SERVICE_NAME: &str = "seqd";

/// Exporter providers that must be flushed before the process exits.
pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down every enabled provider. Errors are printed to
    /// stderr since the subscriber may already be unusable at this point.
    pub fn shutdown(self) {
        #[cfg(feature = "tracing")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "tracing")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "tracing")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    // Console output is independent of the `opentelemetry_stdout` exporter.
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        init_metric_handles(&opentelemetry::global::meter_with_scope(scope));
        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

/// Connection settings shared by the Honeycomb span and metric exporters.
#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "tracing")))]
struct HoneycombSettings {
    metadata: MetadataMap,
    endpoint: String,
    compression: Compression,
}

#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "tracing")))]
impl HoneycombSettings {
    fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;
        use core::str::FromStr;

        let var = |name: &str| std::env::var(name).with_context(|| format!("missing `{name}`"));

        let mut metadata = MetadataMap::new();
        metadata.insert(
            "x-honeycomb-team",
            var("HONEYCOMB_API_KEY")?
                .parse()
                .context("invalid API key")?,
        );
        metadata.insert(
            "x-honeycomb-dataset",
            var("HONEYCOMB_DATASET")?
                .parse()
                .context("invalid dataset")?,
        );

        Ok(Self {
            metadata,
            endpoint: var("HONEYCOMB_ENDPOINT")?,
            compression: Compression::from_str(
                &var("HONEYCOMB_COMPRESSION")?.to_ascii_lowercase(),
            )?,
        })
    }
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        let reader =
            sdkmetrics::PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
                .with_interval(std::time::Duration::from_secs(5))
                .build();
        builder.with_reader(reader)
    };

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;

        let settings = HoneycombSettings::from_env()?;
        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(settings.metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(settings.compression)
            .with_endpoint(settings.endpoint)
            .with_protocol(Protocol::Grpc)
            .with_temporality(Temporality::Delta)
            .build()
            .context("failed to build metrics exporter")?;
        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "tracing")]
fn batch_config() -> sdktrace::BatchConfig {
    sdktrace::BatchConfigBuilder::default()
        .with_scheduled_delay(std::time::Duration::from_secs(5))
        .with_max_queue_size(2048)
        .build()
}

#[cfg(feature = "tracing")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_span_processor(
        sdktrace::BatchSpanProcessor::builder(opentelemetry_stdout::SpanExporter::default())
            .with_batch_config(batch_config())
            .build(),
    );

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;

        let settings = HoneycombSettings::from_env()?;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(settings.metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(settings.compression)
            .with_endpoint(settings.endpoint)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build tracer exporter")?;
        builder.with_span_processor(
            sdktrace::BatchSpanProcessor::builder(exporter)
                .with_batch_config(batch_config())
                .build(),
        )
    };

    Ok(builder.build())
}

#[cfg(feature = "metrics")]
struct MetricHandles {
    requests: Counter<u64>,
    ids_issued: Counter<u64>,
    exhausted: Counter<u64>,
    refills: Counter<u64>,
    refill_failures: Counter<u64>,
    ids_skipped: Counter<u64>,
    sessions_inflight: UpDownCounter<i64>,
    monitors_active: UpDownCounter<i64>,
    monitors_reaped: Counter<u64>,
}

#[cfg(feature = "metrics")]
static METRICS: OnceLock<MetricHandles> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: &Meter) {
    let counter = |name: &'static str, description: &'static str| {
        meter
            .u64_counter(name)
            .with_description(description)
            .build()
    };
    let gauge = |name: &'static str, description: &'static str| {
        meter
            .i64_up_down_counter(name)
            .with_description(description)
            .build()
    };

    let _ = METRICS.set(MetricHandles {
        requests: counter("requests", "Decoded allocation requests"),
        ids_issued: counter("ids_issued", "IDs handed to clients"),
        exhausted: counter("exhausted", "Requests answered with an empty buffer"),
        refills: counter("refills", "Successful buffer refills"),
        refill_failures: counter("refill_failures", "Refills aborted by a store error"),
        ids_skipped: counter("ids_skipped", "IDs reserved durably but never buffered"),
        sessions_inflight: gauge("sessions_inflight", "Open client connections"),
        monitors_active: gauge("monitors_active", "Running bucket monitors"),
        monitors_reaped: counter("monitors_reaped", "Monitors stopped by the idle sweep"),
    });
}

// Each helper records into its handle when `metrics` is enabled and is empty
// otherwise.
macro_rules! metric_helpers {
    ($($(#[$doc:meta])* $name:ident($($arg:ident: $ty:ty),*) => |$m:ident| $body:expr;)*) => {
        $(
            $(#[$doc])*
            #[cfg(feature = "metrics")]
            pub fn $name($($arg: $ty),*) {
                if let Some($m) = METRICS.get() {
                    $body;
                }
            }

            $(#[$doc])*
            #[cfg(not(feature = "metrics"))]
            #[allow(unused_variables)]
            pub fn $name($($arg: $ty),*) {}
        )*
    };
}

metric_helpers! {
    increment_requests() => |m| m.requests.add(1, &[]);
    increment_ids_issued() => |m| m.ids_issued.add(1, &[]);
    increment_exhausted() => |m| m.exhausted.add(1, &[]);
    increment_refills() => |m| m.refills.add(1, &[]);
    increment_refill_failures() => |m| m.refill_failures.add(1, &[]);
    /// Records IDs lost between a committed counter increment and a failed
    /// buffer push.
    record_ids_skipped(count: u64) => |m| m.ids_skipped.add(count, &[]);
    increment_sessions_inflight() => |m| m.sessions_inflight.add(1, &[]);
    decrement_sessions_inflight() => |m| m.sessions_inflight.add(-1, &[]);
    increment_monitors_active() => |m| m.monitors_active.add(1, &[]);
    decrement_monitors_active() => |m| m.monitors_active.add(-1, &[]);
    increment_monitors_reaped() => |m| m.monitors_reaped.add(1, &[]);
}
