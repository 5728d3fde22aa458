//! Process-wide tracing and metrics.
//!
//! Every binary calls [`init_tracing`] once at startup. Log output is
//! structured JSON in production and human-readable in development,
//! selected by `LOG_FORMAT`. When an OTLP endpoint is configured, traces
//! and logs are additionally exported over gRPC.

use anyhow::Result;
use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    logs::SdkLoggerProvider,
    propagation::TraceContextPropagator,
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
    Resource,
};
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::time::{Duration, Instant};
use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry as TracingRegistry,
};

use crate::config::LogFormat;

/// Initialize tracing for a process.
///
/// With `otlp_endpoint` set, spans and log records are exported via OTLP;
/// without it only the local subscriber is installed.
pub fn init_tracing(
    service_name: &str,
    otlp_endpoint: Option<&str>,
    log_format: &LogFormat,
) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let format_layer = match log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .with_target(true)
            .flatten_event(true)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_line_number(true)
            .boxed(),
    };

    let Some(endpoint) = otlp_endpoint else {
        TracingRegistry::default()
            .with(env_filter)
            .with(format_layer)
            .try_init()?;
        return Ok(());
    };

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    let span_exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(10))
        .build();

    if let Ok(exporter) = span_exporter {
        let tracer_provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource.clone())
            .with_id_generator(RandomIdGenerator::default())
            .with_sampler(Sampler::AlwaysOn)
            .build();
        global::set_tracer_provider(tracer_provider);
    }

    let logger_provider = LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()
        .ok()
        .map(|exporter| {
            SdkLoggerProvider::builder()
                .with_batch_exporter(exporter)
                .with_resource(resource)
                .build()
        });

    global::set_text_map_propagator(TraceContextPropagator::new());

    let tracer = global::tracer_provider().tracer(service_name.to_string());
    let otel_trace_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    if let Some(logger_provider) = logger_provider {
        let otel_log_layer = OpenTelemetryTracingBridge::new(&logger_provider);
        TracingRegistry::default()
            .with(env_filter)
            .with(format_layer)
            .with(otel_trace_layer)
            .with(otel_log_layer)
            .try_init()?;
    } else {
        TracingRegistry::default()
            .with(env_filter)
            .with(format_layer)
            .with(otel_trace_layer)
            .try_init()?;
    }

    Ok(())
}

/// Fleet-wide prometheus metrics, registered once per process.
pub struct FleetMetrics {
    pub registry: Registry,
    pub posts_collected_total: IntCounterVec,
    pub comments_collected_total: IntCounterVec,
    pub cycle_duration_seconds: HistogramVec,
    pub cycles_total: IntCounterVec,
    pub scrape_errors_total: IntCounterVec,
    pub worker_ready: IntGaugeVec,
    pub enrichment_steps_total: IntCounterVec,
    pub database_queries_total: IntCounterVec,
    pub database_query_duration: HistogramVec,
}

impl FleetMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let posts_collected_total = IntCounterVec::new(
            Opts::new("subfleet_posts_collected_total", "Posts written per subreddit"),
            &["subreddit"],
        )
        .expect("metric definition");
        let comments_collected_total = IntCounterVec::new(
            Opts::new(
                "subfleet_comments_collected_total",
                "Comments written per subreddit",
            ),
            &["subreddit"],
        )
        .expect("metric definition");
        let cycle_duration_seconds = HistogramVec::new(
            HistogramOpts::new("subfleet_cycle_duration_seconds", "Worker cycle duration")
                .buckets(vec![1.0, 5.0, 15.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
            &["scraper_type"],
        )
        .expect("metric definition");
        let cycles_total = IntCounterVec::new(
            Opts::new("subfleet_cycles_total", "Completed worker cycles"),
            &["scraper_type"],
        )
        .expect("metric definition");
        let scrape_errors_total = IntCounterVec::new(
            Opts::new("subfleet_scrape_errors_total", "Recorded scrape errors"),
            &["error_type"],
        )
        .expect("metric definition");
        let worker_ready = IntGaugeVec::new(
            Opts::new("subfleet_worker_ready", "Whether a process is serving"),
            &["service"],
        )
        .expect("metric definition");
        let enrichment_steps_total = IntCounterVec::new(
            Opts::new(
                "subfleet_enrichment_steps_total",
                "Enrichment pipeline step outcomes",
            ),
            &["step", "outcome"],
        )
        .expect("metric definition");
        let database_queries_total = IntCounterVec::new(
            Opts::new("subfleet_database_queries_total", "Database queries issued"),
            &["operation", "table", "status"],
        )
        .expect("metric definition");
        let database_query_duration = HistogramVec::new(
            HistogramOpts::new(
                "subfleet_database_query_duration_seconds",
                "Database query latency",
            ),
            &["operation", "table"],
        )
        .expect("metric definition");

        for collector in [
            Box::new(posts_collected_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(comments_collected_total.clone()),
            Box::new(cycle_duration_seconds.clone()),
            Box::new(cycles_total.clone()),
            Box::new(scrape_errors_total.clone()),
            Box::new(worker_ready.clone()),
            Box::new(enrichment_steps_total.clone()),
            Box::new(database_queries_total.clone()),
            Box::new(database_query_duration.clone()),
        ] {
            registry.register(collector).expect("metric registration");
        }

        Self {
            registry,
            posts_collected_total,
            comments_collected_total,
            cycle_duration_seconds,
            cycles_total,
            scrape_errors_total,
            worker_ready,
            enrichment_steps_total,
            database_queries_total,
            database_query_duration,
        }
    }
}

static METRICS: Lazy<FleetMetrics> = Lazy::new(FleetMetrics::new);

pub fn metrics() -> &'static FleetMetrics {
    &METRICS
}

/// Render the registry in Prometheus text exposition format.
pub fn gather() -> String {
    TextEncoder::new()
        .encode_to_string(&metrics().registry.gather())
        .unwrap_or_default()
}

pub fn set_worker_ready(service: &str, ready: bool) {
    metrics()
        .worker_ready
        .with_label_values(&[service])
        .set(if ready { 1 } else { 0 });
}

pub fn record_scrape_error(error_type: &str) {
    metrics()
        .scrape_errors_total
        .with_label_values(&[error_type])
        .inc();
}

pub fn record_enrichment_step(step: &str, success: bool) {
    metrics()
        .enrichment_steps_total
        .with_label_values(&[step, if success { "success" } else { "error" }])
        .inc();
}

/// Times one database query and records outcome labels on drop via
/// `finish`. Mirrors the storage modules' hot-path instrumentation.
pub struct DatabaseQueryTracker {
    operation: &'static str,
    table: &'static str,
    started: Instant,
}

impl DatabaseQueryTracker {
    pub fn new(operation: &'static str, table: &'static str) -> Self {
        Self {
            operation,
            table,
            started: Instant::now(),
        }
    }

    pub fn finish(self, success: bool) {
        let status = if success { "success" } else { "error" };
        metrics()
            .database_queries_total
            .with_label_values(&[self.operation, self.table, status])
            .inc();
        metrics()
            .database_query_duration
            .with_label_values(&[self.operation, self.table])
            .observe(self.started.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_gather() {
        metrics()
            .posts_collected_total
            .with_label_values(&["wallstreetbets"])
            .inc_by(5);
        set_worker_ready("worker-test", true);

        let rendered = gather();
        assert!(rendered.contains("subfleet_posts_collected_total"));
        assert!(rendered.contains("subfleet_worker_ready"));
    }

    #[test]
    fn query_tracker_records_both_outcomes() {
        DatabaseQueryTracker::new("SELECT", "posts").finish(true);
        DatabaseQueryTracker::new("INSERT", "posts").finish(false);
        let rendered = gather();
        assert!(rendered.contains("subfleet_database_queries_total"));
    }
}
