// Telemetry module for structured logging, metrics, and tracing

use crate::models::TriggerOutcome;
use crate::orchestrator::ReconcileReport;
use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging with JSON formatting and trace context
///
/// This function sets up the tracing subscriber with:
/// - JSON formatting for structured logs
/// - Trace context (span list) in all log entries
/// - Log levels from `RUST_LOG` or configuration
/// - Optional OpenTelemetry export
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized with JSON formatting"
    );

    Ok(())
}

/// Initialize OpenTelemetry tracer with OTLP exporter
fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", "cronhook"),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    let tracer = tracer_provider.tracer("cronhook");

    tracing::info!(
        endpoint = endpoint,
        "OpenTelemetry tracer initialized with OTLP exporter"
    );

    Ok(tracer)
}

/// Flush remaining spans on graceful shutdown
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Install the Prometheus recorder and describe all metrics
///
/// The returned handle renders the scrape payload for the `/metrics` route.
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    describe_counter!("trigger_success_total", "Total number of successful trigger fires");
    describe_counter!("trigger_failed_total", "Total number of failed trigger fires");
    describe_histogram!(
        "trigger_duration_seconds",
        "Duration of trigger HTTP calls in seconds"
    );
    describe_counter!(
        "reconcile_operations_total",
        "Scheduler operations applied by reconciliation"
    );
    describe_counter!(
        "reconcile_failures_total",
        "Specs that failed to apply during reconciliation"
    );
    describe_gauge!("live_jobs", "Jobs currently registered with the live scheduler");

    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

/// Record the outcome of one fire
#[inline]
pub fn record_trigger_outcome(outcome: &TriggerOutcome) {
    let name = outcome.name.clone();
    if outcome.is_success() {
        counter!("trigger_success_total", "trigger" => name.clone()).increment(1);
    } else {
        counter!(
            "trigger_failed_total",
            "trigger" => name.clone(),
            "reason" => outcome.reason()
        )
        .increment(1);
    }
    histogram!("trigger_duration_seconds", "trigger" => name)
        .record(outcome.duration_ms as f64 / 1000.0);
}

/// Record the scheduler operations applied by a reconciliation pass
#[inline]
pub fn record_reconcile(report: &ReconcileReport) {
    for (op, count) in [
        ("create", report.created),
        ("reschedule", report.rescheduled),
        ("replace", report.replaced),
        ("pause", report.paused),
        ("resume", report.resumed),
        ("delete", report.deleted),
    ] {
        if count > 0 {
            counter!("reconcile_operations_total", "op" => op).increment(count as u64);
        }
    }
    if !report.failures.is_empty() {
        counter!("reconcile_failures_total").increment(report.failures.len() as u64);
    }
}

/// Update the live job gauge
#[inline]
pub fn update_live_jobs(count: usize) {
    gauge!("live_jobs").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HttpMethod, OutcomeKind};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_init_logging_rejects_second_subscriber() {
        // Whichever call installs the global subscriber, the one after it must fail
        let _ = init_logging("info", None);
        let second = init_logging("debug", None);

        let err = second.expect_err("a global subscriber is already installed");
        assert!(err
            .to_string()
            .contains("Failed to initialize tracing subscriber"));
    }

    #[test]
    fn test_metrics_recording() {
        // Recording without an installed recorder must not panic
        let outcome = TriggerOutcome {
            fire_id: Uuid::new_v4(),
            fired_at: Utc::now(),
            name: "test-trigger".to_string(),
            method: HttpMethod::Post,
            url: "http://svc/test".to_string(),
            kind: OutcomeKind::HttpError { status: 500 },
            duration_ms: 1500,
        };
        record_trigger_outcome(&outcome);
        record_reconcile(&ReconcileReport {
            created: 2,
            deleted: 1,
            ..ReconcileReport::default()
        });
        update_live_jobs(3);
    }
}
