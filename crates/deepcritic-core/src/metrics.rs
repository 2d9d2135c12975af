use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

struct LoopMetrics {
    search_calls: Counter<u64>,
    search_latency_ms: Histogram<f64>,
    revision_loops: Counter<u64>,
    revision_rounds: Histogram<u64>,
}

static METRICS: OnceCell<LoopMetrics> = OnceCell::new();

fn handles() -> &'static LoopMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("deepcritic");
        LoopMetrics {
            search_calls: meter
                .u64_counter("search_calls_total")
                .with_description("Search tool invocations by status")
                .init(),
            search_latency_ms: meter
                .f64_histogram("search_latency_ms")
                .with_description("Search tool latency in milliseconds")
                .init(),
            revision_loops: meter
                .u64_counter("revision_loops_total")
                .with_description("Completed revision loops by stop reason")
                .init(),
            revision_rounds: meter
                .u64_histogram("revision_rounds")
                .with_description("Revision rounds used per question")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) {
    if std::env::var("DEEPCRITIC_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "DEEPCRITIC_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export loop metrics."
        );
    }
}

/// Record one search invocation (no-op if no provider installed).
pub fn record_search_metrics(status: &str, latency_ms: u64, results: usize) {
    let metrics = handles();
    let attrs = [
        KeyValue::new("status", status.to_string()),
        KeyValue::new("results", results as i64),
    ];
    metrics.search_calls.add(1, &attrs);
    metrics.search_latency_ms.record(latency_ms as f64, &attrs);
}

/// Record the outcome of one revision loop.
pub fn record_loop_metrics(stop_reason: &str, critique_rounds: u32, revision_rounds: u32) {
    let metrics = handles();
    let attrs = [
        KeyValue::new("stop_reason", stop_reason.to_string()),
        KeyValue::new("critique_rounds", i64::from(critique_rounds)),
    ];
    metrics.revision_loops.add(1, &attrs);
    metrics
        .revision_rounds
        .record(u64::from(revision_rounds), &attrs);
}
