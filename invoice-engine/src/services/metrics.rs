//! Metrics module for invoice-engine.
//! Provides Prometheus metrics for invoice generation and reconciliation.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_counter_vec, register_histogram_vec, register_int_counter_vec,
    CounterVec, Encoder, HistogramVec, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "invoice_engine_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Invoices written, by organization and path (bulk, manual, append)
pub static INVOICES_WRITTEN_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Amount invoiced, by organization and path
pub static INVOICED_AMOUNT_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Bulk runs, by organization and outcome
pub static BULK_RUNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Per-client bulk outcomes (success, failed, skipped)
pub static BULK_CLIENT_OUTCOMES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Stale or unknown source ids dropped during reconciliation
pub static SOURCES_DROPPED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// HTTP request counter
pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// HTTP request duration histogram
pub static HTTP_REQUEST_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Safe to call more than once.
pub fn init_metrics() {
    INVOICES_WRITTEN_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "invoice_engine_invoices_written_total",
                "Invoices written by organization and path"
            ),
            &["organization_id", "path"]
        )
        .expect("Failed to register INVOICES_WRITTEN_TOTAL")
    });

    INVOICED_AMOUNT_TOTAL.get_or_init(|| {
        register_counter_vec!(
            opts!(
                "invoice_engine_invoiced_amount_total",
                "Total amount invoiced by organization and path"
            ),
            &["organization_id", "path"]
        )
        .expect("Failed to register INVOICED_AMOUNT_TOTAL")
    });

    BULK_RUNS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "invoice_engine_bulk_runs_total",
                "Bulk generation runs by organization and outcome"
            ),
            &["organization_id", "outcome"]
        )
        .expect("Failed to register BULK_RUNS_TOTAL")
    });

    BULK_CLIENT_OUTCOMES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "invoice_engine_bulk_client_outcomes_total",
                "Per-client bulk generation outcomes"
            ),
            &["outcome"]
        )
        .expect("Failed to register BULK_CLIENT_OUTCOMES_TOTAL")
    });

    SOURCES_DROPPED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "invoice_engine_sources_dropped_total",
                "Selected sources dropped because they were stale or unknown"
            ),
            &["kind", "reason"]
        )
        .expect("Failed to register SOURCES_DROPPED_TOTAL")
    });

    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("invoice_engine_http_requests_total", "Total HTTP requests"),
            &["method", "status"]
        )
        .expect("Failed to register HTTP_REQUESTS_TOTAL")
    });

    HTTP_REQUEST_DURATION.get_or_init(|| {
        register_histogram_vec!(
            histogram_opts!(
                "invoice_engine_http_request_duration_seconds",
                "HTTP request duration",
                vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
            ),
            &["method"]
        )
        .expect("Failed to register HTTP_REQUEST_DURATION")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "invoice_engine_errors_total",
                "Total errors by type for alerting"
            ),
            &["error_type", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record an invoice written and its amount.
pub fn record_invoice_written(organization_id: &str, path: &str, amount: f64) {
    if let Some(counter) = INVOICES_WRITTEN_TOTAL.get() {
        counter.with_label_values(&[organization_id, path]).inc();
    }
    if let Some(counter) = INVOICED_AMOUNT_TOTAL.get() {
        counter
            .with_label_values(&[organization_id, path])
            .inc_by(amount.abs());
    }
}

/// Record a finished bulk run.
pub fn record_bulk_run(organization_id: &str, outcome: &str) {
    if let Some(counter) = BULK_RUNS_TOTAL.get() {
        counter.with_label_values(&[organization_id, outcome]).inc();
    }
}

/// Record the outcome for one client of a bulk run.
pub fn record_bulk_client_outcome(outcome: &str) {
    if let Some(counter) = BULK_CLIENT_OUTCOMES_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Record dropped source ids.
pub fn record_sources_dropped(kind: &str, reason: &str, count: usize) {
    if let Some(counter) = SOURCES_DROPPED_TOTAL.get() {
        counter
            .with_label_values(&[kind, reason])
            .inc_by(count as u64);
    }
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, status: &str, duration_secs: f64) {
    if let Some(counter) = HTTP_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[method, status]).inc();
    }
    if let Some(histogram) = HTTP_REQUEST_DURATION.get() {
        histogram.with_label_values(&[method]).observe(duration_secs);
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}
