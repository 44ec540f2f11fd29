//! Prometheus metrics for estimating-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// HTTP request counter by method, route and status.
pub static HTTP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "estimating_http_requests_total",
        "Total number of HTTP requests",
        &["method", "route", "status"]
    )
    .expect("Failed to register http_requests_total")
});

/// HTTP request duration histogram by method and route.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "estimating_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "route"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register http_request_duration")
});

/// Estimate lifecycle events.
pub static ESTIMATE_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "estimating_estimate_events_total",
        "Estimate lifecycle events",
        &["event"] // created, sent, signed, rejected, deleted
    )
    .expect("Failed to register estimate_events_total")
});

/// Invoice lifecycle events.
pub static INVOICE_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "estimating_invoice_events_total",
        "Invoice lifecycle events",
        &["event"] // created, converted, sent, payment_recorded, deleted
    )
    .expect("Failed to register invoice_events_total")
});

/// Public payment attempts by outcome.
pub static PAYMENT_OUTCOMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "estimating_payment_outcomes_total",
        "Public payment attempts by outcome",
        &["outcome"] // recorded, declined, pending, rejected
    )
    .expect("Failed to register payment_outcomes_total")
});

/// Payment amount counter by currency.
pub static PAYMENT_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "estimating_payment_amount_total",
        "Total recorded payment amount by currency",
        &["currency"]
    )
    .expect("Failed to register payment_amount_total")
});

/// Reconciliation outcomes.
pub static RECONCILIATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "estimating_reconciliations_total",
        "Payment reconciliation outcomes",
        &["kind", "outcome"]
    )
    .expect("Failed to register reconciliations_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "estimating_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&HTTP_REQUEST_DURATION);
    Lazy::force(&ESTIMATE_EVENTS_TOTAL);
    Lazy::force(&INVOICE_EVENTS_TOTAL);
    Lazy::force(&PAYMENT_OUTCOMES_TOTAL);
    Lazy::force(&PAYMENT_AMOUNT_TOTAL);
    Lazy::force(&RECONCILIATIONS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

pub fn record_estimate_event(event: &str) {
    ESTIMATE_EVENTS_TOTAL.with_label_values(&[event]).inc();
}

pub fn record_invoice_event(event: &str) {
    INVOICE_EVENTS_TOTAL.with_label_values(&[event]).inc();
}
