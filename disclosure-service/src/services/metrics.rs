//! Prometheus metrics for disclosure-service.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "disclosure_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Challenges issued by delivery channel
pub static CHALLENGES_ISSUED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Verification attempts by outcome
pub static VERIFICATION_OUTCOMES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Agreement lifecycle transitions by target status
pub static AGREEMENT_TRANSITIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// More than one active agreement found for a single key
pub static ACTIVE_AGREEMENT_ANOMALIES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Access resolutions by resolved level and outcome
pub static ACCESS_RESOLUTIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Audit records that could not be written
pub static AUDIT_WRITE_FAILURES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Outbound notifications by channel and status
pub static NOTIFICATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    CHALLENGES_ISSUED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "disclosure_challenges_issued_total",
                "Verification challenges issued by channel"
            ),
            &["channel"]
        )
        .expect("Failed to register CHALLENGES_ISSUED_TOTAL")
    });

    VERIFICATION_OUTCOMES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "disclosure_verification_outcomes_total",
                "Verification attempts by outcome"
            ),
            &["outcome"]
        )
        .expect("Failed to register VERIFICATION_OUTCOMES_TOTAL")
    });

    AGREEMENT_TRANSITIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "disclosure_agreement_transitions_total",
                "Agreement lifecycle transitions by target status"
            ),
            &["status"]
        )
        .expect("Failed to register AGREEMENT_TRANSITIONS_TOTAL")
    });

    ACTIVE_AGREEMENT_ANOMALIES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "disclosure_active_agreement_anomalies_total",
                "Lookups that found more than one active agreement for a key"
            ),
            &["scope"]
        )
        .expect("Failed to register ACTIVE_AGREEMENT_ANOMALIES_TOTAL")
    });

    ACCESS_RESOLUTIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "disclosure_access_resolutions_total",
                "Access level resolutions by level and outcome"
            ),
            &["level", "outcome"]
        )
        .expect("Failed to register ACCESS_RESOLUTIONS_TOTAL")
    });

    AUDIT_WRITE_FAILURES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "disclosure_audit_write_failures_total",
                "Access audit records that failed to persist"
            ),
            &["event_type"]
        )
        .expect("Failed to register AUDIT_WRITE_FAILURES_TOTAL")
    });

    NOTIFICATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "disclosure_notifications_total",
                "Outbound notifications by channel and status"
            ),
            &["channel", "status"]
        )
        .expect("Failed to register NOTIFICATIONS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

pub fn record_challenge_issued(channel: &str) {
    if let Some(counter) = CHALLENGES_ISSUED_TOTAL.get() {
        counter.with_label_values(&[channel]).inc();
    }
}

/// Outcome is `verified` or a [`ServiceError`](crate::services::ServiceError) code.
pub fn record_verification_outcome(outcome: &str) {
    if let Some(counter) = VERIFICATION_OUTCOMES_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_agreement_transition(status: &str) {
    if let Some(counter) = AGREEMENT_TRANSITIONS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}

pub fn record_active_agreement_anomaly(scope: &str) {
    if let Some(counter) = ACTIVE_AGREEMENT_ANOMALIES_TOTAL.get() {
        counter.with_label_values(&[scope]).inc();
    }
}

pub fn record_access_resolution(level: &str, outcome: &str) {
    if let Some(counter) = ACCESS_RESOLUTIONS_TOTAL.get() {
        counter.with_label_values(&[level, outcome]).inc();
    }
}

pub fn record_audit_write_failure(event_type: &str) {
    if let Some(counter) = AUDIT_WRITE_FAILURES_TOTAL.get() {
        counter.with_label_values(&[event_type]).inc();
    }
}

pub fn record_notification(channel: &str, status: &str) {
    if let Some(counter) = NOTIFICATIONS_TOTAL.get() {
        counter.with_label_values(&[channel, status]).inc();
    }
}
