//! Prometheus metrics for the relay

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Simple metrics collector
pub struct Metrics {
    /// Total HTTP requests
    pub http_requests_total: AtomicU64,
    /// Total HTTP errors (4xx, 5xx)
    pub http_errors_total: AtomicU64,
    /// Signals accepted from the sender
    pub signals_published_total: AtomicU64,
    /// Signals handed to receivers, re-deliveries included
    pub signals_delivered_total: AtomicU64,
    /// Quota units charged
    pub quota_charged_total: AtomicU64,
    /// Actionable signals held back for lack of quota
    pub quota_skipped_total: AtomicU64,
    /// Rejected or missing credentials
    pub auth_failures_total: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            http_requests_total: AtomicU64::new(0),
            http_errors_total: AtomicU64::new(0),
            signals_published_total: AtomicU64::new(0),
            signals_delivered_total: AtomicU64::new(0),
            quota_charged_total: AtomicU64::new(0),
            quota_skipped_total: AtomicU64::new(0),
            auth_failures_total: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn inc_requests(&self) {
        self.http_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_errors(&self) {
        self.http_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_published(&self) {
        self.signals_published_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_auth_failures(&self) {
        self.auth_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the counts of one delivery pass
    pub fn record_delivery(&self, delivered: u64, charged: u64, skipped: u64) {
        self.signals_delivered_total.fetch_add(delivered, Ordering::Relaxed);
        self.quota_charged_total.fetch_add(charged, Ordering::Relaxed);
        self.quota_skipped_total.fetch_add(skipped, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Format metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        format!(
            r#"# HELP signal_rs_http_requests_total Total HTTP requests
# TYPE signal_rs_http_requests_total counter
signal_rs_http_requests_total {}

# HELP signal_rs_http_errors_total Total HTTP errors (4xx, 5xx)
# TYPE signal_rs_http_errors_total counter
signal_rs_http_errors_total {}

# HELP signal_rs_signals_published_total Signals published by the sender
# TYPE signal_rs_signals_published_total counter
signal_rs_signals_published_total {}

# HELP signal_rs_signals_delivered_total Signals returned to receivers
# TYPE signal_rs_signals_delivered_total counter
signal_rs_signals_delivered_total {}

# HELP signal_rs_quota_charged_total Quota units charged for actionable signals
# TYPE signal_rs_quota_charged_total counter
signal_rs_quota_charged_total {}

# HELP signal_rs_quota_skipped_total Actionable signals held back by quota
# TYPE signal_rs_quota_skipped_total counter
signal_rs_quota_skipped_total {}

# HELP signal_rs_auth_failures_total Failed authentication attempts
# TYPE signal_rs_auth_failures_total counter
signal_rs_auth_failures_total {}

# HELP signal_rs_uptime_seconds Server uptime in seconds
# TYPE signal_rs_uptime_seconds gauge
signal_rs_uptime_seconds {}
"#,
            self.http_requests_total.load(Ordering::Relaxed),
            self.http_errors_total.load(Ordering::Relaxed),
            self.signals_published_total.load(Ordering::Relaxed),
            self.signals_delivered_total.load(Ordering::Relaxed),
            self.quota_charged_total.load(Ordering::Relaxed),
            self.quota_skipped_total.load(Ordering::Relaxed),
            self.auth_failures_total.load(Ordering::Relaxed),
            self.uptime_seconds(),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
