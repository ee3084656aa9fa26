//! Prometheus metrics for the audit chain and background services.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Registry holding every casevault collector
pub struct VaultMetrics {
    /// Prometheus registry for all metrics
    pub registry: Registry,
    /// Audit entries appended to the chain
    pub audit_entries_written_total: IntCounter,
    /// Audit entries dropped on buffer overflow or write failure
    pub audit_entries_dropped_total: IntCounter,
    /// Chain verifications by result (valid / invalid)
    pub chain_verifications_total: IntCounterVec,
    /// Notification deliveries by outcome (sent / failed / retry)
    pub notifications_total: IntCounterVec,
    /// Records processed by retention jobs, by target
    pub retention_records_total: IntCounterVec,
}

impl VaultMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let audit_entries_written_total = IntCounter::with_opts(Opts::new(
            "casevault_audit_entries_written_total",
            "Audit log entries appended to the hash chain",
        ))
        .expect("valid metric definition");
        let audit_entries_dropped_total = IntCounter::with_opts(Opts::new(
            "casevault_audit_entries_dropped_total",
            "Audit log entries dropped before reaching the database",
        ))
        .expect("valid metric definition");
        let chain_verifications_total = IntCounterVec::new(
            Opts::new(
                "casevault_audit_chain_verifications_total",
                "Audit chain verifications by result",
            ),
            &["result"],
        )
        .expect("valid metric definition");
        let notifications_total = IntCounterVec::new(
            Opts::new(
                "casevault_notifications_total",
                "Notification delivery attempts by outcome",
            ),
            &["outcome"],
        )
        .expect("valid metric definition");
        let retention_records_total = IntCounterVec::new(
            Opts::new(
                "casevault_retention_records_total",
                "Records archived or deleted by retention jobs",
            ),
            &["target"],
        )
        .expect("valid metric definition");

        for collector in [
            Box::new(audit_entries_written_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(audit_entries_dropped_total.clone()),
            Box::new(chain_verifications_total.clone()),
            Box::new(notifications_total.clone()),
            Box::new(retention_records_total.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric registered once");
        }

        Self {
            registry,
            audit_entries_written_total,
            audit_entries_dropped_total,
            chain_verifications_total,
            notifications_total,
            retention_records_total,
        }
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Process-wide metrics
pub static METRICS: Lazy<VaultMetrics> = Lazy::new(VaultMetrics::new);

/// Count appended audit entries.
pub fn record_audit_written(count: usize) {
    METRICS.audit_entries_written_total.inc_by(count as u64);
}

/// Count dropped audit entries.
pub fn record_audit_dropped(count: usize) {
    METRICS.audit_entries_dropped_total.inc_by(count as u64);
}

/// Count a chain verification.
pub fn record_chain_verification(valid: bool) {
    let label = if valid { "valid" } else { "invalid" };
    METRICS
        .chain_verifications_total
        .with_label_values(&[label])
        .inc();
}

/// Count a notification delivery outcome.
pub fn record_notification(outcome: &str) {
    METRICS
        .notifications_total
        .with_label_values(&[outcome])
        .inc();
}

/// Count records processed by a retention job.
pub fn record_retention(target: &str, count: i64) {
    if count > 0 {
        METRICS
            .retention_records_total
            .with_label_values(&[target])
            .inc_by(count as u64);
    }
}
