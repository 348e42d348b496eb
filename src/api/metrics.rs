//! Metrics Collection
//!
//! Counters and gauges fed once per pass from the `PassReport`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::seeder::{PassOutcome, PassReport};

/// Metrics collector for the seeder
#[derive(Default)]
pub struct Metrics {
    /// Start time for uptime calculation
    start_time: Option<Instant>,

    /// Passes run, whatever their outcome
    pub passes: AtomicU64,

    /// Passes that ended before touching DNS
    pub skipped_passes: AtomicU64,

    /// Health checks issued
    pub nodes_scanned: AtomicU64,

    /// Verified nodes after the last pass
    pub nodes_valid: AtomicU64,

    /// Records created
    pub records_added: AtomicU64,

    /// Records removed
    pub records_deleted: AtomicU64,

    /// Failed record mutations
    pub records_failed: AtomicU64,

    /// Reference height of the last pass that resolved one
    pub reference_height: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    /// Fold a finished pass into the counters
    pub fn record_pass(&self, report: &PassReport) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        if report.outcome != PassOutcome::Completed {
            self.skipped_passes.fetch_add(1, Ordering::Relaxed);
        }

        self.nodes_scanned.fetch_add(report.scanned as u64, Ordering::Relaxed);
        self.records_added.fetch_add(report.records_added as u64, Ordering::Relaxed);
        self.records_deleted.fetch_add(report.records_deleted as u64, Ordering::Relaxed);
        self.records_failed.fetch_add(report.records_failed as u64, Ordering::Relaxed);

        if let Some(height) = report.reference_height {
            self.reference_height.store(height, Ordering::Relaxed);
            self.nodes_valid.store(report.valid as u64, Ordering::Relaxed);
        }
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let metrics = [
            ("uptime_seconds", "gauge", "Seeder uptime in seconds", self.uptime_secs()),
            ("passes_total", "counter", "Passes run", self.passes.load(Ordering::Relaxed)),
            (
                "skipped_passes_total",
                "counter",
                "Passes that left DNS untouched",
                self.skipped_passes.load(Ordering::Relaxed),
            ),
            (
                "nodes_scanned_total",
                "counter",
                "Node health checks issued",
                self.nodes_scanned.load(Ordering::Relaxed),
            ),
            ("nodes_valid", "gauge", "Verified nodes", self.nodes_valid.load(Ordering::Relaxed)),
            (
                "records_added_total",
                "counter",
                "DNS records created",
                self.records_added.load(Ordering::Relaxed),
            ),
            (
                "records_deleted_total",
                "counter",
                "DNS records removed",
                self.records_deleted.load(Ordering::Relaxed),
            ),
            (
                "records_failed_total",
                "counter",
                "Failed DNS record mutations",
                self.records_failed.load(Ordering::Relaxed),
            ),
            (
                "reference_height",
                "gauge",
                "Reference block height",
                self.reference_height.load(Ordering::Relaxed),
            ),
        ];

        let mut output = String::new();
        for (name, kind, help, value) in metrics {
            output.push_str(&format!(
                "# HELP monero_dns_seed_{name} {help}\n\
                 # TYPE monero_dns_seed_{name} {kind}\n\
                 monero_dns_seed_{name} {value}\n\n"
            ));
        }
        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_secs": self.uptime_secs(),
            "passes": {
                "total": self.passes.load(Ordering::Relaxed),
                "skipped": self.skipped_passes.load(Ordering::Relaxed),
            },
            "nodes": {
                "scanned": self.nodes_scanned.load(Ordering::Relaxed),
                "valid": self.nodes_valid.load(Ordering::Relaxed),
            },
            "records": {
                "added": self.records_added.load(Ordering::Relaxed),
                "deleted": self.records_deleted.load(Ordering::Relaxed),
                "failed": self.records_failed.load(Ordering::Relaxed),
            },
            "reference_height": self.reference_height.load(Ordering::Relaxed),
        })
    }
}
