//! Metrics of the discovery services
//!
//! Counts request outcomes and tracks queue depth and run duration. Values are
//! kept locally as well as recorded through the `metrics` facade, so callers
//! can read them without an installed recorder.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of the request counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub submitted: u64,
    pub rejected: u64,
    pub finished: u64,
    pub cancelled: u64,
    pub failed: u64,
}

/// Discovery metrics collector
#[derive(Debug)]
pub struct DiscoveryMetrics {
    submitted: AtomicU64,
    rejected: AtomicU64,
    finished: AtomicU64,
    cancelled: AtomicU64,
    failed: AtomicU64,
}

impl DiscoveryMetrics {
    pub fn new() -> Self {
        describe_counter!(
            "discovery_requests_submitted_total",
            "Total discovery requests accepted into the queue"
        );
        describe_counter!(
            "discovery_requests_rejected_total",
            "Total discovery requests rejected by a full or closed queue"
        );
        describe_counter!(
            "discovery_requests_completed_total",
            "Total discovery requests completed, labeled by outcome"
        );
        describe_gauge!("discovery_queue_depth", "Requests waiting or running");
        describe_histogram!(
            "discovery_run_duration_seconds",
            "Duration of discovery runs in seconds"
        );

        Self {
            submitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            finished: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn record_submitted(&self, depth: usize) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        counter!("discovery_requests_submitted_total").increment(1);
        gauge!("discovery_queue_depth").set(depth as f64);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        counter!("discovery_requests_rejected_total").increment(1);
    }

    pub fn record_finished(&self, duration: Duration) {
        self.finished.fetch_add(1, Ordering::Relaxed);
        counter!("discovery_requests_completed_total", "outcome" => "finished").increment(1);
        histogram!("discovery_run_duration_seconds").record(duration.as_secs_f64());
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
        counter!("discovery_requests_completed_total", "outcome" => "cancelled").increment(1);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        counter!("discovery_requests_completed_total", "outcome" => "error").increment(1);
    }

    pub fn record_queue_depth(&self, depth: usize) {
        gauge!("discovery_queue_depth").set(depth as f64);
    }

    pub fn stats(&self) -> DiscoveryStats {
        DiscoveryStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for DiscoveryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_without_recorder() {
        let metrics = DiscoveryMetrics::new();
        metrics.record_submitted(1);
        metrics.record_submitted(2);
        metrics.record_finished(Duration::from_millis(5));
        metrics.record_cancelled();
        metrics.record_rejected();

        let stats = metrics.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.finished, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.failed, 0);
    }
}
