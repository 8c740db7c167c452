//! Warm restart lifecycle counters.

use serde::{Deserialize, Serialize};

use super::reconcile::ReconcileReport;

/// Metrics for warm restart lifecycle tracking and observability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarmRestartMetrics {
    /// Successful freezing restart checks
    pub freeze_count: u64,
    /// Restart checks that failed and rolled back
    pub freeze_failure_count: u64,
    pub checkpoint_saved_count: u64,
    pub warm_start_count: u64,
    pub cold_start_count: u64,
    pub reconcile_count: u64,
    /// Reconciliations started by the timeout rather than provisioning done
    pub reconcile_timeout_count: u64,
    pub failure_count: u64,
    /// Entries confirmed across all reconciliations
    pub entries_confirmed: u64,
    pub entries_moved: u64,
    pub entries_aged: u64,
    pub entries_unexplained: u64,
    /// Last freeze timestamp (Unix seconds)
    pub last_freeze_secs: Option<u64>,
    /// Last completed reconciliation timestamp (Unix seconds)
    pub last_reconcile_secs: Option<u64>,
    pub last_freeze_duration_ms: Option<u64>,
    pub last_reconcile_duration_ms: Option<u64>,
}

impl WarmRestartMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed freeze
    pub fn record_freeze(&mut self, duration_ms: u64) {
        self.freeze_count += 1;
        self.last_freeze_secs = Some(current_timestamp());
        self.last_freeze_duration_ms = Some(duration_ms);
    }

    pub fn record_freeze_failure(&mut self) {
        self.freeze_failure_count += 1;
    }

    pub fn record_checkpoint_saved(&mut self) {
        self.checkpoint_saved_count += 1;
    }

    pub fn record_warm_start(&mut self) {
        self.warm_start_count += 1;
    }

    pub fn record_cold_start(&mut self) {
        self.cold_start_count += 1;
    }

    pub fn record_reconcile_timeout(&mut self) {
        self.reconcile_timeout_count += 1;
    }

    /// Record a completed reconciliation
    pub fn record_reconcile(&mut self, report: &ReconcileReport, duration_ms: u64) {
        self.reconcile_count += 1;
        self.entries_confirmed += report.confirmed as u64;
        self.entries_moved += report.moved as u64;
        self.entries_aged += report.aged as u64;
        self.entries_unexplained += report.unexplained.len() as u64;
        self.last_reconcile_secs = Some(current_timestamp());
        self.last_reconcile_duration_ms = Some(duration_ms);
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
    }

    /// Get total starts tracked
    pub fn total_starts(&self) -> u64 {
        self.warm_start_count + self.cold_start_count
    }

    /// Get warm start percentage
    pub fn warm_start_percentage(&self) -> f64 {
        let total = self.total_starts();
        if total == 0 {
            0.0
        } else {
            (self.warm_start_count as f64 / total as f64) * 100.0
        }
    }
}

/// Get current Unix timestamp in seconds
fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_record_freeze() {
        let mut metrics = WarmRestartMetrics::new();
        metrics.record_freeze(12);
        assert_eq!(metrics.freeze_count, 1);
        assert_eq!(metrics.last_freeze_duration_ms, Some(12));
        assert!(metrics.last_freeze_secs.is_some());
    }

    #[test]
    fn test_record_reconcile_accumulates() {
        let mut metrics = WarmRestartMetrics::new();
        let report = ReconcileReport {
            confirmed: 2,
            moved: 1,
            ..Default::default()
        };
        metrics.record_reconcile(&report, 5);
        metrics.record_reconcile(&report, 7);

        assert_eq!(metrics.reconcile_count, 2);
        assert_eq!(metrics.entries_confirmed, 4);
        assert_eq!(metrics.entries_moved, 2);
        assert_eq!(metrics.last_reconcile_duration_ms, Some(7));
    }

    #[test]
    fn test_warm_start_percentage() {
        let mut metrics = WarmRestartMetrics::new();
        assert_eq!(metrics.warm_start_percentage(), 0.0);

        metrics.record_warm_start();
        metrics.record_cold_start();
        assert_eq!(metrics.total_starts(), 2);
        assert_eq!(metrics.warm_start_percentage(), 50.0);
    }
}
