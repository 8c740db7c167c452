//! Warm restart state machine.
//!
//! ```text
//!            restart check             checkpoint saved       process stop
//!  Running ───────────────> Freezing ─────────────────> Frozen ────────────> Restarting
//!     ^                        │                                                 │
//!     │                        │ step failed (rolled back)       provisioning    │
//!     ├────────────────────────┘                                 done / timeout  │
//!     │                                                                          v
//!     └───────────────────────────────────────────────────────────────── Reconciling
//!
//!  any state ──(unrecoverable)──> Failed
//! ```
//!
//! A new instance started with warm boot begins in `Restarting`, holding the
//! checkpoint of the previous one. The coordinator never issues process
//! stop/start itself; the shutdown of a frozen instance is observed as the
//! move to `Restarting`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sonic_types::VlanId;
use tracing::{error, info, warn};

use super::checkpoint::{Checkpoint, CheckpointStore};
use super::metrics::WarmRestartMetrics;
use super::reconcile::{reconcile, ReconcilePolicy, ReconcileReport};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::error::{FdbSyncError, Result};
use crate::sync::FdbSync;

/// Default drain bound for notifications queued at freeze time.
pub const DEFAULT_DRAIN_LIMIT: usize = 1024;

/// Default wait for provisioning done before reconciling anyway.
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmRestartState {
    Running,
    Freezing,
    Frozen,
    Restarting,
    Reconciling,
    Failed,
}

impl WarmRestartState {
    /// Transitions of the restart cycle. `Failed` is reachable from every
    /// state and left by none.
    pub fn can_transition_to(self, to: WarmRestartState) -> bool {
        use WarmRestartState::*;
        match (self, to) {
            (Failed, _) => false,
            (_, Failed) => true,
            (Running, Freezing)
            | (Freezing, Frozen)
            | (Freezing, Running)
            | (Frozen, Restarting)
            | (Restarting, Reconciling)
            | (Reconciling, Running) => true,
            _ => false,
        }
    }

    /// Hardware learning is held disabled in these states.
    pub fn is_frozen(self) -> bool {
        matches!(
            self,
            WarmRestartState::Freezing | WarmRestartState::Frozen | WarmRestartState::Restarting
        )
    }
}

impl fmt::Display for WarmRestartState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WarmRestartState::Running => "running",
            WarmRestartState::Freezing => "freezing",
            WarmRestartState::Frozen => "frozen",
            WarmRestartState::Restarting => "restarting",
            WarmRestartState::Reconciling => "reconciling",
            WarmRestartState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Options of the restart check, as `orchagent_restart_check` passes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestartCheckRequest {
    /// Only report whether a restart would be safe; change nothing.
    pub no_freeze: bool,
    /// Freeze even if notifications remain queued after the drain.
    pub skip_pending_task_check: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartCheckReply {
    pub success: bool,
    pub state: WarmRestartState,
    /// Notifications still queued.
    pub pending: usize,
    /// Entries in the checkpoint, or in the table for a `no_freeze` check.
    pub entries: usize,
}

impl fmt::Display for RestartCheckReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            f.write_str("RESTARTCHECK succeeded")
        } else {
            f.write_str("RESTARTCHECK failed")
        }
    }
}

#[derive(Debug, Clone)]
pub struct WarmRestartCoordinatorConfig {
    /// Whether a freezing restart check is allowed at all.
    pub enabled: bool,
    pub drain_limit: usize,
    pub reconcile_timeout: Duration,
    pub policy: ReconcilePolicy,
}

impl Default for WarmRestartCoordinatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            drain_limit: DEFAULT_DRAIN_LIMIT,
            reconcile_timeout: Duration::from_secs(DEFAULT_RECONCILE_TIMEOUT_SECS),
            policy: ReconcilePolicy::default(),
        }
    }
}

pub struct WarmRestartCoordinator {
    state: WarmRestartState,
    config: WarmRestartCoordinatorConfig,
    store: Arc<dyn CheckpointStore>,
    /// Loaded at warm start, consumed by reconciliation.
    checkpoint: Option<Checkpoint>,
    reconcile_deadline: Option<Instant>,
    correlation_id: Option<String>,
    last_report: Option<ReconcileReport>,
    metrics: WarmRestartMetrics,
}

impl fmt::Debug for WarmRestartCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmRestartCoordinator")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("has_checkpoint", &self.checkpoint.is_some())
            .finish()
    }
}

impl WarmRestartCoordinator {
    pub fn new(config: WarmRestartCoordinatorConfig, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            state: WarmRestartState::Running,
            config,
            store,
            checkpoint: None,
            reconcile_deadline: None,
            correlation_id: None,
            last_report: None,
            metrics: WarmRestartMetrics::new(),
        }
    }

    pub fn state(&self) -> WarmRestartState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        info!(enabled, "Warm restart {}", if enabled { "enabled" } else { "disabled" });
        self.config.enabled = enabled;
    }

    /// Notifications are consumed only while running.
    pub fn accepts_notifications(&self) -> bool {
        self.state == WarmRestartState::Running
    }

    pub fn reconcile_deadline(&self) -> Option<Instant> {
        self.reconcile_deadline
    }

    pub fn metrics(&self) -> &WarmRestartMetrics {
        &self.metrics
    }

    pub fn last_report(&self) -> Option<&ReconcileReport> {
        self.last_report.as_ref()
    }

    fn transition(&mut self, to: WarmRestartState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(FdbSyncError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        info!(from = %self.state, to = %to, "Warm restart state change");
        self.state = to;
        Ok(())
    }

    fn audit(&self, action: &str) -> AuditRecord {
        self.audit_as(AuditCategory::WarmRestart, action)
    }

    fn audit_as(&self, category: AuditCategory, action: &str) -> AuditRecord {
        let record = AuditRecord::new(category, "WarmRestartCoordinator", action);
        match &self.correlation_id {
            Some(id) => record.with_correlation_id(id.clone()),
            None => record,
        }
    }

    // ========== Old instance: freeze ==========

    /// Handles a restart check.
    ///
    /// A freezing check returns only once the checkpoint is saved and the
    /// coordinator is `Frozen`. Re-issuing it while frozen reports success
    /// again. If any step fails the freeze is undone and the coordinator is
    /// back in `Running`, so the check can simply be retried.
    pub fn restart_check(
        &mut self,
        sync: &mut FdbSync,
        request: RestartCheckRequest,
    ) -> Result<RestartCheckReply> {
        match self.state {
            WarmRestartState::Failed => return Err(FdbSyncError::EngineFailed),
            WarmRestartState::Frozen => {
                return Ok(RestartCheckReply {
                    success: true,
                    state: self.state,
                    pending: sync.notifications().pending(),
                    entries: sync.fdb.count(),
                })
            }
            _ => {}
        }

        if request.no_freeze {
            let pending = sync.notifications().pending();
            return Ok(RestartCheckReply {
                success: self.state == WarmRestartState::Running
                    && (pending == 0 || request.skip_pending_task_check),
                state: self.state,
                pending,
                entries: sync.fdb.count(),
            });
        }

        if !self.config.enabled {
            return Err(FdbSyncError::WarmRestartDisabled);
        }
        self.transition(WarmRestartState::Freezing)?;
        self.correlation_id = Some(format!("wr-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f")));
        let started = Instant::now();

        match self.freeze(sync, request) {
            Ok(checkpoint) => {
                self.transition(WarmRestartState::Frozen)?;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.metrics.record_freeze(elapsed_ms);
                self.metrics.record_checkpoint_saved();
                info!(
                    entries = checkpoint.entries.len(),
                    resource_count = checkpoint.resource_count,
                    elapsed_ms,
                    "FDB frozen for warm restart"
                );
                audit_log!(self
                    .audit("freeze")
                    .with_outcome(AuditOutcome::Success)
                    .with_details(serde_json::json!({
                        "entries": checkpoint.entries.len(),
                        "resource_count": checkpoint.resource_count,
                        "bridge_domains": checkpoint.bridge_domains.len(),
                    })));
                Ok(RestartCheckReply {
                    success: true,
                    state: self.state,
                    pending: sync.notifications().pending(),
                    entries: checkpoint.entries.len(),
                })
            }
            Err(e) => {
                warn!(error = %e, "Restart check failed, resuming normal operation");
                self.roll_back(sync);
                self.metrics.record_freeze_failure();
                audit_log!(self.audit("freeze").with_error(e.to_string()));
                self.correlation_id = None;
                Err(e)
            }
        }
    }

    fn freeze(&mut self, sync: &mut FdbSync, request: RestartCheckRequest) -> Result<Checkpoint> {
        let limit = self.config.drain_limit;
        let mut drained = sync.process_pending(limit);
        sync.learning.freeze_all()?;

        // Learning is off now, so nothing new arrives behind what is queued.
        // Whatever is still queued was learned before the ports were disabled.
        drained += sync.process_backlog(limit.saturating_sub(drained));
        let pending = sync.notifications().pending();
        if pending > 0 && !request.skip_pending_task_check {
            return Err(FdbSyncError::PendingTasks(pending));
        }
        if drained > 0 {
            info!(drained, "Applied queued FDB notifications before freeze");
        }

        sync.fdb.freeze();
        let checkpoint = Checkpoint::new(
            sync.fdb.snapshot(),
            sync.learning.frozen_modes().cloned().unwrap_or_default(),
            sync.fdb.counter().value(),
            sync.learning.vlans(),
        );
        self.store.save(&checkpoint)?;
        Ok(checkpoint)
    }

    fn roll_back(&mut self, sync: &mut FdbSync) {
        sync.fdb.unfreeze();
        if sync.learning.is_frozen() {
            if let Err(e) = sync.learning.restore_frozen_modes() {
                error!(error = %e, "Failed to restore learning modes after aborted freeze");
            }
        }
        if let Err(e) = self.store.discard() {
            warn!(error = %e, "Failed to discard checkpoint after aborted freeze");
        }
        self.state = WarmRestartState::Running;
    }

    /// Observes the stop of this instance. A frozen instance is now
    /// restarting; any other state is left as is.
    pub fn on_shutdown(&mut self) -> WarmRestartState {
        if self.state == WarmRestartState::Frozen {
            // Frozen -> Restarting is always a valid transition.
            let _ = self.transition(WarmRestartState::Restarting);
            audit_log!(self.audit("shutdown").with_outcome(AuditOutcome::Success));
        }
        self.state
    }

    // ========== New instance: start and reconcile ==========

    /// Starts a new instance from the previous instance's checkpoint.
    ///
    /// Learning is frozen before any bridge port exists, so ports provisioned
    /// from here on come up with learning disabled. Reconciliation starts on
    /// provisioning done or when the deadline passes.
    pub fn warm_start(&mut self, sync: &mut FdbSync) -> Result<()> {
        self.state = WarmRestartState::Restarting;
        self.correlation_id = Some(format!("wr-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f")));
        self.metrics.record_warm_start();

        let loaded = sync
            .learning
            .freeze_all()
            .and_then(|()| self.store.take());
        match loaded {
            Ok(checkpoint) => {
                sync.fdb.begin_warm_start(checkpoint.resource_count);
                info!(
                    entries = checkpoint.entries.len(),
                    taken_at = %checkpoint.taken_at,
                    timeout_secs = self.config.reconcile_timeout.as_secs(),
                    "Warm start, waiting for provisioning before reconciliation"
                );
                audit_log!(self
                    .audit("load_checkpoint")
                    .with_outcome(AuditOutcome::Success)
                    .with_details(serde_json::json!({ "entries": checkpoint.entries.len() })));
                self.checkpoint = Some(checkpoint);
                self.reconcile_deadline = Some(Instant::now() + self.config.reconcile_timeout);
                Ok(())
            }
            Err(e) => {
                self.fail(sync, &e);
                Err(e)
            }
        }
    }

    /// Starts with an empty table. Any stale checkpoint is discarded.
    pub fn cold_start(&mut self, sync: &mut FdbSync) -> Result<()> {
        if let Err(e) = self.store.discard() {
            warn!(error = %e, "Failed to discard stale checkpoint");
        }
        sync.fdb.restore(Vec::new())?;
        self.state = WarmRestartState::Running;
        self.metrics.record_cold_start();
        info!("Cold start");
        Ok(())
    }

    /// Reconciles after the external provisioning has finished.
    pub fn on_provisioning_done(&mut self, sync: &mut FdbSync) -> Result<ReconcileReport> {
        if self.state != WarmRestartState::Restarting {
            return Err(FdbSyncError::InvalidTransition {
                from: self.state,
                to: WarmRestartState::Reconciling,
            });
        }
        self.run_reconcile(sync)
    }

    /// Reconciles because provisioning done never came.
    pub fn on_reconcile_timeout(&mut self, sync: &mut FdbSync) -> Result<ReconcileReport> {
        if self.state != WarmRestartState::Restarting {
            return Err(FdbSyncError::InvalidTransition {
                from: self.state,
                to: WarmRestartState::Reconciling,
            });
        }
        warn!("Provisioning not done before reconcile timeout, reconciling anyway");
        self.metrics.record_reconcile_timeout();
        self.run_reconcile(sync)
    }

    fn run_reconcile(&mut self, sync: &mut FdbSync) -> Result<ReconcileReport> {
        self.transition(WarmRestartState::Reconciling)?;
        self.reconcile_deadline = None;
        let started = Instant::now();

        let result = match self.checkpoint.take() {
            Some(checkpoint) => self.reconcile_and_resume(sync, &checkpoint),
            None => Err(FdbSyncError::CheckpointUnavailable(
                "checkpoint already consumed".to_string(),
            )),
        };

        match result {
            Ok(report) => {
                self.transition(WarmRestartState::Running)?;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.metrics.record_reconcile(&report, elapsed_ms);
                info!(
                    confirmed = report.confirmed,
                    moved = report.moved,
                    aged = report.aged,
                    late_learned = report.late_learned,
                    adopted = report.adopted,
                    rebound = report.rebound,
                    entries = sync.fdb.count(),
                    elapsed_ms,
                    "Warm restart reconciliation complete"
                );
                audit_log!(self
                    .audit("reconcile")
                    .with_outcome(AuditOutcome::Success)
                    .with_details(serde_json::to_value(&report).unwrap_or_default()));
                self.correlation_id = None;
                self.last_report = Some(report.clone());
                Ok(report)
            }
            Err(e) => {
                self.fail(sync, &e);
                Err(e)
            }
        }
    }

    fn reconcile_and_resume(
        &mut self,
        sync: &mut FdbSync,
        checkpoint: &Checkpoint,
    ) -> Result<ReconcileReport> {
        let events = sync.notifications().drain(usize::MAX);
        let vlans: BTreeSet<VlanId> = checkpoint
            .bridge_domains
            .iter()
            .copied()
            .chain(sync.learning.vlans())
            .collect();
        let vlans: Vec<VlanId> = vlans.into_iter().collect();
        let hardware = sync.fdb_api().get_fdb_entries(&vlans)?;

        let outcome = reconcile(
            checkpoint,
            &sync.learning,
            &events,
            &hardware,
            &self.config.policy,
        )?;

        sync.fdb.restore(outcome.entries)?;
        sync.learning.unfreeze_all()?;
        sync.fdb.unfreeze();
        Ok(outcome.report)
    }

    /// Enters `Failed`: table emptied, learning left disabled, checkpoint
    /// dropped. Only a cold start recovers.
    fn fail(&mut self, sync: &mut FdbSync, cause: &FdbSyncError) {
        error!(from = %self.state, error = %cause, "Warm restart failed, cold restart required");
        self.state = WarmRestartState::Failed;
        self.checkpoint = None;
        self.reconcile_deadline = None;
        self.metrics.record_failure();

        sync.fdb.freeze();
        if let Err(e) = sync.fdb.restore(Vec::new()) {
            error!(error = %e, "Failed to empty FDB table");
        }
        audit_log!(self
            .audit_as(AuditCategory::ErrorCondition, "warm_restart")
            .with_details(serde_json::json!({ "state": WarmRestartState::Failed }))
            .with_error(cause.to_string()));
        self.correlation_id = None;
    }
}
