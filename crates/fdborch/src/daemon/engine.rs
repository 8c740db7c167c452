//! FdbSyncEngine implementation.

use std::ops::ControlFlow;
use std::sync::Arc;

use sonic_sai::{BridgePortApi, FdbApi, FdbFlushScope, FdbLearningMode, SwitchApi};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::handle::EngineHandle;
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::config::{FdbSyncConfig, StateMirrorMode};
use crate::crm::{CrmOrch, FdbResourceCounter};
use crate::error::{FdbSyncError, Result};
use crate::fdb::{FdbEntry, FdbOrch, FdbOrchStats};
use crate::learning::LearningModeController;
use crate::notification::HardwareNotificationChannel;
use crate::sim::VirtualSwitch;
use crate::state::{QueuedStateWriter, StateMirror, Table, COUNTERS_CRM_TABLE_NAME};
use crate::sync::{FdbSync, FdbSyncStats};
use crate::warm_restart::{
    CheckpointStore, ReconcileReport, RestartCheckReply, RestartCheckRequest,
    WarmRestartCoordinator, WarmRestartMetrics, WarmRestartState,
};
use sonic_types::VlanId;

/// Depth of the command channel between handles and the engine task.
const COMMAND_QUEUE_DEPTH: usize = 64;

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Requests served by the engine task.
#[derive(Debug)]
pub(crate) enum EngineCommand {
    AddBridgePort {
        alias: String,
        oid: sonic_sai::BridgePortOid,
        vlans: Vec<VlanId>,
        reply: Reply<()>,
    },
    RemoveBridgePort {
        alias: String,
        reply: Reply<()>,
    },
    SetLearnMode {
        alias: String,
        mode: FdbLearningMode,
        reply: Reply<bool>,
    },
    LearnMode {
        alias: String,
        reply: Reply<Option<FdbLearningMode>>,
    },
    ConfigureCrm {
        field: String,
        value: String,
        reply: Reply<()>,
    },
    RestartCheck {
        request: RestartCheckRequest,
        reply: Reply<RestartCheckReply>,
    },
    EnableWarmRestart {
        enabled: bool,
        reply: Reply<()>,
    },
    ProvisioningDone {
        reply: Reply<ReconcileReport>,
    },
    ClearFdb {
        reply: Reply<usize>,
    },
    Snapshot {
        reply: Reply<Vec<FdbEntry>>,
    },
    Status {
        reply: Reply<EngineStatus>,
    },
    Shutdown {
        reply: Reply<WarmRestartState>,
    },
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub state: WarmRestartState,
    pub entries: usize,
    pub resource_count: u32,
    pub pending_notifications: usize,
    pub fdb: FdbOrchStats,
    pub sync: FdbSyncStats,
    pub warm_restart: WarmRestartMetrics,
    pub last_reconcile: Option<ReconcileReport>,
}

/// Collaborators an engine instance runs against.
///
/// The notification channel, checkpoint store, state mirror and counters
/// table outlive any one instance; hand the same ones to the instance that
/// replaces this one after a warm restart.
#[derive(Clone)]
pub struct EngineDeps {
    pub bridge_port_api: Arc<dyn BridgePortApi>,
    pub fdb_api: Arc<dyn FdbApi>,
    pub switch_api: Arc<dyn SwitchApi>,
    pub notifications: HardwareNotificationChannel,
    pub checkpoint_store: Arc<dyn CheckpointStore>,
    pub state_mirror: StateMirror,
    /// COUNTERS_DB `CRM` table.
    pub counters: Table,
}

impl EngineDeps {
    /// Runs against a simulated switch.
    pub fn virtual_switch(
        switch: &VirtualSwitch,
        checkpoint_store: Arc<dyn CheckpointStore>,
        state_mirror: StateMirror,
        counters: Table,
    ) -> Self {
        let switch = Arc::new(switch.clone());
        Self {
            bridge_port_api: switch.clone(),
            fdb_api: switch.clone(),
            notifications: switch.notifications().clone(),
            switch_api: switch,
            checkpoint_store,
            state_mirror,
            counters,
        }
    }

    /// Fresh long-lived state around a simulated switch.
    pub fn new_virtual(switch: &VirtualSwitch, checkpoint_store: Arc<dyn CheckpointStore>) -> Self {
        Self::virtual_switch(
            switch,
            checkpoint_store,
            StateMirror::new(),
            Table::new(COUNTERS_CRM_TABLE_NAME),
        )
    }
}

/// One instance of the FDB sync process.
///
/// All table state is owned by the task running [`run`](Self::run); everything
/// else talks to it through an [`EngineHandle`]. Commands, hardware
/// notifications, the reconcile deadline and the CRM poll are multiplexed on
/// that one task, so FDB mutations are strictly serialized.
pub struct FdbSyncEngine {
    config: FdbSyncConfig,
    sync: FdbSync,
    coordinator: WarmRestartCoordinator,
    crm: CrmOrch,
    mirror: StateMirror,
    commands: mpsc::Receiver<EngineCommand>,
}

impl std::fmt::Debug for FdbSyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdbSyncEngine")
            .field("state", &self.coordinator.state())
            .field("entries", &self.sync.fdb.count())
            .field("warm_boot", &self.config.warm_boot)
            .finish()
    }
}

impl FdbSyncEngine {
    pub fn new(config: FdbSyncConfig, deps: EngineDeps) -> (Self, EngineHandle) {
        let counter = Arc::new(FdbResourceCounter::new());
        let sync = FdbSync::new(
            FdbOrch::new(counter.clone()),
            LearningModeController::new(deps.bridge_port_api),
            deps.notifications,
            deps.fdb_api,
        );
        let coordinator =
            WarmRestartCoordinator::new(config.coordinator_config(), deps.checkpoint_store);
        let crm = CrmOrch::new(
            config.crm_config(),
            counter.clone(),
            deps.switch_api,
            deps.counters.clone(),
        );

        let (tx, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let handle = EngineHandle::new(tx, deps.state_mirror.clone(), counter, deps.counters);

        let engine = Self {
            config,
            sync,
            coordinator,
            crm,
            mirror: deps.state_mirror,
            commands,
        };
        (engine, handle)
    }

    /// Runs until shut down or until every handle is dropped. Returns the
    /// warm restart state the instance stopped in.
    pub async fn run(mut self) -> WarmRestartState {
        let writer = self.attach_state_mirror();
        self.start();

        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "FdbSyncEngine", "start")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({
                "warm_boot": self.config.warm_boot,
                "state": self.coordinator.state().to_string(),
            })));

        let mut crm_period = self.crm.polling_interval();
        let mut crm_tick = crm_interval(crm_period);
        let notifications = self.sync.notifications().clone();

        loop {
            let accepting = self.coordinator.accepts_notifications();
            let deadline = self.coordinator.reconcile_deadline();
            let sleep_until = deadline.unwrap_or_else(std::time::Instant::now);

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command).is_break() {
                            break;
                        }
                    }
                    None => {
                        info!("All engine handles dropped");
                        self.coordinator.on_shutdown();
                        break;
                    }
                },
                notification = notifications.recv(), if accepting => {
                    self.sync.handle_notification(&notification);
                    self.sync.process_pending(self.config.notification.drain_limit);
                }
                _ = time::sleep_until(time::Instant::from_std(sleep_until)), if deadline.is_some() => {
                    if let Err(e) = self.coordinator.on_reconcile_timeout(&mut self.sync) {
                        error!(error = %e, "Reconciliation after timeout failed");
                    }
                }
                _ = crm_tick.tick() => {
                    self.crm.handle_timer_expiration();
                }
            }

            if self.crm.polling_interval() != crm_period {
                crm_period = self.crm.polling_interval();
                crm_tick = crm_interval(crm_period);
            }
        }

        let state = self.coordinator.state();
        info!(state = %state, entries = self.sync.fdb.count(), "FDB sync engine stopped");
        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "FdbSyncEngine", "stop")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({ "state": state.to_string() })));

        // The queued writer exits once the table, its only sender, is gone.
        drop(self);
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!(error = %e, "State mirror writer ended abnormally");
            }
        }
        state
    }

    fn attach_state_mirror(&mut self) -> Option<JoinHandle<()>> {
        match self.config.state_mirror.mode {
            StateMirrorMode::Synchronous => {
                self.sync.fdb.add_observer(Arc::new(self.mirror.clone()));
                None
            }
            StateMirrorMode::Queued => {
                let (writer, task) = QueuedStateWriter::spawn(self.mirror.clone());
                self.sync.fdb.add_observer(Arc::new(writer));
                Some(task)
            }
        }
    }

    fn start(&mut self) {
        let result = if self.config.warm_boot {
            self.coordinator.warm_start(&mut self.sync)
        } else {
            self.coordinator.cold_start(&mut self.sync)
        };
        if let Err(e) = result {
            error!(warm_boot = self.config.warm_boot, error = %e, "Engine start failed");
        }
    }

    fn handle_command(&mut self, command: EngineCommand) -> ControlFlow<()> {
        match command {
            EngineCommand::AddBridgePort {
                alias,
                oid,
                vlans,
                reply,
            } => {
                let _ = reply.send(self.sync.learning.add_bridge_port(&alias, oid, vlans));
            }
            EngineCommand::RemoveBridgePort { alias, reply } => {
                let _ = reply.send(self.remove_bridge_port(&alias));
            }
            EngineCommand::SetLearnMode { alias, mode, reply } => {
                let _ = reply.send(self.sync.learning.set_mode(&alias, mode));
            }
            EngineCommand::LearnMode { alias, reply } => {
                let _ = reply.send(Ok(self.sync.learning.mode(&alias)));
            }
            EngineCommand::ConfigureCrm {
                field,
                value,
                reply,
            } => {
                let result = self
                    .crm
                    .handle_config_field(&field, &value)
                    .map_err(|e| FdbSyncError::Configuration(e.to_string()));
                let _ = reply.send(result);
            }
            EngineCommand::RestartCheck { request, reply } => {
                let _ = reply.send(self.coordinator.restart_check(&mut self.sync, request));
            }
            EngineCommand::EnableWarmRestart { enabled, reply } => {
                self.coordinator.set_enabled(enabled);
                let _ = reply.send(Ok(()));
            }
            EngineCommand::ProvisioningDone { reply } => {
                let _ = reply.send(self.coordinator.on_provisioning_done(&mut self.sync));
            }
            EngineCommand::ClearFdb { reply } => {
                let _ = reply.send(self.clear_fdb());
            }
            EngineCommand::Snapshot { reply } => {
                let _ = reply.send(Ok(self.sync.fdb.snapshot()));
            }
            EngineCommand::Status { reply } => {
                let _ = reply.send(Ok(self.status()));
            }
            EngineCommand::Shutdown { reply } => {
                let state = self.coordinator.on_shutdown();
                let _ = reply.send(Ok(state));
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Removes the port; its dynamic entries go with it unless frozen.
    fn remove_bridge_port(&mut self, alias: &str) -> Result<()> {
        self.sync.learning.remove_bridge_port(alias)?;
        if !self.sync.fdb.is_frozen() {
            let flushed = self.sync.fdb.flush(None, Some(alias))?;
            debug!(port = alias, flushed, "Flushed entries of removed port");
        }
        Ok(())
    }

    /// Administrative clear: empties the table and mirror, then flushes
    /// dynamic entries from the ASIC so they are relearned.
    fn clear_fdb(&mut self) -> Result<usize> {
        if self.coordinator.state() == WarmRestartState::Failed {
            return Err(FdbSyncError::EngineFailed);
        }
        let cleared = self.sync.fdb.clear_all()?;
        if self.config.fdb.flush_hardware_on_clear {
            let flushed = self
                .sync
                .fdb_api()
                .flush_fdb_entries(FdbFlushScope::all_dynamic())?;
            debug!(flushed, "Hardware FDB flushed");
        }
        info!(cleared, "FDB cleared");
        Ok(cleared)
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.coordinator.state(),
            entries: self.sync.fdb.count(),
            resource_count: self.sync.fdb.counter().value(),
            pending_notifications: self.sync.notifications().pending(),
            fdb: self.sync.fdb.stats().clone(),
            sync: self.sync.stats().clone(),
            warm_restart: self.coordinator.metrics().clone(),
            last_reconcile: self.coordinator.last_report().cloned(),
        }
    }
}

fn crm_interval(period: std::time::Duration) -> time::Interval {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warm_restart::MemoryCheckpointStore;
    use pretty_assertions::assert_eq;
    use sonic_types::{AdminState, MacAddress};
    use std::time::Duration;

    fn vlan6() -> VlanId {
        VlanId::new(6).unwrap()
    }

    fn synchronous_config() -> FdbSyncConfig {
        let mut config = FdbSyncConfig::default();
        config.state_mirror.mode = StateMirrorMode::Synchronous;
        config.warm_restart.enabled = true;
        config
    }

    async fn provision(switch: &VirtualSwitch, handle: &EngineHandle, alias: &str) {
        let oid = switch.create_bridge_port(alias, [vlan6()]);
        handle.add_bridge_port(alias, oid, vec![vlan6()]).await.unwrap();
        switch.set_admin_state(alias, AdminState::Up).unwrap();
    }

    /// Waits for the engine to apply everything the switch published.
    async fn settle(switch: &VirtualSwitch, handle: &EngineHandle) {
        for _ in 0..100 {
            if switch.notifications().pending() == 0 {
                // One round trip orders us after the notification just taken.
                handle.status().await.unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("notifications not consumed");
    }

    #[tokio::test]
    async fn test_learn_reaches_table_and_mirror() {
        let switch = VirtualSwitch::new(HardwareNotificationChannel::new(64), 64);
        let deps = EngineDeps::new_virtual(&switch, Arc::new(MemoryCheckpointStore::new()));
        let (engine, handle) = FdbSyncEngine::new(synchronous_config(), deps);
        let task = tokio::spawn(engine.run());

        provision(&switch, &handle, "Ethernet64").await;
        switch.learn(vlan6(), MacAddress::local_from_index(1), "Ethernet64");
        settle(&switch, &handle).await;

        assert_eq!(handle.resource_count(), 1);
        assert!(handle.fdb_entry_exists(
            "Vlan6:02:00:00:00:00:01",
            &[("port", "Ethernet64"), ("type", "dynamic")]
        ));

        assert_eq!(handle.shutdown().await.unwrap(), WarmRestartState::Running);
        assert_eq!(task.await.unwrap(), WarmRestartState::Running);
    }

    #[tokio::test]
    async fn test_clear_flushes_hardware() {
        let switch = VirtualSwitch::new(HardwareNotificationChannel::new(64), 64);
        let deps = EngineDeps::new_virtual(&switch, Arc::new(MemoryCheckpointStore::new()));
        let (engine, handle) = FdbSyncEngine::new(synchronous_config(), deps);
        tokio::spawn(engine.run());

        provision(&switch, &handle, "Ethernet64").await;
        switch.learn(vlan6(), MacAddress::local_from_index(1), "Ethernet64");
        switch.learn(vlan6(), MacAddress::local_from_index(2), "Ethernet64");
        settle(&switch, &handle).await;

        assert_eq!(handle.clear_fdb().await.unwrap(), 2);
        assert_eq!(handle.resource_count(), 0);
        assert!(handle.query_fdb("Vlan6:").is_empty());
        assert!(switch.fdb_entries().is_empty());
        settle(&switch, &handle).await;
        assert_eq!(handle.status().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_clear_rejected_while_frozen() {
        let switch = VirtualSwitch::new(HardwareNotificationChannel::new(64), 64);
        let deps = EngineDeps::new_virtual(&switch, Arc::new(MemoryCheckpointStore::new()));
        let (engine, handle) = FdbSyncEngine::new(synchronous_config(), deps);
        tokio::spawn(engine.run());

        provision(&switch, &handle, "Ethernet64").await;
        switch.learn(vlan6(), MacAddress::local_from_index(1), "Ethernet64");
        settle(&switch, &handle).await;

        handle.restart_check(RestartCheckRequest::default()).await.unwrap();
        assert!(matches!(handle.clear_fdb().await, Err(FdbSyncError::FrozenTable)));
        assert_eq!(handle.resource_count(), 1);
        assert_eq!(switch.fdb_entries().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_bridge_port_flushes_its_entries() {
        let switch = VirtualSwitch::new(HardwareNotificationChannel::new(64), 64);
        let deps = EngineDeps::new_virtual(&switch, Arc::new(MemoryCheckpointStore::new()));
        let (engine, handle) = FdbSyncEngine::new(synchronous_config(), deps);
        tokio::spawn(engine.run());

        provision(&switch, &handle, "Ethernet64").await;
        provision(&switch, &handle, "Ethernet68").await;
        switch.learn(vlan6(), MacAddress::local_from_index(1), "Ethernet64");
        switch.learn(vlan6(), MacAddress::local_from_index(2), "Ethernet68");
        settle(&switch, &handle).await;

        handle.remove_bridge_port("Ethernet64").await.unwrap();
        let entries = handle.snapshot().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].port, "Ethernet68");
        assert!(matches!(
            handle.set_learn_mode("Ethernet64", FdbLearningMode::Disable).await,
            Err(FdbSyncError::InvalidPort(_))
        ));
    }

    #[tokio::test]
    async fn test_configure_crm_publishes_counters() {
        let switch = VirtualSwitch::new(HardwareNotificationChannel::new(64), 64);
        let deps = EngineDeps::new_virtual(&switch, Arc::new(MemoryCheckpointStore::new()));
        let (engine, handle) = FdbSyncEngine::new(synchronous_config(), deps);
        tokio::spawn(engine.run());

        assert!(matches!(
            handle.configure_crm("fdb_entry_low_threshold", "99").await,
            Err(FdbSyncError::Configuration(_))
        ));
        handle.configure_crm("polling_interval", "1").await.unwrap();

        // The first tick fires immediately; wait for it to land.
        for _ in 0..100 {
            if handle.crm_stats().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let stats = handle.crm_stats().unwrap();
        assert_eq!(stats["crm_stats_fdb_entry_used"], "0");
        assert_eq!(stats["crm_stats_fdb_entry_available"], "64");
    }

    #[tokio::test]
    async fn test_zero_polling_interval_rejected() {
        let switch = VirtualSwitch::new(HardwareNotificationChannel::new(64), 64);
        let deps = EngineDeps::new_virtual(&switch, Arc::new(MemoryCheckpointStore::new()));
        let (engine, handle) = FdbSyncEngine::new(synchronous_config(), deps);
        let task = tokio::spawn(engine.run());

        assert!(matches!(
            handle.configure_crm("polling_interval", "0").await,
            Err(FdbSyncError::Configuration(_))
        ));
        // The engine keeps serving commands.
        assert_eq!(handle.state().await.unwrap(), WarmRestartState::Running);
        assert_eq!(handle.shutdown().await.unwrap(), WarmRestartState::Running);
        assert_eq!(task.await.unwrap(), WarmRestartState::Running);
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_engine() {
        let switch = VirtualSwitch::new(HardwareNotificationChannel::new(64), 64);
        let deps = EngineDeps::new_virtual(&switch, Arc::new(MemoryCheckpointStore::new()));
        let (engine, handle) = FdbSyncEngine::new(FdbSyncConfig::default(), deps);
        let task = tokio::spawn(engine.run());

        drop(handle);
        assert_eq!(task.await.unwrap(), WarmRestartState::Running);
    }
}
