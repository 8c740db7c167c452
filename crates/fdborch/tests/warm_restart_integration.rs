//! End-to-end warm restart against the simulated switch.
//!
//! Each test plays both process instances: the one that freezes and stops,
//! and the one started with warm boot that reconciles. The switch, the
//! notification channel, the checkpoint store, STATE_DB and COUNTERS_DB are
//! shared between them the way they outlive orchagent on a real switch.

use pretty_assertions::assert_eq;
use sonic_fdborch::state::{Table, COUNTERS_CRM_TABLE_NAME};
use sonic_fdborch::{
    CheckpointStore, EngineDeps, EngineHandle, FdbEntryType, FdbSyncConfig, FdbSyncEngine,
    FdbSyncError, FileCheckpointStore, HardwareNotificationChannel, MemoryCheckpointStore,
    RestartCheckRequest, StateMirror, VirtualSwitch, WarmRestartState,
};
use sonic_sai::FdbLearningMode;
use sonic_types::{AdminState, MacAddress, VlanId};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const PORTS: [&str; 2] = ["Ethernet64", "Ethernet68"];

fn vlan6() -> VlanId {
    VlanId::new(6).unwrap()
}

fn host(index: u32) -> MacAddress {
    MacAddress::local_from_index(index)
}

/// What survives a restart of the FDB sync process.
struct Switch {
    asic: VirtualSwitch,
    store: Arc<dyn CheckpointStore>,
    mirror: StateMirror,
    counters: Table,
}

impl Switch {
    fn new() -> Self {
        Self::with_store(Arc::new(MemoryCheckpointStore::new()))
    }

    fn with_store(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            asic: VirtualSwitch::new(HardwareNotificationChannel::new(1024), 4096),
            store,
            mirror: StateMirror::new(),
            counters: Table::new(COUNTERS_CRM_TABLE_NAME),
        }
    }

    fn start(&self, config: FdbSyncConfig) -> (EngineHandle, JoinHandle<WarmRestartState>) {
        let deps = EngineDeps::virtual_switch(
            &self.asic,
            self.store.clone(),
            self.mirror.clone(),
            self.counters.clone(),
        );
        let (engine, handle) = FdbSyncEngine::new(config, deps);
        (handle, tokio::spawn(engine.run()))
    }

    /// Creates VLAN membership and bridge ports, then brings ports up.
    async fn provision(&self, handle: &EngineHandle) {
        for alias in PORTS {
            let oid = self.asic.create_bridge_port(alias, [vlan6()]);
            handle.add_bridge_port(alias, oid, vec![vlan6()]).await.unwrap();
            self.asic.set_admin_state(alias, AdminState::Up).unwrap();
        }
    }

    /// Two hosts behind different ports talking to each other.
    fn exchange_traffic(&self) {
        self.asic.learn(vlan6(), host(1), PORTS[0]);
        self.asic.learn(vlan6(), host(2), PORTS[1]);
    }
}

fn warm_restart_config() -> FdbSyncConfig {
    let mut config = FdbSyncConfig::default();
    config.warm_restart.enabled = true;
    config
}

fn warm_boot_config() -> FdbSyncConfig {
    let mut config = warm_restart_config();
    config.warm_boot = true;
    config
}

async fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    for _ in 0..400 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn wait_for_state(handle: &EngineHandle, state: WarmRestartState) {
    for _ in 0..600 {
        if handle.state().await.unwrap() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("engine never reached {}", state);
}

fn entry_exists(handle: &EngineHandle, index: u32, port: &str) -> bool {
    handle.fdb_entry_exists(
        &format!("Vlan6:{}", host(index)),
        &[("port", port), ("type", "dynamic")],
    )
}

/// Runs the old instance up to a completed freeze and stop.
async fn freeze_and_stop(switch: &Switch, handle: EngineHandle, task: JoinHandle<WarmRestartState>) {
    let reply = handle
        .restart_check(RestartCheckRequest::default())
        .await
        .unwrap();
    assert!(reply.success);
    assert_eq!(reply.to_string(), "RESTARTCHECK succeeded");

    for alias in PORTS {
        assert_eq!(
            switch.asic.bridge_port_learning_mode(alias),
            Some(FdbLearningMode::Disable)
        );
    }

    assert_eq!(handle.shutdown().await.unwrap(), WarmRestartState::Restarting);
    assert_eq!(task.await.unwrap(), WarmRestartState::Restarting);
}

#[tokio::test]
async fn test_warm_restart_preserves_learned_entries() {
    let switch = Switch::new();
    let (handle, task) = switch.start(warm_restart_config());
    switch.provision(&handle).await;

    switch.exchange_traffic();
    wait_for("two learned entries", || handle.resource_count() == 2).await;
    wait_for("mirror rows", || {
        entry_exists(&handle, 1, "Ethernet64") && entry_exists(&handle, 2, "Ethernet68")
    })
    .await;
    let before = handle.snapshot().await.unwrap();
    let old_oids: Vec<_> = PORTS.iter().map(|p| switch.asic.bridge_port_oid(p)).collect();

    freeze_and_stop(&switch, handle, task).await;

    // The new instance finds the same ASIC, with bridge ports renumbered.
    switch.asic.recreate_bridge_ports();
    let (handle, _task) = switch.start(warm_boot_config());
    assert_eq!(handle.state().await.unwrap(), WarmRestartState::Restarting);
    assert_eq!(handle.resource_count(), 2);

    switch.provision(&handle).await;
    for alias in PORTS {
        assert_eq!(
            handle.learn_mode(alias).await.unwrap(),
            Some(FdbLearningMode::Disable)
        );
    }

    let report = handle.provisioning_done().await.unwrap();
    assert_eq!(report.confirmed, 2);
    assert_eq!(report.rebound, 2);
    assert!(report.unexplained.is_empty());
    assert_eq!(handle.state().await.unwrap(), WarmRestartState::Running);

    for alias in PORTS {
        assert_eq!(
            switch.asic.bridge_port_learning_mode(alias),
            Some(FdbLearningMode::Hw)
        );
    }

    let after = handle.snapshot().await.unwrap();
    assert_eq!(after.len(), before.len());
    for (a, b) in after.iter().zip(&before) {
        assert_eq!(a.key, b.key);
        assert_eq!(a.port, b.port);
        assert_eq!(a.entry_type, FdbEntryType::Dynamic);
        assert_eq!(a.entry_type, b.entry_type);
    }
    let new_oids: Vec<_> = PORTS.iter().map(|p| switch.asic.bridge_port_oid(p)).collect();
    assert_ne!(old_oids, new_oids);
    assert_eq!(Some(after[0].bridge_port_oid), new_oids[0]);

    assert_eq!(handle.resource_count(), 2);
    assert!(entry_exists(&handle, 1, "Ethernet64"));
    assert!(entry_exists(&handle, 2, "Ethernet68"));

    // Learning works again after the restart.
    switch.asic.learn(vlan6(), host(3), PORTS[0]);
    wait_for("learn after restart", || handle.resource_count() == 3).await;
}

#[tokio::test]
async fn test_move_keeps_count() {
    let switch = Switch::new();
    let (handle, _task) = switch.start(FdbSyncConfig::default());
    switch.provision(&handle).await;

    switch.asic.learn(vlan6(), host(1), PORTS[0]);
    wait_for("learn", || entry_exists(&handle, 1, "Ethernet64")).await;

    switch.asic.learn(vlan6(), host(1), PORTS[1]);
    wait_for("move", || entry_exists(&handle, 1, "Ethernet68")).await;
    assert_eq!(handle.resource_count(), 1);
    assert_eq!(handle.status().await.unwrap().fdb.entries_moved, 1);
}

#[tokio::test]
async fn test_clear_empties_table_and_mirror() {
    let switch = Switch::new();
    let (handle, _task) = switch.start(FdbSyncConfig::default());
    switch.provision(&handle).await;
    switch.exchange_traffic();
    wait_for("two learned entries", || handle.resource_count() == 2).await;

    assert_eq!(handle.clear_fdb().await.unwrap(), 2);
    assert_eq!(handle.resource_count(), 0);
    wait_for("mirror cleared", || handle.query_fdb("Vlan6:").is_empty()).await;
    assert!(!handle.fdb_entry_exists("Vlan6:", &[]));
}

#[tokio::test]
async fn test_restart_check_refused_when_disabled() {
    let switch = Switch::new();
    let (handle, _task) = switch.start(FdbSyncConfig::default());
    switch.provision(&handle).await;

    assert!(matches!(
        handle.restart_check(RestartCheckRequest::default()).await,
        Err(FdbSyncError::WarmRestartDisabled)
    ));
    assert_eq!(
        switch.asic.bridge_port_learning_mode(PORTS[0]),
        Some(FdbLearningMode::Hw)
    );

    handle.enable_warm_restart(true).await.unwrap();
    let reply = handle
        .restart_check(RestartCheckRequest {
            no_freeze: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(reply.success);
    assert_eq!(handle.state().await.unwrap(), WarmRestartState::Running);
}

#[tokio::test]
async fn test_failed_freeze_resumes_learning() {
    let switch = Switch::new();
    let (handle, _task) = switch.start(warm_restart_config());
    switch.provision(&handle).await;

    // The second port refuses DISABLE; the first must be put back.
    switch.asic.fail_learning_mode_writes(PORTS[1]);
    assert!(matches!(
        handle.restart_check(RestartCheckRequest::default()).await,
        Err(FdbSyncError::Sai(_))
    ));
    switch.asic.clear_failures();

    assert_eq!(handle.state().await.unwrap(), WarmRestartState::Running);
    for alias in PORTS {
        assert_eq!(
            switch.asic.bridge_port_learning_mode(alias),
            Some(FdbLearningMode::Hw)
        );
    }
    assert!(!switch.store.exists());

    switch.exchange_traffic();
    wait_for("learning after failed freeze", || handle.resource_count() == 2).await;
}

#[tokio::test]
async fn test_age_during_restart_window() {
    let switch = Switch::new();
    let (handle, task) = switch.start(warm_restart_config());
    switch.provision(&handle).await;
    switch.exchange_traffic();
    wait_for("two learned entries", || handle.resource_count() == 2).await;
    freeze_and_stop(&switch, handle, task).await;

    // Aging keeps running in the ASIC while no instance is consuming.
    assert!(switch.asic.age(vlan6(), host(1)));

    let (handle, _task) = switch.start(warm_boot_config());
    switch.provision(&handle).await;
    let report = handle.provisioning_done().await.unwrap();

    assert_eq!(report.aged, 1);
    assert_eq!(report.confirmed, 1);
    assert_eq!(handle.resource_count(), 1);
    wait_for("aged row removed", || !entry_exists(&handle, 1, "Ethernet64")).await;
    assert!(entry_exists(&handle, 2, "Ethernet68"));
}

#[tokio::test]
async fn test_unexplained_loss_fails_restart() {
    let switch = Switch::new();
    let (handle, task) = switch.start(warm_restart_config());
    switch.provision(&handle).await;
    switch.exchange_traffic();
    wait_for("two learned entries", || handle.resource_count() == 2).await;
    freeze_and_stop(&switch, handle, task).await;

    // The entry vanishes without a notification.
    assert!(switch.asic.forget(vlan6(), host(1)));

    let (handle, task) = switch.start(warm_boot_config());
    switch.provision(&handle).await;
    assert!(matches!(
        handle.provisioning_done().await,
        Err(FdbSyncError::ReconciliationMismatch(_))
    ));

    assert_eq!(handle.state().await.unwrap(), WarmRestartState::Failed);
    assert_eq!(handle.resource_count(), 0);
    assert!(handle.snapshot().await.unwrap().is_empty());
    assert_eq!(
        switch.asic.bridge_port_learning_mode(PORTS[0]),
        Some(FdbLearningMode::Disable)
    );
    assert!(matches!(
        handle.restart_check(RestartCheckRequest::default()).await,
        Err(FdbSyncError::EngineFailed)
    ));
    assert!(matches!(handle.clear_fdb().await, Err(FdbSyncError::EngineFailed)));
    assert_eq!(handle.shutdown().await.unwrap(), WarmRestartState::Failed);
    task.await.unwrap();

    // Recovery is a cold start with a full relearn.
    let (handle, _task) = switch.start(FdbSyncConfig::default());
    assert_eq!(handle.state().await.unwrap(), WarmRestartState::Running);
    switch.provision(&handle).await;
    assert_eq!(
        switch.asic.bridge_port_learning_mode(PORTS[0]),
        Some(FdbLearningMode::Hw)
    );
    switch.asic.learn(vlan6(), host(3), PORTS[0]);
    wait_for("relearn", || handle.resource_count() == 1).await;
}

#[tokio::test]
async fn test_warm_boot_without_checkpoint_fails() {
    let switch = Switch::new();
    let (handle, _task) = switch.start(warm_boot_config());

    assert_eq!(handle.state().await.unwrap(), WarmRestartState::Failed);
    assert!(matches!(
        handle.provisioning_done().await,
        Err(FdbSyncError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_reconcile_timeout_with_file_checkpoint() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("fdb_checkpoint.json");
    let switch = Switch::with_store(Arc::new(FileCheckpointStore::new(&path)));

    let (handle, task) = switch.start(warm_restart_config());
    switch.provision(&handle).await;
    switch.exchange_traffic();
    wait_for("two learned entries", || handle.resource_count() == 2).await;
    freeze_and_stop(&switch, handle, task).await;
    assert!(path.exists());

    let mut config = warm_boot_config();
    config.warm_restart.reconcile_timeout_secs = 1;
    let (handle, _task) = switch.start(config);
    assert_eq!(handle.state().await.unwrap(), WarmRestartState::Restarting);
    assert!(!path.exists());
    switch.provision(&handle).await;

    // No provisioning done: the deadline starts reconciliation.
    wait_for_state(&handle, WarmRestartState::Running).await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.entries, 2);
    assert_eq!(status.warm_restart.reconcile_timeout_count, 1);
    assert_eq!(status.last_reconcile.unwrap().confirmed, 2);
}

#[tokio::test]
async fn test_queued_learn_at_freeze_survives_restart() {
    let switch = Switch::new();
    let (handle, task) = switch.start(warm_restart_config());
    switch.provision(&handle).await;
    switch.exchange_traffic();
    wait_for("two learned entries", || handle.resource_count() == 2).await;

    // Still queued, or just consumed, when the freeze starts.
    assert!(switch.asic.learn(vlan6(), host(3), PORTS[1]));
    freeze_and_stop(&switch, handle, task).await;

    switch.asic.recreate_bridge_ports();
    let (handle, _task) = switch.start(warm_boot_config());
    switch.provision(&handle).await;
    let report = handle.provisioning_done().await.unwrap();
    assert_eq!(report.confirmed, 3);
    assert!(report.unexplained.is_empty());
    assert_eq!(handle.state().await.unwrap(), WarmRestartState::Running);
    assert_eq!(handle.resource_count(), 3);
    assert!(entry_exists(&handle, 3, "Ethernet68"));
}
