//! Client side of the engine.

use std::sync::Arc;

use sonic_sai::{BridgePortOid, FdbLearningMode};
use sonic_types::VlanId;
use tokio::sync::{mpsc, oneshot};

use super::engine::{EngineCommand, EngineStatus, Reply};
use crate::crm::{FdbResourceCounter, CRM_COUNTERS_TABLE_KEY};
use crate::error::{FdbSyncError, Result};
use crate::fdb::FdbEntry;
use crate::state::{FieldValues, StateMirror, Table};
use crate::warm_restart::{ReconcileReport, RestartCheckReply, RestartCheckRequest, WarmRestartState};

/// Cloneable handle to a running [`FdbSyncEngine`](super::FdbSyncEngine).
///
/// Mutations and warm restart control go through the engine task. FDB and
/// counter queries read the published projections directly and never wait
/// on the engine; a queued state mirror may lag the table briefly.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
    mirror: StateMirror,
    counter: Arc<FdbResourceCounter>,
    counters: Table,
}

impl EngineHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<EngineCommand>,
        mirror: StateMirror,
        counter: Arc<FdbResourceCounter>,
        counters: Table,
    ) -> Self {
        Self {
            tx,
            mirror,
            counter,
            counters,
        }
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> EngineCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| FdbSyncError::ChannelClosed)?;
        rx.await.map_err(|_| FdbSyncError::ChannelClosed)?
    }

    // ========== Provisioning ==========

    pub async fn add_bridge_port(
        &self,
        alias: &str,
        oid: BridgePortOid,
        vlans: Vec<VlanId>,
    ) -> Result<()> {
        let alias = alias.to_string();
        self.request(|reply| EngineCommand::AddBridgePort {
            alias,
            oid,
            vlans,
            reply,
        })
        .await
    }

    pub async fn remove_bridge_port(&self, alias: &str) -> Result<()> {
        let alias = alias.to_string();
        self.request(|reply| EngineCommand::RemoveBridgePort { alias, reply })
            .await
    }

    /// Returns whether the mode changed.
    pub async fn set_learn_mode(&self, alias: &str, mode: FdbLearningMode) -> Result<bool> {
        let alias = alias.to_string();
        self.request(|reply| EngineCommand::SetLearnMode { alias, mode, reply })
            .await
    }

    pub async fn learn_mode(&self, alias: &str) -> Result<Option<FdbLearningMode>> {
        let alias = alias.to_string();
        self.request(|reply| EngineCommand::LearnMode { alias, reply })
            .await
    }

    /// Applies one `CRM|Config` field.
    pub async fn configure_crm(&self, field: &str, value: &str) -> Result<()> {
        let (field, value) = (field.to_string(), value.to_string());
        self.request(|reply| EngineCommand::ConfigureCrm {
            field,
            value,
            reply,
        })
        .await
    }

    // ========== Warm restart ==========

    pub async fn enable_warm_restart(&self, enabled: bool) -> Result<()> {
        self.request(|reply| EngineCommand::EnableWarmRestart { enabled, reply })
            .await
    }

    pub async fn restart_check(&self, request: RestartCheckRequest) -> Result<RestartCheckReply> {
        self.request(|reply| EngineCommand::RestartCheck { request, reply })
            .await
    }

    /// Signals that ports and VLANs are provisioned again after a warm start.
    pub async fn provisioning_done(&self) -> Result<ReconcileReport> {
        self.request(|reply| EngineCommand::ProvisioningDone { reply })
            .await
    }

    /// Stops the engine; returns the state it stopped in.
    pub async fn shutdown(&self) -> Result<WarmRestartState> {
        self.request(|reply| EngineCommand::Shutdown { reply }).await
    }

    pub async fn state(&self) -> Result<WarmRestartState> {
        Ok(self.status().await?.state)
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        self.request(|reply| EngineCommand::Status { reply }).await
    }

    // ========== FDB ==========

    /// Removes every entry; returns how many there were.
    pub async fn clear_fdb(&self) -> Result<usize> {
        self.request(|reply| EngineCommand::ClearFdb { reply }).await
    }

    /// Ordered copy of the table.
    pub async fn snapshot(&self) -> Result<Vec<FdbEntry>> {
        self.request(|reply| EngineCommand::Snapshot { reply }).await
    }

    /// True if an `FDB_TABLE` row matching `pattern` has all `fields`.
    pub fn fdb_entry_exists(&self, pattern: &str, fields: &[(&str, &str)]) -> bool {
        self.mirror.entry_exists(pattern, fields)
    }

    pub fn query_fdb(&self, pattern: &str) -> Vec<(String, FieldValues)> {
        self.mirror.query(pattern)
    }

    pub fn state_mirror(&self) -> &StateMirror {
        &self.mirror
    }

    // ========== Resources ==========

    /// Live FDB entry count.
    pub fn resource_count(&self) -> u32 {
        self.counter.value()
    }

    /// `CRM:STATS` as last published by the poll.
    pub fn crm_stats(&self) -> Option<FieldValues> {
        self.counters.hgetall(CRM_COUNTERS_TABLE_KEY)
    }
}
