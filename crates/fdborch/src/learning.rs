//! Per-bridge-port FDB learning mode.
//!
//! Every registered bridge port participates in learning. During a
//! warm-restart freeze all of them are held at `DISABLE`, including ports
//! registered while the freeze is in effect. Leaving the freeze forces every
//! port back to `HW` rather than restoring the pre-freeze value.

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::error::{FdbSyncError, Result};
use sonic_sai::{BridgePortApi, BridgePortOid, FdbLearningMode, SaiError};
use sonic_types::VlanId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A port attached to the bridge, as provisioned by the VLAN manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgePort {
    pub alias: String,
    pub oid: BridgePortOid,
    /// Bridge domains this port is a member of.
    pub vlans: BTreeSet<VlanId>,
    pub mode: FdbLearningMode,
}

impl BridgePort {
    pub fn is_member_of(&self, vlan: VlanId) -> bool {
        self.vlans.contains(&vlan)
    }
}

/// Owns the learning mode of every bridge port.
pub struct LearningModeController {
    api: Arc<dyn BridgePortApi>,
    ports: BTreeMap<String, BridgePort>,
    by_oid: HashMap<BridgePortOid, String>,
    /// Mode each port had when the freeze began; `Some` while frozen.
    frozen_modes: Option<BTreeMap<String, FdbLearningMode>>,
}

impl std::fmt::Debug for LearningModeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearningModeController")
            .field("ports", &self.ports)
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

impl LearningModeController {
    pub fn new(api: Arc<dyn BridgePortApi>) -> Self {
        Self {
            api,
            ports: BTreeMap::new(),
            by_oid: HashMap::new(),
            frozen_modes: None,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen_modes.is_some()
    }

    /// Registers a bridge port and programs its initial learning mode.
    ///
    /// Re-adding a known alias rebinds it to `oid`, which is what happens
    /// when bridge ports are recreated by a new process instance. The port
    /// keeps the mode it had unless a freeze is in effect.
    pub fn add_bridge_port(
        &mut self,
        alias: &str,
        oid: BridgePortOid,
        vlans: impl IntoIterator<Item = VlanId>,
    ) -> Result<()> {
        if oid.is_null() {
            return Err(FdbSyncError::InvalidPort(format!("{} has a null bridge port", alias)));
        }

        let mode = if self.is_frozen() {
            FdbLearningMode::Disable
        } else {
            self.mode(alias).unwrap_or(FdbLearningMode::Hw)
        };
        if let Err(e) = self.api.set_fdb_learning_mode(oid, mode) {
            audit_sai_failure(alias, oid, mode, &e);
            return Err(e.into());
        }

        if let Some(old) = self.ports.get(alias) {
            self.by_oid.remove(&old.oid);
        }
        if let Some(frozen) = self.frozen_modes.as_mut() {
            frozen.entry(alias.to_string()).or_insert(FdbLearningMode::Hw);
        }

        let port = BridgePort {
            alias: alias.to_string(),
            oid,
            vlans: vlans.into_iter().collect(),
            mode,
        };
        info!(port = alias, %oid, %mode, vlans = port.vlans.len(), "Bridge port added");
        self.by_oid.insert(oid, alias.to_string());
        self.ports.insert(alias.to_string(), port);

        audit_log!(AuditRecord::new(
            AuditCategory::ResourceCreate,
            "LearningModeController",
            "add_bridge_port",
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(alias)
        .with_object_type("bridge_port")
        .with_details(serde_json::json!({ "oid": oid.to_string(), "mode": mode.as_sai_str() })));
        Ok(())
    }

    pub fn remove_bridge_port(&mut self, alias: &str) -> Result<BridgePort> {
        let port = self
            .ports
            .remove(alias)
            .ok_or_else(|| FdbSyncError::InvalidPort(alias.to_string()))?;
        self.by_oid.remove(&port.oid);
        if let Some(frozen) = self.frozen_modes.as_mut() {
            frozen.remove(alias);
        }
        info!(port = alias, oid = %port.oid, "Bridge port removed");

        audit_log!(AuditRecord::new(
            AuditCategory::ResourceDelete,
            "LearningModeController",
            "remove_bridge_port",
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(alias)
        .with_object_type("bridge_port")
        .with_details(serde_json::json!({ "oid": port.oid.to_string() })));
        Ok(port)
    }

    /// Sets the learning mode of one port.
    ///
    /// Returns `Ok(false)` when the port already has `mode`; no hardware call
    /// is made in that case.
    pub fn set_mode(&mut self, alias: &str, mode: FdbLearningMode) -> Result<bool> {
        if self.is_frozen() {
            return Err(FdbSyncError::FrozenTable);
        }
        let port = self
            .ports
            .get_mut(alias)
            .ok_or_else(|| FdbSyncError::InvalidPort(alias.to_string()))?;
        if port.mode == mode {
            return Ok(false);
        }

        if let Err(e) = self.api.set_fdb_learning_mode(port.oid, mode) {
            audit_sai_failure(alias, port.oid, mode, &e);
            return Err(e.into());
        }
        let old = std::mem::replace(&mut port.mode, mode);
        debug!(port = alias, from = %old, to = %mode, "Learning mode changed");

        audit_log!(AuditRecord::new(
            AuditCategory::ResourceModify,
            "LearningModeController",
            "set_learning_mode",
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(alias)
        .with_object_type("bridge_port")
        .with_details(serde_json::json!({ "from": old.as_sai_str(), "to": mode.as_sai_str() })));
        Ok(true)
    }

    /// Forces every port to `DISABLE`, recording the prior modes.
    ///
    /// All or nothing: if the ASIC rejects one port, ports already changed are
    /// put back and the controller stays unfrozen. Calling it while frozen is
    /// a no-op.
    pub fn freeze_all(&mut self) -> Result<()> {
        if self.is_frozen() {
            return Ok(());
        }

        let prior = self.modes();
        let mut changed: Vec<String> = Vec::new();

        for port in self.ports.values() {
            if port.mode == FdbLearningMode::Disable {
                continue;
            }
            if let Err(e) = self.api.set_fdb_learning_mode(port.oid, FdbLearningMode::Disable) {
                warn!(port = %port.alias, error = %e, "Failed to disable learning, rolling back");
                audit_sai_failure(&port.alias, port.oid, FdbLearningMode::Disable, &e);
                self.rollback(&changed, &prior);
                return Err(e.into());
            }
            changed.push(port.alias.clone());
        }

        for port in self.ports.values_mut() {
            port.mode = FdbLearningMode::Disable;
        }
        info!(ports = self.ports.len(), changed = changed.len(), "Learning frozen on all bridge ports");
        self.frozen_modes = Some(prior);
        Ok(())
    }

    fn rollback(&self, changed: &[String], prior: &BTreeMap<String, FdbLearningMode>) {
        for alias in changed {
            let (Some(port), Some(mode)) = (self.ports.get(alias), prior.get(alias)) else {
                continue;
            };
            if let Err(e) = self.api.set_fdb_learning_mode(port.oid, *mode) {
                warn!(port = %alias, error = %e, "Failed to restore learning mode");
            }
        }
    }

    /// Sets every port back to `HW` and leaves the freeze.
    ///
    /// Every port is attempted; the first failure is returned and the
    /// controller stays frozen.
    pub fn unfreeze_all(&mut self) -> Result<()> {
        let mut first_error = None;

        for port in self.ports.values_mut() {
            if port.mode == FdbLearningMode::Hw {
                continue;
            }
            match self.api.set_fdb_learning_mode(port.oid, FdbLearningMode::Hw) {
                Ok(()) => port.mode = FdbLearningMode::Hw,
                Err(e) => {
                    warn!(port = %port.alias, error = %e, "Failed to re-enable learning");
                    audit_sai_failure(&port.alias, port.oid, FdbLearningMode::Hw, &e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e.into());
        }
        info!(ports = self.ports.len(), "Learning re-enabled on all bridge ports");
        self.frozen_modes = None;
        Ok(())
    }

    /// Leaves the freeze by putting back the modes recorded when it began.
    ///
    /// Used when a freeze is abandoned before the restart; a completed
    /// restart goes through [`unfreeze_all`](Self::unfreeze_all) instead.
    pub fn restore_frozen_modes(&mut self) -> Result<()> {
        let Some(prior) = self.frozen_modes.clone() else {
            return Ok(());
        };
        let mut first_error = None;

        for port in self.ports.values_mut() {
            let mode = prior.get(&port.alias).copied().unwrap_or(FdbLearningMode::Hw);
            if port.mode == mode {
                continue;
            }
            match self.api.set_fdb_learning_mode(port.oid, mode) {
                Ok(()) => port.mode = mode,
                Err(e) => {
                    warn!(port = %port.alias, error = %e, "Failed to restore learning mode");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e.into());
        }
        debug!(ports = self.ports.len(), "Pre-freeze learning modes restored");
        self.frozen_modes = None;
        Ok(())
    }

    pub fn mode(&self, alias: &str) -> Option<FdbLearningMode> {
        self.ports.get(alias).map(|p| p.mode)
    }

    pub fn port(&self, alias: &str) -> Option<&BridgePort> {
        self.ports.get(alias)
    }

    pub fn port_by_oid(&self, oid: BridgePortOid) -> Option<&BridgePort> {
        self.by_oid.get(&oid).and_then(|alias| self.ports.get(alias))
    }

    pub fn ports(&self) -> impl Iterator<Item = &BridgePort> {
        self.ports.values()
    }

    pub fn modes(&self) -> BTreeMap<String, FdbLearningMode> {
        self.ports
            .iter()
            .map(|(alias, port)| (alias.clone(), port.mode))
            .collect()
    }

    /// Modes recorded when the current freeze began.
    pub fn frozen_modes(&self) -> Option<&BTreeMap<String, FdbLearningMode>> {
        self.frozen_modes.as_ref()
    }

    /// Union of the bridge domains of all ports.
    pub fn vlans(&self) -> BTreeSet<VlanId> {
        self.ports
            .values()
            .flat_map(|p| p.vlans.iter().copied())
            .collect()
    }
}

fn audit_sai_failure(alias: &str, oid: BridgePortOid, mode: FdbLearningMode, error: &SaiError) {
    audit_log!(AuditRecord::new(
        AuditCategory::SaiOperation,
        "LearningModeController",
        "set_fdb_learning_mode",
    )
    .with_object_id(alias)
    .with_object_type("bridge_port")
    .with_details(serde_json::json!({ "oid": oid.to_string(), "mode": mode.as_sai_str() }))
    .with_error(error.to_string()));
}
