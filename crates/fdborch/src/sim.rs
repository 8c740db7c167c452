//! Simulated switch ASIC.
//!
//! [`VirtualSwitch`] implements the SAI contracts the engine consumes and
//! behaves like the forwarding hardware behind them: it learns source MACs
//! on admin-up member ports whose learning mode is `HW`, reports learns,
//! moves, ages and flushes on the notification channel, and tracks FDB
//! capacity. Clones share the same switch.
//!
//! Across a restart the ASIC keeps its FDB but bridge ports come back under
//! new object ids; [`VirtualSwitch::recreate_bridge_ports`] reproduces that.

use crate::notification::{FdbNotification, HardwareNotificationChannel};
use parking_lot::Mutex;
use sonic_sai::{
    BridgePortApi, BridgePortOid, FdbApi, FdbFlushScope, FdbLearningMode, SaiError, SaiFdbEntry,
    SaiFdbEntryType, SaiFdbEventType, SaiResult, SaiStatus, SwitchApi,
};
use sonic_types::{AdminState, MacAddress, VlanId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Raw OID range used for simulated bridge ports.
const BRIDGE_PORT_OID_BASE: u64 = 0x3a000000000600;

#[derive(Debug, Clone)]
struct SimBridgePort {
    oid: BridgePortOid,
    vlans: BTreeSet<VlanId>,
    admin: AdminState,
    mode: FdbLearningMode,
}

#[derive(Debug)]
struct SwitchState {
    next_oid: u64,
    ports: BTreeMap<String, SimBridgePort>,
    by_oid: HashMap<BridgePortOid, String>,
    fdb: BTreeMap<(VlanId, MacAddress), SaiFdbEntry>,
    capacity: u32,
    /// Learning-mode writes to this port fail.
    failing_port: Option<String>,
}

impl SwitchState {
    fn allocate_oid(&mut self) -> BridgePortOid {
        self.next_oid += 1;
        BridgePortOid::from_raw(self.next_oid).unwrap_or(BridgePortOid::NULL)
    }

    fn alias_of(&self, oid: BridgePortOid) -> SaiResult<&str> {
        self.by_oid
            .get(&oid)
            .map(String::as_str)
            .ok_or_else(|| SaiError::not_found(oid.to_string()))
    }
}

#[derive(Clone)]
pub struct VirtualSwitch {
    state: Arc<Mutex<SwitchState>>,
    notifications: HardwareNotificationChannel,
}

impl std::fmt::Debug for VirtualSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("VirtualSwitch")
            .field("ports", &state.ports.len())
            .field("fdb_entries", &state.fdb.len())
            .field("capacity", &state.capacity)
            .finish()
    }
}

impl VirtualSwitch {
    /// A switch holding at most `capacity` FDB entries, reporting on
    /// `notifications`.
    pub fn new(notifications: HardwareNotificationChannel, capacity: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SwitchState {
                next_oid: BRIDGE_PORT_OID_BASE,
                ports: BTreeMap::new(),
                by_oid: HashMap::new(),
                fdb: BTreeMap::new(),
                capacity,
                failing_port: None,
            })),
            notifications,
        }
    }

    pub fn notifications(&self) -> &HardwareNotificationChannel {
        &self.notifications
    }

    /// Creates a bridge port for `alias`, admin down, learning `HW`.
    /// An existing port keeps its object id and gains the VLANs.
    pub fn create_bridge_port(
        &self,
        alias: &str,
        vlans: impl IntoIterator<Item = VlanId>,
    ) -> BridgePortOid {
        let mut state = self.state.lock();
        if let Some(port) = state.ports.get_mut(alias) {
            port.vlans.extend(vlans);
            return port.oid;
        }

        let oid = state.allocate_oid();
        state.ports.insert(
            alias.to_string(),
            SimBridgePort {
                oid,
                vlans: vlans.into_iter().collect(),
                admin: AdminState::Down,
                mode: FdbLearningMode::Hw,
            },
        );
        state.by_oid.insert(oid, alias.to_string());
        debug!(port = alias, %oid, "Bridge port created");
        oid
    }

    pub fn set_admin_state(&self, alias: &str, admin: AdminState) -> SaiResult<()> {
        let mut state = self.state.lock();
        let port = state
            .ports
            .get_mut(alias)
            .ok_or_else(|| SaiError::not_found(alias))?;
        port.admin = admin;
        Ok(())
    }

    pub fn bridge_port_oid(&self, alias: &str) -> Option<BridgePortOid> {
        self.state.lock().ports.get(alias).map(|p| p.oid)
    }

    /// `SAI_BRIDGE_PORT_ATTR_FDB_LEARNING_MODE` as the ASIC holds it.
    pub fn bridge_port_learning_mode(&self, alias: &str) -> Option<FdbLearningMode> {
        self.state.lock().ports.get(alias).map(|p| p.mode)
    }

    /// Gives every bridge port a new object id, keeping the FDB and moving
    /// its entries to the new ids. Returns the new ids by alias.
    pub fn recreate_bridge_ports(&self) -> BTreeMap<String, BridgePortOid> {
        let mut state = self.state.lock();
        let aliases: Vec<String> = state.ports.keys().cloned().collect();
        let mut remap = HashMap::new();
        let mut result = BTreeMap::new();

        for alias in aliases {
            let new_oid = state.allocate_oid();
            if let Some(port) = state.ports.get_mut(&alias) {
                remap.insert(port.oid, new_oid);
                port.oid = new_oid;
            }
            result.insert(alias, new_oid);
        }

        state.by_oid = result
            .iter()
            .map(|(alias, oid)| (*oid, alias.clone()))
            .collect();
        for entry in state.fdb.values_mut() {
            if let Some(new_oid) = remap.get(&entry.bridge_port) {
                entry.bridge_port = *new_oid;
            }
        }
        debug!(ports = result.len(), "Bridge ports recreated");
        result
    }

    /// A frame from `mac` arrives on `alias` in `vlan`.
    ///
    /// Returns whether the FDB changed. Nothing is learned on admin-down
    /// ports, on ports with learning disabled, outside the port's VLANs or
    /// when the table is full.
    pub fn learn(&self, vlan: VlanId, mac: MacAddress, alias: &str) -> bool {
        let notification = {
            let mut state = self.state.lock();
            let Some(port) = state.ports.get(alias) else {
                return false;
            };
            if port.admin.is_down() || !port.mode.is_learning() || !port.vlans.contains(&vlan) {
                return false;
            }
            let entry = SaiFdbEntry {
                vlan,
                mac,
                bridge_port: port.oid,
                entry_type: SaiFdbEntryType::Dynamic,
            };

            let kind = match state.fdb.get(&(vlan, mac)) {
                Some(existing) if existing.bridge_port == entry.bridge_port => return false,
                Some(existing) if existing.entry_type == SaiFdbEntryType::Static => return false,
                Some(_) => SaiFdbEventType::Move,
                None if state.fdb.len() >= state.capacity as usize => return false,
                None => SaiFdbEventType::Learned,
            };
            state.fdb.insert((vlan, mac), entry);
            FdbNotification::new(kind, entry)
        };

        self.notifications.publish(notification);
        true
    }

    /// Ages out a dynamic entry.
    pub fn age(&self, vlan: VlanId, mac: MacAddress) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let dynamic = matches!(
                state.fdb.get(&(vlan, mac)),
                Some(entry) if entry.entry_type == SaiFdbEntryType::Dynamic
            );
            if dynamic {
                state.fdb.remove(&(vlan, mac))
            } else {
                None
            }
        };

        match removed {
            Some(entry) => {
                self.notifications
                    .publish(FdbNotification::new(SaiFdbEventType::Aged, entry));
                true
            }
            None => false,
        }
    }

    /// Removes an entry without reporting it, as a lost notification would.
    pub fn forget(&self, vlan: VlanId, mac: MacAddress) -> bool {
        self.state.lock().fdb.remove(&(vlan, mac)).is_some()
    }

    pub fn fdb_entries(&self) -> Vec<SaiFdbEntry> {
        self.state.lock().fdb.values().copied().collect()
    }

    /// Makes learning-mode writes to `alias` fail until cleared.
    pub fn fail_learning_mode_writes(&self, alias: &str) {
        self.state.lock().failing_port = Some(alias.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().failing_port = None;
    }
}

impl BridgePortApi for VirtualSwitch {
    fn set_fdb_learning_mode(&self, port: BridgePortOid, mode: FdbLearningMode) -> SaiResult<()> {
        let mut state = self.state.lock();
        let alias = state.alias_of(port)?.to_string();
        if state.failing_port.as_deref() == Some(alias.as_str()) {
            return Err(SaiError::from_status(SaiStatus::Failure));
        }
        if let Some(p) = state.ports.get_mut(&alias) {
            p.mode = mode;
        }
        Ok(())
    }

    fn get_fdb_learning_mode(&self, port: BridgePortOid) -> SaiResult<FdbLearningMode> {
        let state = self.state.lock();
        let alias = state.alias_of(port)?;
        state
            .ports
            .get(alias)
            .map(|p| p.mode)
            .ok_or_else(|| SaiError::not_found(port.to_string()))
    }
}

impl FdbApi for VirtualSwitch {
    fn get_fdb_entries(&self, vlans: &[VlanId]) -> SaiResult<Vec<SaiFdbEntry>> {
        let state = self.state.lock();
        Ok(state
            .fdb
            .values()
            .filter(|e| vlans.is_empty() || vlans.contains(&e.vlan))
            .copied()
            .collect())
    }

    fn flush_fdb_entries(&self, scope: FdbFlushScope) -> SaiResult<usize> {
        let flushed: Vec<SaiFdbEntry> = {
            let mut state = self.state.lock();
            let keys: Vec<_> = state
                .fdb
                .iter()
                .filter(|(_, e)| scope.matches(e))
                .map(|(k, _)| *k)
                .collect();
            keys.iter().filter_map(|k| state.fdb.remove(k)).collect()
        };

        for entry in &flushed {
            self.notifications
                .publish(FdbNotification::new(SaiFdbEventType::Flushed, *entry));
        }
        Ok(flushed.len())
    }
}

impl SwitchApi for VirtualSwitch {
    fn available_fdb_entries(&self) -> SaiResult<u32> {
        let state = self.state.lock();
        let used = u32::try_from(state.fdb.len()).unwrap_or(u32::MAX);
        Ok(state.capacity.saturating_sub(used))
    }
}
