//! FDB (Forwarding Database) types.

use serde::{Deserialize, Serialize};
use sonic_sai::{BridgePortOid, SaiFdbEntryType};
use sonic_types::{MacAddress, VlanId};
use std::fmt;

/// FDB entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FdbEntryType {
    #[default]
    Dynamic,
    Static,
}

impl FdbEntryType {
    /// STATE_DB `type` field value.
    pub const fn as_str(&self) -> &'static str {
        match self {
            FdbEntryType::Dynamic => "dynamic",
            FdbEntryType::Static => "static",
        }
    }
}

impl fmt::Display for FdbEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<SaiFdbEntryType> for FdbEntryType {
    fn from(t: SaiFdbEntryType) -> Self {
        match t {
            SaiFdbEntryType::Dynamic => FdbEntryType::Dynamic,
            SaiFdbEntryType::Static => FdbEntryType::Static,
        }
    }
}

impl From<FdbEntryType> for SaiFdbEntryType {
    fn from(t: FdbEntryType) -> Self {
        match t {
            FdbEntryType::Dynamic => SaiFdbEntryType::Dynamic,
            FdbEntryType::Static => SaiFdbEntryType::Static,
        }
    }
}

/// FDB key: (bridge domain, MAC).
///
/// Ordered by VLAN then MAC, so snapshots and checkpoints come out in a
/// stable order. `Display` gives the STATE_DB key, `Vlan6:00:11:22:33:44:55`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FdbKey {
    pub vlan: VlanId,
    pub mac: MacAddress,
}

impl FdbKey {
    pub fn new(vlan: VlanId, mac: MacAddress) -> Self {
        Self { vlan, mac }
    }
}

impl fmt::Display for FdbKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}:{}", VlanId::ALIAS_PREFIX, self.vlan.as_u16(), self.mac)
    }
}

/// One learned MAC.
///
/// `port` is the logical port alias and is what survives a restart;
/// `bridge_port_oid` is the SAI handle valid for the current instance only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FdbEntry {
    pub key: FdbKey,
    pub port: String,
    pub bridge_port_oid: BridgePortOid,
    pub entry_type: FdbEntryType,
}

impl FdbEntry {
    pub fn new(
        key: FdbKey,
        port: impl Into<String>,
        bridge_port_oid: BridgePortOid,
        entry_type: FdbEntryType,
    ) -> Self {
        Self {
            key,
            port: port.into(),
            bridge_port_oid,
            entry_type,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.entry_type == FdbEntryType::Dynamic
    }
}

/// How a learn notification changed the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FdbUpdate {
    Inserted,
    /// Same key, different port. Port updated in place.
    Moved { from: String },
    /// Same key, same port, different entry type.
    Updated,
    /// Same key, same port. Nothing changed.
    Refreshed,
}

/// Table mutation published to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FdbEvent {
    Added(FdbEntry),
    Moved { entry: FdbEntry, from: String },
    /// Attributes other than the port changed.
    Updated(FdbEntry),
    Removed(FdbEntry),
    Cleared,
    /// Wholesale replacement after reconciliation or at cold start.
    Resynced(Vec<FdbEntry>),
}

/// Receives every table mutation, in order.
pub trait FdbObserver: Send + Sync {
    fn on_fdb_event(&self, event: &FdbEvent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(vlan: u16, index: u32) -> FdbKey {
        FdbKey::new(VlanId::new(vlan).unwrap(), MacAddress::local_from_index(index))
    }

    #[test]
    fn test_key_display_is_state_db_key() {
        assert_eq!(key(6, 1).to_string(), "Vlan6:02:00:00:00:00:01");
    }

    #[test]
    fn test_key_orders_by_vlan_first() {
        assert!(key(6, 9) < key(7, 1));
        assert!(key(6, 1) < key(6, 2));
    }

    #[test]
    fn test_entry_type_conversion() {
        assert_eq!(FdbEntryType::from(SaiFdbEntryType::Static), FdbEntryType::Static);
        assert_eq!(SaiFdbEntryType::from(FdbEntryType::Dynamic), SaiFdbEntryType::Dynamic);
        assert_eq!(FdbEntryType::Dynamic.to_string(), "dynamic");
    }

    #[test]
    fn test_entry_serde() {
        let entry = FdbEntry::new(
            key(6, 1),
            "Ethernet64",
            BridgePortOid::from_raw(0x3a00000000061a).unwrap(),
            FdbEntryType::Dynamic,
        );
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"port\":\"Ethernet64\""));
        assert!(json.contains("\"entry_type\":\"dynamic\""));
        let back: FdbEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
