//! FDB entries as the ASIC reports them, and the FDB dump/flush operations.

use crate::error::SaiResult;
use crate::types::BridgePortOid;
use serde::{Deserialize, Serialize};
use sonic_types::{MacAddress, VlanId};
use std::fmt;

/// `SAI_FDB_ENTRY_ATTR_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaiFdbEntryType {
    #[default]
    Dynamic,
    Static,
}

impl SaiFdbEntryType {
    pub const fn as_sai_str(&self) -> &'static str {
        match self {
            SaiFdbEntryType::Dynamic => "SAI_FDB_ENTRY_TYPE_DYNAMIC",
            SaiFdbEntryType::Static => "SAI_FDB_ENTRY_TYPE_STATIC",
        }
    }

    /// STATE_DB `type` field value.
    pub const fn as_state_str(&self) -> &'static str {
        match self {
            SaiFdbEntryType::Dynamic => "dynamic",
            SaiFdbEntryType::Static => "static",
        }
    }
}

/// `sai_fdb_event_t` as delivered by the FDB event notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaiFdbEventType {
    Learned,
    Aged,
    Move,
    Flushed,
}

impl fmt::Display for SaiFdbEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SaiFdbEventType::Learned => "SAI_FDB_EVENT_LEARNED",
            SaiFdbEventType::Aged => "SAI_FDB_EVENT_AGED",
            SaiFdbEventType::Move => "SAI_FDB_EVENT_MOVE",
            SaiFdbEventType::Flushed => "SAI_FDB_EVENT_FLUSHED",
        };
        f.write_str(s)
    }
}

/// One row of `ASIC_STATE:SAI_OBJECT_TYPE_FDB_ENTRY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SaiFdbEntry {
    pub vlan: VlanId,
    pub mac: MacAddress,
    pub bridge_port: BridgePortOid,
    pub entry_type: SaiFdbEntryType,
}

/// Filters for `sai_flush_fdb_entries`. `None` fields match everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FdbFlushScope {
    pub vlan: Option<VlanId>,
    pub bridge_port: Option<BridgePortOid>,
    pub entry_type: Option<SaiFdbEntryType>,
}

impl FdbFlushScope {
    /// Flush of every dynamic entry, as issued by `sonic-clear fdb all`.
    pub const fn all_dynamic() -> Self {
        Self {
            vlan: None,
            bridge_port: None,
            entry_type: Some(SaiFdbEntryType::Dynamic),
        }
    }

    pub fn matches(&self, entry: &SaiFdbEntry) -> bool {
        self.vlan.map_or(true, |v| v == entry.vlan)
            && self.bridge_port.map_or(true, |bp| bp == entry.bridge_port)
            && self.entry_type.map_or(true, |t| t == entry.entry_type)
    }
}

/// FDB table access.
pub trait FdbApi: Send + Sync {
    /// Dumps the hardware FDB restricted to `vlans` (all VLANs when empty).
    fn get_fdb_entries(&self, vlans: &[VlanId]) -> SaiResult<Vec<SaiFdbEntry>>;

    /// Removes matching entries; returns how many were removed. The ASIC also
    /// reports each removal through the event notification.
    fn flush_fdb_entries(&self, scope: FdbFlushScope) -> SaiResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(vlan: u16, port: u64, entry_type: SaiFdbEntryType) -> SaiFdbEntry {
        SaiFdbEntry {
            vlan: VlanId::new(vlan).unwrap(),
            mac: MacAddress::local_from_index(1),
            bridge_port: BridgePortOid::from_raw(port).unwrap(),
            entry_type,
        }
    }

    #[test]
    fn test_flush_scope_filters() {
        let dynamic = entry(6, 0x10, SaiFdbEntryType::Dynamic);
        let fixed = entry(6, 0x10, SaiFdbEntryType::Static);

        assert!(FdbFlushScope::all_dynamic().matches(&dynamic));
        assert!(!FdbFlushScope::all_dynamic().matches(&fixed));

        let by_port = FdbFlushScope {
            bridge_port: BridgePortOid::from_raw(0x20),
            ..Default::default()
        };
        assert!(!by_port.matches(&dynamic));
        assert!(FdbFlushScope::default().matches(&fixed));
    }

    #[test]
    fn test_entry_type_strings() {
        assert_eq!(SaiFdbEntryType::Dynamic.as_state_str(), "dynamic");
        assert_eq!(SaiFdbEntryType::Static.as_sai_str(), "SAI_FDB_ENTRY_TYPE_STATIC");
        assert_eq!(SaiFdbEventType::Move.to_string(), "SAI_FDB_EVENT_MOVE");
    }
}
