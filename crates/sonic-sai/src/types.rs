//! Type-safe SAI object ID wrappers.
//!
//! Bridge port OIDs are reassigned every time the SAI objects are recreated
//! (for example across a warm restart), so the orchestrator never treats them
//! as stable identity. The phantom kind keeps them from being confused with
//! the other OIDs that travel through the same code paths.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Raw SAI object ID (`sai_object_id_t`).
pub type RawSaiObjectId = u64;

/// Marker trait for SAI object kinds.
pub trait SaiObjectKind: Send + Sync + 'static {
    /// SAI object type name, e.g. `SAI_OBJECT_TYPE_BRIDGE_PORT`.
    fn type_name() -> &'static str;
}

/// A SAI object ID tagged with the kind of object it refers to.
///
/// ```
/// use sonic_sai::{BridgePortOid, SaiObjectId};
///
/// let bp = BridgePortOid::from_raw(0x3a000000000610).unwrap();
/// assert_eq!(bp.as_raw(), 0x3a000000000610);
/// assert!(BridgePortOid::from_raw(0).is_none());
/// ```
pub struct SaiObjectId<T: SaiObjectKind> {
    raw: RawSaiObjectId,
    _marker: PhantomData<T>,
}

impl<T: SaiObjectKind> SaiObjectId<T> {
    /// `SAI_NULL_OBJECT_ID`.
    pub const NULL: Self = Self {
        raw: 0,
        _marker: PhantomData,
    };

    /// Returns `None` for the null object ID.
    pub fn from_raw(raw: RawSaiObjectId) -> Option<Self> {
        (raw != 0).then_some(Self {
            raw,
            _marker: PhantomData,
        })
    }

    pub const fn as_raw(&self) -> RawSaiObjectId {
        self.raw
    }

    pub const fn is_null(&self) -> bool {
        self.raw == 0
    }
}

// Manual impls: deriving would put bounds on `T`, which is only a marker.
impl<T: SaiObjectKind> Clone for SaiObjectId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: SaiObjectKind> Copy for SaiObjectId<T> {}

impl<T: SaiObjectKind> PartialEq for SaiObjectId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T: SaiObjectKind> Eq for SaiObjectId<T> {}

impl<T: SaiObjectKind> PartialOrd for SaiObjectId<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: SaiObjectKind> Ord for SaiObjectId<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T: SaiObjectKind> Hash for SaiObjectId<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T: SaiObjectKind> Default for SaiObjectId<T> {
    fn default() -> Self {
        Self::NULL
    }
}

impl<T: SaiObjectKind> fmt::Debug for SaiObjectId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(oid:0x{:x})", T::type_name(), self.raw)
    }
}

/// Renders the ASIC_DB form, `oid:0x3a000000000610`.
impl<T: SaiObjectKind> fmt::Display for SaiObjectId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oid:0x{:x}", self.raw)
    }
}

impl<T: SaiObjectKind> Serialize for SaiObjectId<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.raw)
    }
}

impl<'de, T: SaiObjectKind> Deserialize<'de> for SaiObjectId<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u64::deserialize(deserializer)?;
        Ok(Self {
            raw,
            _marker: PhantomData,
        })
    }
}

macro_rules! define_object_kind {
    ($name:ident, $type_name:literal, $oid_alias:ident) => {
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl SaiObjectKind for $name {
            fn type_name() -> &'static str {
                $type_name
            }
        }

        pub type $oid_alias = SaiObjectId<$name>;
    };
}

define_object_kind!(SwitchKind, "SAI_OBJECT_TYPE_SWITCH", SwitchOid);
define_object_kind!(PortKind, "SAI_OBJECT_TYPE_PORT", PortOid);
define_object_kind!(VlanKind, "SAI_OBJECT_TYPE_VLAN", VlanOid);
define_object_kind!(BridgeKind, "SAI_OBJECT_TYPE_BRIDGE", BridgeOid);
define_object_kind!(BridgePortKind, "SAI_OBJECT_TYPE_BRIDGE_PORT", BridgePortOid);
