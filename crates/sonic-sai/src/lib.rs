//! SAI (Switch Abstraction Interface) contracts used by the FDB orchestrator.
//!
//! - [`types`]: type-safe object IDs (a bridge port OID cannot be passed where
//!   a VLAN OID is expected)
//! - [`error`]: SAI status codes and [`SaiError`]
//! - [`api`]: the bridge-port, FDB and switch operations the orchestrator
//!   needs, expressed as traits so a vendor SAI or a simulator can sit behind
//!   them
//!
//! ```
//! use sonic_sai::{BridgePortOid, FdbLearningMode};
//!
//! let bp = BridgePortOid::from_raw(0x3a000000000610).unwrap();
//! assert_eq!(bp.to_string(), "oid:0x3a000000000610");
//! assert_eq!(FdbLearningMode::Hw.as_sai_str(), "SAI_BRIDGE_PORT_FDB_LEARNING_MODE_HW");
//! ```

pub mod api;
pub mod error;
pub mod types;

pub use api::{
    BridgePortApi, FdbApi, FdbFlushScope, FdbLearningMode, SaiFdbEntry, SaiFdbEntryType,
    SaiFdbEventType, SwitchApi,
};
pub use error::{SaiError, SaiResult, SaiStatus};
pub use types::{
    BridgeKind, BridgeOid, BridgePortKind, BridgePortOid, PortKind, PortOid, RawSaiObjectId,
    SaiObjectId, SaiObjectKind, SwitchKind, SwitchOid, VlanKind, VlanOid,
};
