//! SAI operations consumed by the FDB orchestrator.
//!
//! - [`bridge`]: bridge-port FDB learning mode
//! - [`fdb`]: FDB entry dump and flush, notification payload types
//! - [`switch`]: switch-wide FDB capacity

pub mod bridge;
pub mod fdb;
pub mod switch;

pub use bridge::{BridgePortApi, FdbLearningMode};
pub use fdb::{FdbApi, FdbFlushScope, SaiFdbEntry, SaiFdbEntryType, SaiFdbEventType};
pub use switch::SwitchApi;
