//! Switch-wide attributes read by resource monitoring.

use crate::error::SaiResult;

/// Switch attribute access.
pub trait SwitchApi: Send + Sync {
    /// `SAI_SWITCH_ATTR_AVAILABLE_FDB_ENTRY`: how many more FDB entries the
    /// ASIC can hold.
    fn available_fdb_entries(&self) -> SaiResult<u32>;
}
