//! Bridge port FDB learning mode (`SAI_BRIDGE_PORT_ATTR_FDB_LEARNING_MODE`).

use crate::error::{SaiError, SaiResult};
use crate::types::BridgePortOid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a bridge port handles unknown source MACs.
///
/// Only the two modes the orchestrator drives are modelled: hardware learning
/// with notifications, and learning suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FdbLearningMode {
    #[default]
    Hw,
    Disable,
}

impl FdbLearningMode {
    pub const fn as_sai_str(&self) -> &'static str {
        match self {
            FdbLearningMode::Hw => "SAI_BRIDGE_PORT_FDB_LEARNING_MODE_HW",
            FdbLearningMode::Disable => "SAI_BRIDGE_PORT_FDB_LEARNING_MODE_DISABLE",
        }
    }

    pub const fn is_learning(&self) -> bool {
        matches!(self, FdbLearningMode::Hw)
    }
}

impl fmt::Display for FdbLearningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sai_str())
    }
}

impl FromStr for FdbLearningMode {
    type Err = SaiError;

    /// Accepts the SAI attribute value or the CONFIG_DB shorthand (`hw`,
    /// `disable`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SAI_BRIDGE_PORT_FDB_LEARNING_MODE_HW" | "hw" => Ok(FdbLearningMode::Hw),
            "SAI_BRIDGE_PORT_FDB_LEARNING_MODE_DISABLE" | "disable" => {
                Ok(FdbLearningMode::Disable)
            }
            other => Err(SaiError::invalid_parameter(format!(
                "unknown FDB learning mode: {}",
                other
            ))),
        }
    }
}

/// Bridge port attribute access.
///
/// Calls are synchronous from the caller's point of view; when `set` returns
/// `Ok` the ASIC has the new mode.
pub trait BridgePortApi: Send + Sync {
    fn set_fdb_learning_mode(&self, port: BridgePortOid, mode: FdbLearningMode) -> SaiResult<()>;

    fn get_fdb_learning_mode(&self, port: BridgePortOid) -> SaiResult<FdbLearningMode>;
}
