//! Error types for fdborch

use crate::warm_restart::WarmRestartState;
use sonic_sai::SaiError;
use thiserror::Error;

/// FDB synchronization errors
#[derive(Error, Debug)]
pub enum FdbSyncError {
    /// Port alias or bridge port OID is not provisioned
    #[error("Invalid port: {0}")]
    InvalidPort(String),

    /// Mutation attempted while the table is frozen for warm restart
    #[error("FDB table is frozen for warm restart")]
    FrozenTable,

    /// Dynamic learn reported on a port whose learning mode is DISABLE
    #[error("Learning is disabled on port {0}")]
    LearningDisabled(String),

    #[error("Warm restart checkpoint unavailable: {0}")]
    CheckpointUnavailable(String),

    #[error("Reconciliation mismatch: {0}")]
    ReconciliationMismatch(String),

    /// Two entries share (bridge domain, MAC). Internal invariant breach.
    #[error("Duplicate FDB key: {0}")]
    DuplicateKeyViolation(String),

    #[error("{0} hardware notifications still pending")]
    PendingTasks(usize),

    #[error("Warm restart is not enabled")]
    WarmRestartDisabled,

    #[error("Invalid warm restart transition: {from} -> {to}")]
    InvalidTransition {
        from: WarmRestartState,
        to: WarmRestartState,
    },

    /// Reconciliation failed earlier; only a cold start recovers
    #[error("FDB sync engine failed, cold restart required")]
    EngineFailed,

    #[error("SAI error: {0}")]
    Sai(#[from] SaiError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The engine task is gone
    #[error("FDB sync engine is not running")]
    ChannelClosed,
}

/// Result type for fdborch operations
pub type Result<T> = std::result::Result<T, FdbSyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sonic_sai::SaiStatus;

    #[test]
    fn test_error_display() {
        let err = FdbSyncError::InvalidPort("Ethernet99".to_string());
        assert_eq!(err.to_string(), "Invalid port: Ethernet99");

        let err = FdbSyncError::InvalidTransition {
            from: WarmRestartState::Frozen,
            to: WarmRestartState::Freezing,
        };
        assert_eq!(
            err.to_string(),
            "Invalid warm restart transition: frozen -> freezing"
        );
    }

    #[test]
    fn test_sai_error_converts() {
        let err: FdbSyncError = SaiError::from_status(SaiStatus::Failure).into();
        assert!(matches!(err, FdbSyncError::Sai(_)));
        assert_eq!(err.to_string(), "SAI error: SAI operation failed: SAI_STATUS_FAILURE");
    }
}
