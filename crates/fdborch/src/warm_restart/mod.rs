//! Warm restart: freeze, checkpoint, reconcile.
//!
//! - [`coordinator`]: the restart state machine driving both instances
//! - [`checkpoint`]: what survives the restart and where it is kept
//! - [`reconcile`]: merging the checkpoint with what hardware reports after
//! - [`metrics`]: lifecycle counters

pub mod checkpoint;
pub mod coordinator;
pub mod metrics;
pub mod reconcile;

pub use checkpoint::{
    Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, CHECKPOINT_VERSION,
    DEFAULT_CHECKPOINT_PATH,
};
pub use coordinator::{
    RestartCheckReply, RestartCheckRequest, WarmRestartCoordinator, WarmRestartCoordinatorConfig,
    WarmRestartState, DEFAULT_DRAIN_LIMIT, DEFAULT_RECONCILE_TIMEOUT_SECS,
};
pub use metrics::WarmRestartMetrics;
pub use reconcile::{reconcile, ReconcileOutcome, ReconcilePolicy, ReconcileReport};
