//! SONiC FDB orchestration
//!
//! Keeps the software FDB in step with the MAC addresses the switch ASIC
//! learns, and carries that table across a warm restart of the owning
//! process without relearning.
//!
//! # Architecture
//!
//! ```text
//!  [ASIC] ──FDB events──> [HardwareNotificationChannel] ──> [FdbSyncEngine]
//!    ^                                                          │
//!    │ learning mode, FDB dump/flush                            ├──> FdbOrch ──> StateMirror (FDB_TABLE)
//!    └──────────────────── LearningModeController <─────────────┤        └────> FdbResourceCounter ──> CrmOrch
//!                                                               └──> WarmRestartCoordinator ──> checkpoint
//! ```
//!
//! # Key Components
//!
//! - [`fdb::FdbOrch`]: the authoritative table; single writer of the mirror
//!   and the resource counter
//! - [`learning::LearningModeController`]: per-port hardware learning mode
//! - [`warm_restart::WarmRestartCoordinator`]: freeze, checkpoint, reconcile
//! - [`daemon::FdbSyncEngine`]: the task that serializes all of the above
//! - [`sim::VirtualSwitch`]: a simulated ASIC behind the SAI contracts

pub mod audit;
pub mod config;
pub mod crm;
pub mod daemon;
pub mod error;
pub mod fdb;
pub mod learning;
pub mod notification;
pub mod sim;
pub mod state;
pub mod sync;
pub mod warm_restart;

pub use config::{FdbSyncConfig, StateMirrorMode, DEFAULT_CONFIG_PATH};
pub use daemon::{EngineDeps, EngineHandle, EngineStatus, FdbSyncEngine};
pub use error::{FdbSyncError, Result};
pub use fdb::{FdbEntry, FdbEntryType, FdbKey};
pub use notification::{FdbNotification, HardwareNotificationChannel};
pub use sim::VirtualSwitch;
pub use state::StateMirror;
pub use warm_restart::{
    CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, RestartCheckReply,
    RestartCheckRequest, WarmRestartState,
};
