//! CrmOrch - Capacity Resource Management for the FDB entry resource.
//!
//! # Architecture
//!
//! ```text
//! FdbOrch ──(used)──> FdbResourceCounter <──(available)── CrmOrch ───> SwitchApi
//!                                                            │
//!                                                            ├──> COUNTERS_DB (CRM:STATS)
//!                                                            └──> threshold events
//! ```
//!
//! The counter is the only state shared with the FDB table. It is written on
//! every FDB mutation, so telemetry reading it between polls sees the live
//! entry count; the poll only refreshes `available` and republishes.

mod orch;
mod types;

pub use orch::{CrmOrch, CrmOrchConfig, CrmOrchError, CrmOrchStats};
pub use types::{
    CrmThresholdType, CrmThresholds, FdbResourceCounter, ThresholdCheck, CRM_COUNTERS_TABLE_KEY,
    CRM_EXCEEDED_MSG_MAX, CRM_FDB_ENTRY_AVAILABLE, CRM_FDB_ENTRY_USED, DEFAULT_HIGH_THRESHOLD,
    DEFAULT_LOW_THRESHOLD, DEFAULT_POLLING_INTERVAL,
};
