//! The FDB sync engine task and its handle.
//!
//! ```text
//!   EngineHandle ──commands──> FdbSyncEngine ──> FdbSync (FdbOrch + learning)
//!        │                          │  ^               │
//!        │                          │  └─ notifications ┘ (only while running)
//!        │                          ├──> WarmRestartCoordinator
//!        │                          └──> CrmOrch (poll)
//!        └──reads──> StateMirror / FdbResourceCounter / CRM:STATS
//! ```

mod engine;
mod handle;

pub use engine::{EngineDeps, EngineStatus, FdbSyncEngine};
pub use handle::EngineHandle;
