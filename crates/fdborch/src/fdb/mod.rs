//! FdbOrch - the forwarding database table.
//!
//! Keys are (bridge domain, MAC). Learns, moves and ages arrive from the
//! hardware notification channel; the table is frozen across a warm restart
//! and reinstalled wholesale once reconciliation finishes.

mod orch;
mod types;

pub use orch::{FdbOrch, FdbOrchStats};
pub use types::{FdbEntry, FdbEntryType, FdbEvent, FdbKey, FdbObserver, FdbUpdate};
