//! Post-restart reconciliation of the checkpoint against the hardware.
//!
//! Three passes over a working copy of the checkpoint:
//!
//! 1. rebind every entry to the bridge port OID of the new instance, by alias
//! 2. replay notifications raised during the restart window, in order
//! 3. compare with the hardware FDB of the participating bridge domains
//!
//! Anything the hardware and the checkpoint disagree on without a
//! notification to explain it is reported as unexplained. Above the policy
//! limit, reconciliation fails and nothing is installed.

use crate::error::{FdbSyncError, Result};
use crate::fdb::{FdbEntry, FdbEntryType, FdbKey};
use crate::learning::LearningModeController;
use crate::notification::FdbNotification;
use serde::{Deserialize, Serialize};
use sonic_sai::{SaiFdbEntry, SaiFdbEventType};
use sonic_types::VlanId;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use super::checkpoint::Checkpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    /// Unexplained differences tolerated before reconciliation fails.
    pub max_unexplained_entries: usize,
    /// Install hardware entries the checkpoint does not know about instead of
    /// counting them as unexplained.
    pub adopt_unknown_entries: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Checkpointed entries the hardware still holds.
    pub confirmed: usize,
    pub moved: usize,
    pub aged: usize,
    /// Learned during the restart window, not in the checkpoint.
    pub late_learned: usize,
    pub adopted: usize,
    /// Entries whose bridge port OID changed across the restart.
    pub rebound: usize,
    pub unexplained: Vec<FdbKey>,
}

/// Reconciled table plus what it took to get there.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub entries: Vec<FdbEntry>,
    pub report: ReconcileReport,
}

pub fn reconcile(
    checkpoint: &Checkpoint,
    learning: &LearningModeController,
    events: &[FdbNotification],
    hardware: &[SaiFdbEntry],
    policy: &ReconcilePolicy,
) -> Result<ReconcileOutcome> {
    let mut report = ReconcileReport::default();
    let mut working: BTreeMap<FdbKey, FdbEntry> = BTreeMap::new();

    for entry in &checkpoint.entries {
        let Some(port) = learning.port(&entry.port) else {
            warn!(key = %entry.key, port = %entry.port, "Checkpointed port not provisioned");
            report.unexplained.push(entry.key);
            continue;
        };
        let mut entry = entry.clone();
        if entry.bridge_port_oid != port.oid {
            entry.bridge_port_oid = port.oid;
            report.rebound += 1;
        }
        working.insert(entry.key, entry);
    }

    for event in events {
        replay(&mut working, &mut report, learning, event, &checkpoint.entries);
    }

    let participating: BTreeSet<VlanId> = checkpoint
        .bridge_domains
        .iter()
        .copied()
        .chain(learning.vlans())
        .collect();
    confirm_against_hardware(&mut working, &mut report, learning, hardware, &participating, policy);

    report.confirmed = checkpoint
        .entries
        .iter()
        .filter(|e| working.contains_key(&e.key))
        .count();

    if report.unexplained.len() > policy.max_unexplained_entries {
        let keys: Vec<String> = report.unexplained.iter().map(|k| k.to_string()).collect();
        return Err(FdbSyncError::ReconciliationMismatch(format!(
            "{} unexplained entries (max {}): {}",
            keys.len(),
            policy.max_unexplained_entries,
            keys.join(", ")
        )));
    }

    Ok(ReconcileOutcome {
        entries: working.into_values().collect(),
        report,
    })
}

fn replay(
    working: &mut BTreeMap<FdbKey, FdbEntry>,
    report: &mut ReconcileReport,
    learning: &LearningModeController,
    event: &FdbNotification,
    checkpointed: &[FdbEntry],
) {
    let key = FdbKey::new(event.entry.vlan, event.entry.mac);

    match event.kind {
        SaiFdbEventType::Learned | SaiFdbEventType::Move => {
            let Some(port) = learning.port_by_oid(event.entry.bridge_port) else {
                debug!(%key, bridge_port = %event.entry.bridge_port, "Replayed event for unknown port");
                return;
            };
            match working.get_mut(&key) {
                Some(existing) if existing.port == port.alias => {}
                Some(existing) => {
                    debug!(%key, from = %existing.port, to = %port.alias, "Move during restart window");
                    existing.port = port.alias.clone();
                    existing.bridge_port_oid = port.oid;
                    report.moved += 1;
                }
                None => {
                    working.insert(
                        key,
                        FdbEntry::new(
                            key,
                            port.alias.clone(),
                            port.oid,
                            FdbEntryType::from(event.entry.entry_type),
                        ),
                    );
                    // An entry aged and relearned in the window is not new.
                    if !checkpointed.iter().any(|e| e.key == key) {
                        report.late_learned += 1;
                    }
                }
            }
        }
        SaiFdbEventType::Aged | SaiFdbEventType::Flushed => {
            if working.remove(&key).is_some() {
                report.aged += 1;
            }
        }
    }
}

fn confirm_against_hardware(
    working: &mut BTreeMap<FdbKey, FdbEntry>,
    report: &mut ReconcileReport,
    learning: &LearningModeController,
    hardware: &[SaiFdbEntry],
    participating: &BTreeSet<VlanId>,
    policy: &ReconcilePolicy,
) {
    let hw: BTreeMap<FdbKey, &SaiFdbEntry> = hardware
        .iter()
        .filter(|e| participating.contains(&e.vlan))
        .map(|e| (FdbKey::new(e.vlan, e.mac), e))
        .collect();

    let mut checked = BTreeSet::new();
    let mut missing = Vec::new();
    for (key, entry) in working.iter_mut() {
        if !participating.contains(&key.vlan) {
            continue;
        }
        checked.insert(*key);
        match hw.get(key) {
            Some(hw_entry) if hw_entry.bridge_port != entry.bridge_port_oid => {
                match learning.port_by_oid(hw_entry.bridge_port) {
                    Some(port) => {
                        entry.port = port.alias.clone();
                        entry.bridge_port_oid = port.oid;
                        report.moved += 1;
                    }
                    None => missing.push(*key),
                }
            }
            Some(_) => {}
            None => missing.push(*key),
        }
    }
    for key in missing {
        warn!(%key, "Entry not found in hardware");
        working.remove(&key);
        report.unexplained.push(key);
    }

    for (key, hw_entry) in hw {
        if checked.contains(&key) {
            continue;
        }
        match learning.port_by_oid(hw_entry.bridge_port) {
            Some(port) if policy.adopt_unknown_entries => {
                working.insert(
                    key,
                    FdbEntry::new(
                        key,
                        port.alias.clone(),
                        port.oid,
                        FdbEntryType::from(hw_entry.entry_type),
                    ),
                );
                report.adopted += 1;
            }
            _ => {
                warn!(%key, bridge_port = %hw_entry.bridge_port, "Hardware entry not in checkpoint");
                report.unexplained.push(key);
            }
        }
    }
}
