//! FDB orchestration logic.

use super::types::{FdbEntry, FdbEntryType, FdbEvent, FdbKey, FdbObserver, FdbUpdate};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::crm::FdbResourceCounter;
use crate::error::{FdbSyncError, Result};
use crate::learning::BridgePort;
use sonic_types::VlanId;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FdbOrchStats {
    pub entries_added: u64,
    pub entries_removed: u64,
    pub entries_moved: u64,
    pub entries_refreshed: u64,
    /// Same key and port, entry type changed.
    pub entries_updated: u64,
    /// Learns and ages refused because the table was frozen.
    pub rejected_frozen: u64,
    /// Dynamic learns refused because the port had learning disabled.
    pub rejected_learning_disabled: u64,
    pub entries_flushed: u64,
    pub clears: u64,
}

/// The authoritative FDB table.
///
/// Every mutation goes through here: it keeps the resource counter equal to
/// the table size and publishes the change to observers, in order.
pub struct FdbOrch {
    entries: BTreeMap<FdbKey, FdbEntry>,
    counter: Arc<FdbResourceCounter>,
    observers: Vec<Arc<dyn FdbObserver>>,
    frozen: bool,
    stats: FdbOrchStats,
}

impl std::fmt::Debug for FdbOrch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdbOrch")
            .field("entries", &self.entries.len())
            .field("frozen", &self.frozen)
            .field("stats", &self.stats)
            .finish()
    }
}

impl FdbOrch {
    pub fn new(counter: Arc<FdbResourceCounter>) -> Self {
        counter.set_used(0);
        Self {
            entries: BTreeMap::new(),
            counter,
            observers: Vec::new(),
            frozen: false,
            stats: FdbOrchStats::default(),
        }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn FdbObserver>) {
        self.observers.push(observer);
    }

    fn publish(&self, event: FdbEvent) {
        for observer in &self.observers {
            observer.on_fdb_event(&event);
        }
    }

    fn sync_counter(&self) {
        self.counter
            .set_used(u32::try_from(self.entries.len()).unwrap_or(u32::MAX));
    }

    /// Inserts or updates the entry for `key` on a hardware learn or move.
    ///
    /// A learn for a known key on a different port is a move: the entry is
    /// updated in place and the count does not change.
    pub fn on_hardware_learn(
        &mut self,
        key: FdbKey,
        port: &BridgePort,
        entry_type: FdbEntryType,
    ) -> Result<FdbUpdate> {
        self.learn(key, port, entry_type, true)
    }

    /// Applies a learn the hardware raised before learning was disabled on
    /// `port`. Same as [`Self::on_hardware_learn`] without the learning-mode
    /// check.
    pub fn on_backlog_learn(
        &mut self,
        key: FdbKey,
        port: &BridgePort,
        entry_type: FdbEntryType,
    ) -> Result<FdbUpdate> {
        self.learn(key, port, entry_type, false)
    }

    fn learn(
        &mut self,
        key: FdbKey,
        port: &BridgePort,
        entry_type: FdbEntryType,
        check_mode: bool,
    ) -> Result<FdbUpdate> {
        if self.frozen {
            self.stats.rejected_frozen += 1;
            return Err(FdbSyncError::FrozenTable);
        }
        if check_mode && entry_type == FdbEntryType::Dynamic && !port.mode.is_learning() {
            self.stats.rejected_learning_disabled += 1;
            return Err(FdbSyncError::LearningDisabled(port.alias.clone()));
        }

        if let Some(existing) = self.entries.get_mut(&key) {
            if existing.port == port.alias {
                existing.bridge_port_oid = port.oid;
                if existing.entry_type == entry_type {
                    self.stats.entries_refreshed += 1;
                    return Ok(FdbUpdate::Refreshed);
                }
                existing.entry_type = entry_type;
                let entry = existing.clone();
                self.stats.entries_updated += 1;
                debug!(
                    %key,
                    port = %entry.port,
                    entry_type = %entry_type,
                    "FDB entry type changed"
                );
                self.publish(FdbEvent::Updated(entry));
                return Ok(FdbUpdate::Updated);
            }

            let from = std::mem::replace(&mut existing.port, port.alias.clone());
            existing.bridge_port_oid = port.oid;
            existing.entry_type = entry_type;
            let entry = existing.clone();
            self.stats.entries_moved += 1;
            debug!(%key, from = %from, to = %entry.port, "FDB entry moved");
            self.publish(FdbEvent::Moved {
                entry,
                from: from.clone(),
            });
            return Ok(FdbUpdate::Moved { from });
        }

        let entry = FdbEntry::new(key, port.alias.clone(), port.oid, entry_type);
        self.entries.insert(key, entry.clone());
        self.sync_counter();
        self.stats.entries_added += 1;
        debug!(%key, port = %entry.port, entry_type = %entry_type, "FDB entry added");
        self.publish(FdbEvent::Added(entry));
        Ok(FdbUpdate::Inserted)
    }

    /// Removes the entry for `key` on a hardware age-out. Absent keys are not
    /// an error.
    pub fn on_hardware_age(&mut self, key: &FdbKey) -> Result<Option<FdbEntry>> {
        if self.frozen {
            self.stats.rejected_frozen += 1;
            return Err(FdbSyncError::FrozenTable);
        }

        let removed = self.entries.remove(key);
        if let Some(entry) = &removed {
            self.sync_counter();
            self.stats.entries_removed += 1;
            debug!(%key, port = %entry.port, "FDB entry aged");
            self.publish(FdbEvent::Removed(entry.clone()));
        }
        Ok(removed)
    }

    /// Removes dynamic entries in `vlan` and/or on `port`. Static entries are
    /// never flushed.
    pub fn flush(&mut self, vlan: Option<VlanId>, port: Option<&str>) -> Result<usize> {
        if self.frozen {
            return Err(FdbSyncError::FrozenTable);
        }

        let keys: Vec<FdbKey> = self
            .entries
            .values()
            .filter(|e| e.is_dynamic())
            .filter(|e| vlan.map_or(true, |v| v == e.key.vlan))
            .filter(|e| port.map_or(true, |p| p == e.port))
            .map(|e| e.key)
            .collect();

        for key in &keys {
            if let Some(entry) = self.entries.remove(key) {
                self.publish(FdbEvent::Removed(entry));
            }
        }
        self.sync_counter();
        self.stats.entries_flushed += keys.len() as u64;
        info!(
            vlan = ?vlan.map(|v| v.alias()),
            port = port.unwrap_or("all"),
            flushed = keys.len(),
            "FDB flushed"
        );
        Ok(keys.len())
    }

    /// Removes every entry, static ones included.
    pub fn clear_all(&mut self) -> Result<usize> {
        if self.frozen {
            audit_log!(AuditRecord::new(AuditCategory::AdminAction, "FdbOrch", "clear_all")
                .with_outcome(AuditOutcome::Denied)
                .with_error("table frozen for warm restart"));
            return Err(FdbSyncError::FrozenTable);
        }

        let cleared = self.entries.len();
        self.entries.clear();
        self.sync_counter();
        self.stats.clears += 1;
        self.publish(FdbEvent::Cleared);

        audit_log!(AuditRecord::new(AuditCategory::AdminAction, "FdbOrch", "clear_all")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({ "cleared": cleared })));
        Ok(cleared)
    }

    /// Installs a reconciled table wholesale. Allowed while frozen.
    pub fn restore(&mut self, entries: Vec<FdbEntry>) -> Result<()> {
        let mut table = BTreeMap::new();
        for entry in &entries {
            if table.insert(entry.key, entry.clone()).is_some() {
                return Err(FdbSyncError::DuplicateKeyViolation(entry.key.to_string()));
            }
        }

        self.entries = table;
        self.sync_counter();
        info!(entries = self.entries.len(), "FDB table restored");
        self.publish(FdbEvent::Resynced(entries));
        Ok(())
    }

    /// Stops accepting hardware-driven mutations.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Starts a new instance frozen, holding the counter at the value the
    /// previous instance checkpointed until the table is restored.
    pub fn begin_warm_start(&mut self, resource_count: u32) {
        self.frozen = true;
        self.counter.set_used(resource_count);
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &FdbKey) -> Option<&FdbEntry> {
        self.entries.get(key)
    }

    /// Ordered copy of every entry.
    pub fn snapshot(&self) -> Vec<FdbEntry> {
        self.entries.values().cloned().collect()
    }

    pub fn counter(&self) -> &Arc<FdbResourceCounter> {
        &self.counter
    }

    pub fn stats(&self) -> &FdbOrchStats {
        &self.stats
    }
}
