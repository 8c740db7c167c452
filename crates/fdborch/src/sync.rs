//! Hardware notification ingestion.
//!
//! [`FdbSync`] bundles the pieces the notification path and the warm-restart
//! coordinator both work on: the FDB table, learning-mode control, the
//! notification channel and the SAI FDB API.

use crate::error::{FdbSyncError, Result};
use crate::fdb::{FdbEntryType, FdbKey, FdbOrch, FdbUpdate};
use crate::learning::LearningModeController;
use crate::notification::{FdbNotification, HardwareNotificationChannel};
use sonic_sai::{FdbApi, SaiFdbEventType};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FdbSyncStats {
    pub notifications_applied: u64,
    pub dropped_frozen: u64,
    pub dropped_learning_disabled: u64,
    pub dropped_unknown_port: u64,
    pub dropped_other: u64,
}

pub struct FdbSync {
    pub fdb: FdbOrch,
    pub learning: LearningModeController,
    notifications: HardwareNotificationChannel,
    fdb_api: Arc<dyn FdbApi>,
    stats: FdbSyncStats,
}

impl FdbSync {
    pub fn new(
        fdb: FdbOrch,
        learning: LearningModeController,
        notifications: HardwareNotificationChannel,
        fdb_api: Arc<dyn FdbApi>,
    ) -> Self {
        Self {
            fdb,
            learning,
            notifications,
            fdb_api,
            stats: FdbSyncStats::default(),
        }
    }

    pub fn notifications(&self) -> &HardwareNotificationChannel {
        &self.notifications
    }

    pub fn fdb_api(&self) -> &Arc<dyn FdbApi> {
        &self.fdb_api
    }

    pub fn stats(&self) -> &FdbSyncStats {
        &self.stats
    }

    /// Applies one notification to the table.
    ///
    /// Ages and flushes only need the key, so they apply even if the bridge
    /// port is already gone.
    pub fn apply_notification(&mut self, notification: &FdbNotification) -> Result<()> {
        self.apply(notification, true)
    }

    fn apply(&mut self, notification: &FdbNotification, check_mode: bool) -> Result<()> {
        let entry = &notification.entry;
        let key = FdbKey::new(entry.vlan, entry.mac);

        match notification.kind {
            SaiFdbEventType::Learned | SaiFdbEventType::Move => {
                let port = self
                    .learning
                    .port_by_oid(entry.bridge_port)
                    .ok_or_else(|| FdbSyncError::InvalidPort(entry.bridge_port.to_string()))?;
                let entry_type = FdbEntryType::from(entry.entry_type);
                let update = if check_mode {
                    self.fdb.on_hardware_learn(key, port, entry_type)?
                } else {
                    self.fdb.on_backlog_learn(key, port, entry_type)?
                };
                if notification.kind == SaiFdbEventType::Move && update == FdbUpdate::Inserted {
                    debug!(%key, "Move notification for unknown entry, installed as new");
                }
            }
            SaiFdbEventType::Aged | SaiFdbEventType::Flushed => {
                self.fdb.on_hardware_age(&key)?;
            }
        }
        Ok(())
    }

    /// Applies a notification, logging and dropping any error. Nothing on the
    /// notification path is fatal.
    pub fn handle_notification(&mut self, notification: &FdbNotification) {
        self.handle(notification, true);
    }

    fn handle(&mut self, notification: &FdbNotification, check_mode: bool) {
        match self.apply(notification, check_mode) {
            Ok(()) => self.stats.notifications_applied += 1,
            Err(e) => {
                let entry = &notification.entry;
                match &e {
                    FdbSyncError::FrozenTable => self.stats.dropped_frozen += 1,
                    FdbSyncError::LearningDisabled(_) => {
                        self.stats.dropped_learning_disabled += 1
                    }
                    FdbSyncError::InvalidPort(_) => self.stats.dropped_unknown_port += 1,
                    _ => self.stats.dropped_other += 1,
                }
                warn!(
                    kind = %notification.kind,
                    vlan = %entry.vlan,
                    mac = %entry.mac,
                    bridge_port = %entry.bridge_port,
                    error = %e,
                    "Dropping FDB notification"
                );
            }
        }
    }

    /// Applies up to `limit` queued notifications; returns how many were taken.
    pub fn process_pending(&mut self, limit: usize) -> usize {
        let batch = self.notifications.drain(limit);
        for notification in &batch {
            self.handle(notification, true);
        }
        batch.len()
    }

    /// Like [`Self::process_pending`], for notifications queued before
    /// learning was disabled. The hardware raised them while the ports were
    /// still learning, so learns apply whatever the port's mode is now.
    pub fn process_backlog(&mut self, limit: usize) -> usize {
        let batch = self.notifications.drain(limit);
        for notification in &batch {
            self.handle(notification, false);
        }
        batch.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::FdbResourceCounter;
    use crate::learning::tests::{oid, vlan6, MockBridgePortApi};
    use pretty_assertions::assert_eq;
    use sonic_sai::{FdbFlushScope, SaiFdbEntry, SaiFdbEntryType, SaiResult};
    use sonic_types::{MacAddress, VlanId};

    struct NoFdbApi;

    impl FdbApi for NoFdbApi {
        fn get_fdb_entries(&self, _vlans: &[VlanId]) -> SaiResult<Vec<SaiFdbEntry>> {
            Ok(Vec::new())
        }

        fn flush_fdb_entries(&self, _scope: FdbFlushScope) -> SaiResult<usize> {
            Ok(0)
        }
    }

    fn make_sync() -> FdbSync {
        let mut learning = LearningModeController::new(Arc::new(MockBridgePortApi::default()));
        learning.add_bridge_port("Ethernet64", oid(0x3a000000000610), [vlan6()]).unwrap();
        learning.add_bridge_port("Ethernet68", oid(0x3a000000000611), [vlan6()]).unwrap();
        FdbSync::new(
            FdbOrch::new(Arc::new(FdbResourceCounter::new())),
            learning,
            HardwareNotificationChannel::new(64),
            Arc::new(NoFdbApi),
        )
    }

    fn notification(kind: SaiFdbEventType, index: u32, port: u64) -> FdbNotification {
        FdbNotification::new(
            kind,
            SaiFdbEntry {
                vlan: vlan6(),
                mac: MacAddress::local_from_index(index),
                bridge_port: oid(port),
                entry_type: SaiFdbEntryType::Dynamic,
            },
        )
    }

    #[test]
    fn test_learn_move_age() {
        let mut sync = make_sync();
        sync.apply_notification(&notification(SaiFdbEventType::Learned, 1, 0x3a000000000610))
            .unwrap();
        sync.apply_notification(&notification(SaiFdbEventType::Move, 1, 0x3a000000000611))
            .unwrap();

        let key = FdbKey::new(vlan6(), MacAddress::local_from_index(1));
        assert_eq!(sync.fdb.get(&key).unwrap().port, "Ethernet68");
        assert_eq!(sync.fdb.counter().value(), 1);

        sync.apply_notification(&notification(SaiFdbEventType::Aged, 1, 0x3a000000000611))
            .unwrap();
        assert_eq!(sync.fdb.count(), 0);
    }

    #[test]
    fn test_unknown_bridge_port() {
        let mut sync = make_sync();
        let result =
            sync.apply_notification(&notification(SaiFdbEventType::Learned, 1, 0x3a0000000009ff));
        assert!(matches!(result, Err(FdbSyncError::InvalidPort(_))));
    }

    #[test]
    fn test_errors_are_dropped_and_counted() {
        let mut sync = make_sync();
        sync.fdb.freeze();
        sync.notifications()
            .publish(notification(SaiFdbEventType::Learned, 1, 0x3a000000000610));
        sync.notifications()
            .publish(notification(SaiFdbEventType::Learned, 2, 0x3a0000000009ff));

        assert_eq!(sync.process_pending(16), 2);
        assert_eq!(sync.stats().dropped_frozen, 1);
        assert_eq!(sync.stats().dropped_unknown_port, 1);
        assert_eq!(sync.fdb.count(), 0);
    }

    #[test]
    fn test_backlog_applies_learns_on_disabled_port() {
        let mut sync = make_sync();
        sync.learning.freeze_all().unwrap();
        sync.notifications()
            .publish(notification(SaiFdbEventType::Learned, 1, 0x3a000000000610));
        sync.notifications()
            .publish(notification(SaiFdbEventType::Learned, 2, 0x3a000000000611));

        assert_eq!(sync.process_backlog(16), 2);
        assert_eq!(sync.fdb.count(), 2);
        assert_eq!(sync.stats().dropped_learning_disabled, 0);

        // Outside the backlog the port mode still gates learning.
        sync.notifications()
            .publish(notification(SaiFdbEventType::Learned, 3, 0x3a000000000610));
        assert_eq!(sync.process_pending(16), 1);
        assert_eq!(sync.fdb.count(), 2);
        assert_eq!(sync.stats().dropped_learning_disabled, 1);
    }
}
