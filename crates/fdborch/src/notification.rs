//! Hardware FDB event channel.
//!
//! The ASIC side publishes without blocking; the engine consumes in FIFO
//! order, which keeps events for one key in the order the ASIC raised them.
//! The channel is a handle that can be cloned freely and lives independently
//! of any engine instance. Events raised while no engine is consuming (for
//! example across a warm restart) stay queued until the next one picks them up.

use parking_lot::Mutex;
use sonic_sai::{SaiFdbEntry, SaiFdbEventType};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// Default queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16384;

/// One `SAI_SWITCH_ATTR_FDB_EVENT_NOTIFY` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdbNotification {
    pub kind: SaiFdbEventType,
    pub entry: SaiFdbEntry,
}

impl FdbNotification {
    pub fn new(kind: SaiFdbEventType, entry: SaiFdbEntry) -> Self {
        Self { kind, entry }
    }
}

struct Inner {
    queue: Mutex<VecDeque<FdbNotification>>,
    notify: Notify,
    capacity: usize,
    published: AtomicU64,
    dropped: AtomicU64,
}

/// Bounded multi-producer, single-consumer notification queue.
#[derive(Clone)]
pub struct HardwareNotificationChannel {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for HardwareNotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareNotificationChannel")
            .field("capacity", &self.inner.capacity)
            .field("pending", &self.pending())
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl Default for HardwareNotificationChannel {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl HardwareNotificationChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                capacity: capacity.max(1),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Queues a notification. When the queue is full the new notification is
    /// dropped and counted; returns `false` in that case.
    pub fn publish(&self, notification: FdbNotification) -> bool {
        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.capacity {
                drop(queue);
                let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    kind = %notification.kind,
                    mac = %notification.entry.mac,
                    dropped,
                    "FDB notification queue full, dropping event"
                );
                return false;
            }
            queue.push_back(notification);
        }
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        self.inner.notify.notify_one();
        true
    }

    pub fn try_recv(&self) -> Option<FdbNotification> {
        self.inner.queue.lock().pop_front()
    }

    /// Waits for the next notification.
    pub async fn recv(&self) -> FdbNotification {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(notification) = self.try_recv() {
                return notification;
            }
            notified.await;
        }
    }

    /// Removes up to `limit` queued notifications, oldest first.
    pub fn drain(&self, limit: usize) -> Vec<FdbNotification> {
        let mut queue = self.inner.queue.lock();
        let n = limit.min(queue.len());
        queue.drain(..n).collect()
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sonic_sai::{BridgePortOid, SaiFdbEntryType};
    use sonic_types::{MacAddress, VlanId};
    use std::time::Duration;

    fn learned(index: u32) -> FdbNotification {
        FdbNotification::new(
            SaiFdbEventType::Learned,
            SaiFdbEntry {
                vlan: VlanId::new(6).unwrap(),
                mac: MacAddress::local_from_index(index),
                bridge_port: BridgePortOid::from_raw(0x3a000000000610).unwrap(),
                entry_type: SaiFdbEntryType::Dynamic,
            },
        )
    }

    #[test]
    fn test_fifo_order() {
        let channel = HardwareNotificationChannel::new(8);
        for i in 1..=3 {
            assert!(channel.publish(learned(i)));
        }

        let macs: Vec<MacAddress> = channel.drain(10).iter().map(|n| n.entry.mac).collect();
        assert_eq!(
            macs,
            (1..=3).map(MacAddress::local_from_index).collect::<Vec<_>>()
        );
        assert_eq!(channel.pending(), 0);
    }

    #[test]
    fn test_overflow_drops_newest() {
        let channel = HardwareNotificationChannel::new(2);
        assert!(channel.publish(learned(1)));
        assert!(channel.publish(learned(2)));
        assert!(!channel.publish(learned(3)));

        assert_eq!(channel.dropped(), 1);
        assert_eq!(channel.published(), 2);
        assert_eq!(channel.try_recv(), Some(learned(1)));
    }

    #[test]
    fn test_drain_respects_limit() {
        let channel = HardwareNotificationChannel::new(8);
        for i in 1..=5 {
            channel.publish(learned(i));
        }
        assert_eq!(channel.drain(2).len(), 2);
        assert_eq!(channel.pending(), 3);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_publish() {
        let channel = HardwareNotificationChannel::new(8);
        let consumer = channel.clone();
        let task = tokio::spawn(async move { consumer.recv().await });

        tokio::task::yield_now().await;
        channel.publish(learned(7));

        let got = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, learned(7));
    }
}
