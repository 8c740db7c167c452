//! Externally visible tables.
//!
//! [`Table`] is an in-process stand-in for a SONiC database table: string
//! keys mapping to field/value hashes. It is cheap to clone and every clone
//! shares the same rows, so a table handed to one engine instance is still
//! readable after that instance is gone, the way STATE_DB outlives orchagent.
//!
//! [`StateMirror`] projects the FDB table into `FDB_TABLE` rows:
//!
//! ```text
//! FDB_TABLE|Vlan6:02:00:00:00:00:01
//!     "port" : "Ethernet64"
//!     "type" : "dynamic"
//! ```

use crate::fdb::{FdbEntry, FdbEvent, FdbObserver};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Field/value pairs of one row.
pub type FieldValues = BTreeMap<String, String>;

pub const STATE_FDB_TABLE_NAME: &str = "FDB_TABLE";
pub const COUNTERS_CRM_TABLE_NAME: &str = "CRM";

/// Shared key/field/value table.
#[derive(Debug, Clone)]
pub struct Table {
    name: Arc<str>,
    rows: Arc<RwLock<BTreeMap<String, FieldValues>>>,
}

impl Table {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            rows: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Merges `fields` into the row, creating it if needed.
    pub fn hset<K, V>(&self, key: &str, fields: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut rows = self.rows.write();
        let row = rows.entry(key.to_string()).or_default();
        for (field, value) in fields {
            row.insert(field.into(), value.into());
        }
    }

    /// Returns the row, or `None` if the key does not exist.
    pub fn hgetall(&self, key: &str) -> Option<FieldValues> {
        self.rows.read().get(key).cloned()
    }

    pub fn hget(&self, key: &str, field: &str) -> Option<String> {
        self.rows.read().get(key).and_then(|row| row.get(field).cloned())
    }

    pub fn del(&self, key: &str) -> bool {
        self.rows.write().remove(key).is_some()
    }

    pub fn exists(&self, key: &str) -> bool {
        self.rows.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.rows.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    pub fn clear(&self) {
        self.rows.write().clear();
    }

    /// Replaces every row in one step. Readers never see a partial state.
    pub fn replace_all(&self, rows: BTreeMap<String, FieldValues>) {
        *self.rows.write() = rows;
    }

    /// Rows whose key matches `pattern` as a start-anchored regex.
    ///
    /// An exact key matches itself; `Vlan6:.*` matches every row of VLAN 6.
    /// An invalid pattern matches nothing.
    pub fn scan(&self, pattern: &str) -> Vec<(String, FieldValues)> {
        let re = match Regex::new(&format!("^(?:{})", pattern)) {
            Ok(re) => re,
            Err(e) => {
                debug!(table = %self.name, pattern, error = %e, "Invalid key pattern");
                return Vec::new();
            }
        };

        self.rows
            .read()
            .iter()
            .filter(|(key, _)| re.is_match(key))
            .map(|(key, row)| (key.clone(), row.clone()))
            .collect()
    }
}

/// Write-through projection of the FDB table into `FDB_TABLE`.
#[derive(Debug, Clone)]
pub struct StateMirror {
    table: Table,
}

impl Default for StateMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMirror {
    pub fn new() -> Self {
        Self {
            table: Table::new(STATE_FDB_TABLE_NAME),
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    fn row(entry: &FdbEntry) -> FieldValues {
        let mut row = FieldValues::new();
        row.insert("port".to_string(), entry.port.clone());
        row.insert("type".to_string(), entry.entry_type.as_str().to_string());
        row
    }

    /// Applies one table mutation.
    pub fn apply(&self, event: &FdbEvent) {
        match event {
            FdbEvent::Added(entry)
            | FdbEvent::Moved { entry, .. }
            | FdbEvent::Updated(entry) => {
                self.table.hset(&entry.key.to_string(), Self::row(entry));
            }
            FdbEvent::Removed(entry) => {
                self.table.del(&entry.key.to_string());
            }
            FdbEvent::Cleared => self.table.clear(),
            FdbEvent::Resynced(entries) => self.resync(entries),
        }
    }

    /// Replaces the mirror contents with `entries`.
    pub fn resync(&self, entries: &[FdbEntry]) {
        let rows = entries
            .iter()
            .map(|entry| (entry.key.to_string(), Self::row(entry)))
            .collect();
        self.table.replace_all(rows);
    }

    /// True if some row matches `pattern` and carries every expected field.
    pub fn entry_exists(&self, pattern: &str, expected: &[(&str, &str)]) -> bool {
        self.table.scan(pattern).iter().any(|(_, row)| {
            expected
                .iter()
                .all(|(field, value)| row.get(*field).map(String::as_str) == Some(*value))
        })
    }

    pub fn query(&self, pattern: &str) -> Vec<(String, FieldValues)> {
        self.table.scan(pattern)
    }

    pub fn get(&self, key: &str) -> Option<FieldValues> {
        self.table.hgetall(key)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl FdbObserver for StateMirror {
    fn on_fdb_event(&self, event: &FdbEvent) {
        self.apply(event);
    }
}

/// Applies mirror updates from a writer task instead of inline.
///
/// Events go through one FIFO channel and one consumer, so a later mutation
/// of a key is never visible before an earlier one.
pub struct QueuedStateWriter {
    tx: mpsc::UnboundedSender<FdbEvent>,
}

impl QueuedStateWriter {
    /// Spawns the writer task on the current runtime.
    pub fn spawn(mirror: StateMirror) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<FdbEvent>();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                mirror.apply(&event);
            }
            debug!("State mirror writer stopped");
        });
        (Self { tx }, handle)
    }
}

impl FdbObserver for QueuedStateWriter {
    fn on_fdb_event(&self, event: &FdbEvent) {
        if self.tx.send(event.clone()).is_err() {
            warn!("State mirror writer is gone, dropping update");
        }
    }
}
