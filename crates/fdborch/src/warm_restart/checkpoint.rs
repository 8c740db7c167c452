//! Warm-restart checkpoint and its storage.
//!
//! The checkpoint is written at freeze time and consumed exactly once by the
//! next instance: [`CheckpointStore::take`] removes it as it loads it, so a
//! second start after a successful warm restart is a cold start.

use crate::error::{FdbSyncError, Result};
use crate::fdb::FdbEntry;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sonic_sai::FdbLearningMode;
use sonic_types::VlanId;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const CHECKPOINT_VERSION: u32 = 1;

/// Default checkpoint location.
pub const DEFAULT_CHECKPOINT_PATH: &str = "/var/lib/sonic/fdborch/fdb_checkpoint.json";

/// FDB state carried across a warm restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub taken_at: DateTime<Utc>,
    /// Ordered by key.
    pub entries: Vec<FdbEntry>,
    /// Learning mode of each port when the freeze began.
    pub learn_modes: BTreeMap<String, FdbLearningMode>,
    /// Resource counter value at freeze time.
    pub resource_count: u32,
    /// Bridge domains that had member ports at freeze time.
    pub bridge_domains: BTreeSet<VlanId>,
}

impl Checkpoint {
    pub fn new(
        entries: Vec<FdbEntry>,
        learn_modes: BTreeMap<String, FdbLearningMode>,
        resource_count: u32,
        bridge_domains: BTreeSet<VlanId>,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            taken_at: Utc::now(),
            entries,
            learn_modes,
            resource_count,
            bridge_domains,
        }
    }

    /// Rejects checkpoints this build cannot use.
    pub fn validate(&self) -> Result<()> {
        if self.version != CHECKPOINT_VERSION {
            return Err(FdbSyncError::CheckpointUnavailable(format!(
                "unsupported checkpoint version {}",
                self.version
            )));
        }
        let mut seen = HashSet::new();
        for entry in &self.entries {
            if !seen.insert(entry.key) {
                return Err(FdbSyncError::DuplicateKeyViolation(entry.key.to_string()));
            }
        }
        Ok(())
    }
}

/// Durable-enough storage for one checkpoint.
pub trait CheckpointStore: Send + Sync {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Loads and removes the checkpoint.
    fn take(&self) -> Result<Checkpoint>;

    fn exists(&self) -> bool;

    /// Removes any checkpoint; absent is not an error.
    fn discard(&self) -> Result<()>;
}

/// JSON file written through a temp file and rename, so a crash mid-write
/// never leaves a truncated checkpoint behind.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(checkpoint)?;
        let tmp = self.tmp_path();
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        info!(
            path = %self.path.display(),
            entries = checkpoint.entries.len(),
            "Checkpoint saved"
        );
        Ok(())
    }

    fn take(&self) -> Result<Checkpoint> {
        let json = fs::read_to_string(&self.path).map_err(|e| {
            FdbSyncError::CheckpointUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        // Removed before parsing: a corrupt checkpoint is consumed too.
        fs::remove_file(&self.path)?;

        let checkpoint: Checkpoint = serde_json::from_str(&json).map_err(|e| {
            FdbSyncError::CheckpointUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        checkpoint.validate()?;
        debug!(path = %self.path.display(), entries = checkpoint.entries.len(), "Checkpoint loaded");
        Ok(checkpoint)
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn discard(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store. Clones share the slot, so a checkpoint saved by one
/// engine instance can be taken by the next one in the same process.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    slot: Arc<Mutex<Option<Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        *self.slot.lock() = Some(checkpoint.clone());
        Ok(())
    }

    fn take(&self) -> Result<Checkpoint> {
        let checkpoint = self
            .slot
            .lock()
            .take()
            .ok_or_else(|| FdbSyncError::CheckpointUnavailable("no checkpoint saved".to_string()))?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    fn exists(&self) -> bool {
        self.slot.lock().is_some()
    }

    fn discard(&self) -> Result<()> {
        self.slot.lock().take();
        Ok(())
    }
}
