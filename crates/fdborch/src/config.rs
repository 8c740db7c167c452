//! Configuration file support for fdborch
//!
//! Loads and validates fdborch configuration from TOML files.
//! Default location: /etc/sonic/fdborch.toml

use crate::crm::{
    CrmOrchConfig, CrmThresholdType, CrmThresholds, DEFAULT_HIGH_THRESHOLD, DEFAULT_LOW_THRESHOLD,
    DEFAULT_POLLING_INTERVAL,
};
use crate::error::{FdbSyncError, Result};
use crate::notification::DEFAULT_QUEUE_CAPACITY;
use crate::warm_restart::{
    ReconcilePolicy, WarmRestartCoordinatorConfig, DEFAULT_CHECKPOINT_PATH, DEFAULT_DRAIN_LIMIT,
    DEFAULT_RECONCILE_TIMEOUT_SECS,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/fdborch.toml";

/// FDB table behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FdbConfig {
    /// Also flush dynamic entries from the ASIC on an administrative clear
    #[serde(default = "default_true")]
    pub flush_hardware_on_clear: bool,
}

/// Hardware notification queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Notifications beyond this many queued are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Most notifications applied per drain at freeze time
    #[serde(default = "default_drain_limit")]
    pub drain_limit: usize,
}

/// Warm restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmRestartConfig {
    /// Allow freezing restart checks
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,

    /// Seconds to wait for provisioning done before reconciling anyway
    #[serde(default = "default_reconcile_timeout")]
    pub reconcile_timeout_secs: u64,

    /// Entries reconciliation may fail to explain before it gives up
    #[serde(default)]
    pub max_unexplained_entries: usize,

    /// Adopt hardware entries the checkpoint does not know about
    #[serde(default)]
    pub adopt_unknown_entries: bool,
}

/// FDB resource monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrmConfig {
    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,

    #[serde(default)]
    pub threshold_type: CrmThresholdType,

    #[serde(default = "default_low_threshold")]
    pub low_threshold: u32,

    #[serde(default = "default_high_threshold")]
    pub high_threshold: u32,
}

/// How FDB changes reach STATE_DB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateMirrorMode {
    /// Written by a background task; readers may briefly lag the table
    #[default]
    Queued,
    /// Written before the mutation returns
    Synchronous,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateMirrorConfig {
    #[serde(default)]
    pub mode: StateMirrorMode,
}

/// Complete fdborch configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FdbSyncConfig {
    #[serde(default)]
    pub fdb: FdbConfig,

    #[serde(default)]
    pub notification: NotificationConfig,

    #[serde(default)]
    pub warm_restart: WarmRestartConfig,

    #[serde(default)]
    pub crm: CrmConfig,

    #[serde(default)]
    pub state_mirror: StateMirrorConfig,

    /// Start from the previous instance's checkpoint. Set from the command
    /// line, never from the file.
    #[serde(skip)]
    pub warm_boot: bool,
}

// Default functions
fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_drain_limit() -> usize {
    DEFAULT_DRAIN_LIMIT
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from(DEFAULT_CHECKPOINT_PATH)
}

fn default_reconcile_timeout() -> u64 {
    DEFAULT_RECONCILE_TIMEOUT_SECS
}

fn default_polling_interval() -> u64 {
    DEFAULT_POLLING_INTERVAL
}

fn default_low_threshold() -> u32 {
    DEFAULT_LOW_THRESHOLD
}

fn default_high_threshold() -> u32 {
    DEFAULT_HIGH_THRESHOLD
}

// Default implementations
impl Default for FdbConfig {
    fn default() -> Self {
        Self {
            flush_hardware_on_clear: default_true(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            drain_limit: default_drain_limit(),
        }
    }
}

impl Default for WarmRestartConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            checkpoint_path: default_checkpoint_path(),
            reconcile_timeout_secs: default_reconcile_timeout(),
            max_unexplained_entries: 0,
            adopt_unknown_entries: false,
        }
    }
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            polling_interval_secs: default_polling_interval(),
            threshold_type: CrmThresholdType::default(),
            low_threshold: default_low_threshold(),
            high_threshold: default_high_threshold(),
        }
    }
}

impl FdbSyncConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config = Self::parse(&content).map_err(|e| {
                    FdbSyncError::Configuration(format!(
                        "Failed to parse config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                info!(path = %path.display(), "Loaded configuration");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(FdbSyncError::Io(e)),
        }
    }

    /// Parses and validates TOML content.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| FdbSyncError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.notification.queue_capacity == 0 {
            return Err(FdbSyncError::Configuration(
                "notification.queue_capacity must be > 0".to_string(),
            ));
        }

        if self.notification.drain_limit == 0 {
            return Err(FdbSyncError::Configuration(
                "notification.drain_limit must be > 0".to_string(),
            ));
        }

        if self.crm.polling_interval_secs == 0 {
            return Err(FdbSyncError::Configuration(
                "crm.polling_interval_secs must be > 0".to_string(),
            ));
        }

        if self.crm.low_threshold > self.crm.high_threshold {
            return Err(FdbSyncError::Configuration(format!(
                "crm.low_threshold {} exceeds crm.high_threshold {}",
                self.crm.low_threshold, self.crm.high_threshold
            )));
        }

        if self.crm.threshold_type == CrmThresholdType::Percentage && self.crm.high_threshold > 100
        {
            return Err(FdbSyncError::Configuration(
                "crm.high_threshold must be 0-100 for percentage thresholds".to_string(),
            ));
        }

        Ok(())
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.warm_restart.reconcile_timeout_secs)
    }

    pub fn crm_polling_interval(&self) -> Duration {
        Duration::from_secs(self.crm.polling_interval_secs)
    }

    pub fn reconcile_policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            max_unexplained_entries: self.warm_restart.max_unexplained_entries,
            adopt_unknown_entries: self.warm_restart.adopt_unknown_entries,
        }
    }

    pub fn coordinator_config(&self) -> WarmRestartCoordinatorConfig {
        WarmRestartCoordinatorConfig {
            enabled: self.warm_restart.enabled,
            drain_limit: self.notification.drain_limit,
            reconcile_timeout: self.reconcile_timeout(),
            policy: self.reconcile_policy(),
        }
    }

    pub fn crm_config(&self) -> CrmOrchConfig {
        CrmOrchConfig {
            polling_interval: self.crm_polling_interval(),
            thresholds: CrmThresholds::new(
                self.crm.threshold_type,
                self.crm.low_threshold,
                self.crm.high_threshold,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = FdbSyncConfig::default();
        assert!(config.fdb.flush_hardware_on_clear);
        assert_eq!(config.notification.queue_capacity, 16384);
        assert!(!config.warm_restart.enabled);
        assert_eq!(config.warm_restart.max_unexplained_entries, 0);
        assert_eq!(config.crm.polling_interval_secs, 300);
        assert_eq!(config.state_mirror.mode, StateMirrorMode::Queued);
        assert!(!config.warm_boot);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = FdbSyncConfig::parse(
            r#"
[warm_restart]
enabled = true
reconcile_timeout_secs = 5

[state_mirror]
mode = "synchronous"
"#,
        )
        .unwrap();

        assert!(config.warm_restart.enabled);
        assert_eq!(config.reconcile_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.warm_restart.checkpoint_path,
            PathBuf::from(DEFAULT_CHECKPOINT_PATH)
        );
        assert_eq!(config.state_mirror.mode, StateMirrorMode::Synchronous);
        assert_eq!(config.crm.low_threshold, 70);
    }

    #[test]
    fn test_warm_boot_not_read_from_file() {
        let config = FdbSyncConfig::parse("warm_boot = true\n").unwrap();
        assert!(!config.warm_boot);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = FdbSyncConfig::default();
        config.notification.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = FdbSyncConfig::default();
        config.crm.low_threshold = 90;
        assert!(config.validate().is_err());

        assert!(matches!(
            FdbSyncConfig::parse("[crm]\nthreshold_type = \"bogus\"\n"),
            Err(FdbSyncError::Configuration(_))
        ));
    }

    #[test]
    fn test_coordinator_config() {
        let mut config = FdbSyncConfig::default();
        config.warm_restart.enabled = true;
        config.warm_restart.adopt_unknown_entries = true;
        config.notification.drain_limit = 8;

        let wr = config.coordinator_config();
        assert!(wr.enabled);
        assert_eq!(wr.drain_limit, 8);
        assert!(wr.policy.adopt_unknown_entries);
        assert_eq!(config.crm_config().polling_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = FdbSyncConfig::load_or_default("/nonexistent/fdborch.toml").unwrap();
        assert_eq!(config, FdbSyncConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fdborch.toml");
        fs::write(&path, "[crm]\npolling_interval_secs = 10\n").unwrap();

        let config = FdbSyncConfig::load_or_default(&path).unwrap();
        assert_eq!(config.crm_polling_interval(), Duration::from_secs(10));
    }
}
