//! CRM types for the FDB entry resource.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

/// Maximum number of exceeded messages before rate limiting.
pub const CRM_EXCEEDED_MSG_MAX: u32 = 10;

/// Default low threshold percentage.
pub const DEFAULT_LOW_THRESHOLD: u32 = 70;

/// Default high threshold percentage.
pub const DEFAULT_HIGH_THRESHOLD: u32 = 85;

/// Default polling interval in seconds (5 minutes).
pub const DEFAULT_POLLING_INTERVAL: u64 = 5 * 60;

/// COUNTERS_DB key holding switch-global CRM counters.
pub const CRM_COUNTERS_TABLE_KEY: &str = "CRM:STATS";

pub const CRM_FDB_ENTRY_USED: &str = "crm_stats_fdb_entry_used";
pub const CRM_FDB_ENTRY_AVAILABLE: &str = "crm_stats_fdb_entry_available";

/// Number of FDB entries consuming hardware capacity.
///
/// `used` has a single writer, the FDB table's mutation path; telemetry only
/// reads it. `available` is refreshed from the switch on every CRM poll.
#[derive(Debug, Default)]
pub struct FdbResourceCounter {
    used: AtomicU32,
    available: AtomicU32,
}

impl FdbResourceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> u32 {
        self.used.load(Ordering::Acquire)
    }

    pub fn available(&self) -> u32 {
        self.available.load(Ordering::Acquire)
    }

    pub(crate) fn set_used(&self, used: u32) {
        self.used.store(used, Ordering::Release);
    }

    pub(crate) fn set_available(&self, available: u32) {
        self.available.store(available, Ordering::Release);
    }

    pub fn utilization_percent(&self) -> u32 {
        let used = u64::from(self.value());
        let total = used + u64::from(self.available());
        if total == 0 {
            0
        } else {
            (used * 100 / total) as u32
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrmThresholdType {
    #[default]
    Percentage,
    Used,
    Free,
}

impl CrmThresholdType {
    pub fn config_value(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Used => "used",
            Self::Free => "free",
        }
    }
}

impl FromStr for CrmThresholdType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "percentage" => Ok(Self::Percentage),
            "used" => Ok(Self::Used),
            "free" => Ok(Self::Free),
            _ => Err(format!("Unknown threshold type: {}", s)),
        }
    }
}

impl fmt::Display for CrmThresholdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.config_value())
    }
}

/// Result of threshold check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdCheck {
    Normal,
    Exceeded { utilization: u32, threshold: u32 },
    Recovered { utilization: u32, threshold: u32 },
}

/// Threshold configuration and exceeded-log state for the FDB resource.
#[derive(Debug, Clone)]
pub struct CrmThresholds {
    pub threshold_type: CrmThresholdType,
    pub low: u32,
    pub high: u32,
    exceeded_log_count: u32,
}

impl Default for CrmThresholds {
    fn default() -> Self {
        Self::new(
            CrmThresholdType::Percentage,
            DEFAULT_LOW_THRESHOLD,
            DEFAULT_HIGH_THRESHOLD,
        )
    }
}

impl CrmThresholds {
    pub fn new(threshold_type: CrmThresholdType, low: u32, high: u32) -> Self {
        Self {
            threshold_type,
            low,
            high,
            exceeded_log_count: 0,
        }
    }

    /// Exceeded is reported at most [`CRM_EXCEEDED_MSG_MAX`] times until the
    /// value drops back to the low threshold.
    pub fn check(&mut self, used: u32, available: u32, percent: u32) -> ThresholdCheck {
        let utilization = match self.threshold_type {
            CrmThresholdType::Percentage => percent,
            CrmThresholdType::Used => used,
            CrmThresholdType::Free => available,
        };

        if utilization >= self.high && self.exceeded_log_count < CRM_EXCEEDED_MSG_MAX {
            self.exceeded_log_count += 1;
            ThresholdCheck::Exceeded {
                utilization,
                threshold: self.high,
            }
        } else if utilization <= self.low && self.exceeded_log_count > 0 {
            self.exceeded_log_count = 0;
            ThresholdCheck::Recovered {
                utilization,
                threshold: self.low,
            }
        } else {
            ThresholdCheck::Normal
        }
    }
}
