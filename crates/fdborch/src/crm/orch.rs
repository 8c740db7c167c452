//! CrmOrch implementation for the FDB entry resource.

use std::sync::Arc;
use std::time::Duration;

use sonic_sai::SwitchApi;
use tracing::{debug, info, warn};

use super::types::{
    CrmThresholdType, CrmThresholds, FdbResourceCounter, ThresholdCheck, CRM_COUNTERS_TABLE_KEY,
    CRM_FDB_ENTRY_AVAILABLE, CRM_FDB_ENTRY_USED, DEFAULT_POLLING_INTERVAL,
};
use crate::state::Table;

/// CRM orchestrator error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrmOrchError {
    /// Invalid threshold value.
    InvalidThreshold(String),
    /// Parse error.
    ParseError(String),
}

impl std::fmt::Display for CrmOrchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidThreshold(msg) => write!(f, "Invalid threshold: {}", msg),
            Self::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for CrmOrchError {}

/// CRM orchestrator configuration.
#[derive(Debug, Clone)]
pub struct CrmOrchConfig {
    /// Polling interval for resource monitoring.
    pub polling_interval: Duration,
    pub thresholds: CrmThresholds,
}

impl Default for CrmOrchConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(DEFAULT_POLLING_INTERVAL),
            thresholds: CrmThresholds::default(),
        }
    }
}

/// CRM orchestrator statistics.
#[derive(Debug, Clone, Default)]
pub struct CrmOrchStats {
    /// Number of timer expirations processed.
    pub timer_expirations: u64,
    /// Number of threshold exceeded events published.
    pub threshold_events: u64,
    /// Number of threshold clear events published.
    pub threshold_clears: u64,
    /// Number of configuration updates processed.
    pub config_updates: u64,
    /// Number of failed availability queries.
    pub query_failures: u64,
}

/// Polls FDB capacity and publishes it to COUNTERS_DB.
///
/// CrmOrch only reads the `used` half of the counter; the FDB table owns it.
pub struct CrmOrch {
    config: CrmOrchConfig,
    counter: Arc<FdbResourceCounter>,
    switch_api: Arc<dyn SwitchApi>,
    /// COUNTERS_DB `CRM` table.
    counters: Table,
    stats: CrmOrchStats,
}

impl std::fmt::Debug for CrmOrch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrmOrch")
            .field("config", &self.config)
            .field("used", &self.counter.value())
            .field("available", &self.counter.available())
            .field("stats", &self.stats)
            .finish()
    }
}

impl CrmOrch {
    pub fn new(
        config: CrmOrchConfig,
        counter: Arc<FdbResourceCounter>,
        switch_api: Arc<dyn SwitchApi>,
        counters: Table,
    ) -> Self {
        Self {
            config,
            counter,
            switch_api,
            counters,
            stats: CrmOrchStats::default(),
        }
    }

    pub fn config(&self) -> &CrmOrchConfig {
        &self.config
    }

    pub fn polling_interval(&self) -> Duration {
        self.config.polling_interval
    }

    /// Changes the polling interval. Zero is rejected.
    pub fn set_polling_interval(&mut self, interval: Duration) -> Result<(), CrmOrchError> {
        if interval.is_zero() {
            return Err(CrmOrchError::InvalidThreshold(
                "polling interval must be non-zero".to_string(),
            ));
        }
        self.config.polling_interval = interval;
        self.stats.config_updates += 1;
        Ok(())
    }

    pub fn stats(&self) -> &CrmOrchStats {
        &self.stats
    }

    pub fn counter(&self) -> &Arc<FdbResourceCounter> {
        &self.counter
    }

    // ========== Configuration Operations ==========

    pub fn set_threshold_type(&mut self, threshold_type: CrmThresholdType) {
        self.config.thresholds.threshold_type = threshold_type;
        self.stats.config_updates += 1;
    }

    pub fn set_low_threshold(&mut self, value: u32) -> Result<(), CrmOrchError> {
        if value > self.config.thresholds.high {
            return Err(CrmOrchError::InvalidThreshold(format!(
                "low {} above high {}",
                value, self.config.thresholds.high
            )));
        }
        self.config.thresholds.low = value;
        self.stats.config_updates += 1;
        Ok(())
    }

    pub fn set_high_threshold(&mut self, value: u32) -> Result<(), CrmOrchError> {
        if value < self.config.thresholds.low {
            return Err(CrmOrchError::InvalidThreshold(format!(
                "high {} below low {}",
                value, self.config.thresholds.low
            )));
        }
        self.config.thresholds.high = value;
        self.stats.config_updates += 1;
        Ok(())
    }

    /// Handles a `CONFIG_DB` `CRM|Config` field update.
    pub fn handle_config_field(&mut self, field: &str, value: &str) -> Result<(), CrmOrchError> {
        let parse_u32 = |value: &str| {
            value
                .parse::<u32>()
                .map_err(|_| CrmOrchError::ParseError(format!("Invalid value: {}", value)))
        };

        match field {
            "polling_interval" => {
                let interval: u64 = value
                    .parse()
                    .map_err(|_| CrmOrchError::ParseError(format!("Invalid interval: {}", value)))?;
                self.set_polling_interval(Duration::from_secs(interval))?;
            }
            "fdb_entry_threshold_type" => {
                let threshold_type: CrmThresholdType =
                    value.parse().map_err(CrmOrchError::ParseError)?;
                self.set_threshold_type(threshold_type);
            }
            "fdb_entry_low_threshold" => self.set_low_threshold(parse_u32(value)?)?,
            "fdb_entry_high_threshold" => self.set_high_threshold(parse_u32(value)?)?,
            _ => return Err(CrmOrchError::ParseError(format!("Unknown field: {}", field))),
        }
        Ok(())
    }

    // ========== Timer/Polling Operations ==========

    /// Handles timer expiration - queries SAI, updates counters, checks thresholds.
    pub fn handle_timer_expiration(&mut self) {
        self.stats.timer_expirations += 1;

        self.get_resource_available_counters();
        self.update_counters_table();
        self.check_thresholds();
    }

    fn get_resource_available_counters(&mut self) {
        match self.switch_api.available_fdb_entries() {
            Ok(available) => self.counter.set_available(available),
            Err(e) => {
                self.stats.query_failures += 1;
                debug!(error = %e, "Failed to query available FDB entries");
            }
        }
    }

    fn update_counters_table(&self) {
        self.counters.hset(
            CRM_COUNTERS_TABLE_KEY,
            [
                (CRM_FDB_ENTRY_USED, self.counter.value().to_string()),
                (CRM_FDB_ENTRY_AVAILABLE, self.counter.available().to_string()),
            ],
        );
    }

    fn check_thresholds(&mut self) {
        let used = self.counter.value();
        let available = self.counter.available();
        if used == 0 && available == 0 {
            return;
        }

        let percent = self.counter.utilization_percent();
        let threshold_type = self.config.thresholds.threshold_type;
        match self.config.thresholds.check(used, available, percent) {
            ThresholdCheck::Exceeded { utilization, threshold } => {
                self.stats.threshold_events += 1;
                warn!(
                    resource = "FDB_ENTRY",
                    %threshold_type,
                    utilization,
                    threshold,
                    used,
                    available,
                    "THRESHOLD_EXCEEDED"
                );
            }
            ThresholdCheck::Recovered { utilization, threshold } => {
                self.stats.threshold_clears += 1;
                info!(
                    resource = "FDB_ENTRY",
                    %threshold_type,
                    utilization,
                    threshold,
                    used,
                    available,
                    "THRESHOLD_CLEAR"
                );
            }
            ThresholdCheck::Normal => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::COUNTERS_CRM_TABLE_NAME;
    use pretty_assertions::assert_eq;
    use sonic_sai::{SaiError, SaiResult, SaiStatus};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedSwitch(AtomicU32);

    impl SwitchApi for FixedSwitch {
        fn available_fdb_entries(&self) -> SaiResult<u32> {
            match self.0.load(Ordering::SeqCst) {
                u32::MAX => Err(SaiError::from_status(SaiStatus::Failure)),
                n => Ok(n),
            }
        }
    }

    fn make_orch(available: u32) -> (CrmOrch, Arc<FdbResourceCounter>, Table) {
        let counter = Arc::new(FdbResourceCounter::new());
        let table = Table::new(COUNTERS_CRM_TABLE_NAME);
        let orch = CrmOrch::new(
            CrmOrchConfig::default(),
            Arc::clone(&counter),
            Arc::new(FixedSwitch(AtomicU32::new(available))),
            table.clone(),
        );
        (orch, counter, table)
    }

    #[test]
    fn test_timer_publishes_counters() {
        let (mut orch, counter, table) = make_orch(998);
        counter.set_used(2);

        orch.handle_timer_expiration();

        assert_eq!(orch.stats().timer_expirations, 1);
        assert_eq!(
            table.hget(CRM_COUNTERS_TABLE_KEY, CRM_FDB_ENTRY_USED).as_deref(),
            Some("2")
        );
        assert_eq!(
            table.hget(CRM_COUNTERS_TABLE_KEY, CRM_FDB_ENTRY_AVAILABLE).as_deref(),
            Some("998")
        );
    }

    #[test]
    fn test_query_failure_keeps_last_available() {
        let (mut orch, counter, _table) = make_orch(u32::MAX);
        counter.set_available(10);

        orch.handle_timer_expiration();

        assert_eq!(orch.stats().query_failures, 1);
        assert_eq!(counter.available(), 10);
    }

    #[test]
    fn test_threshold_events() {
        let (mut orch, counter, _table) = make_orch(10);

        counter.set_used(90);
        orch.handle_timer_expiration();
        assert_eq!(orch.stats().threshold_events, 1);
        assert_eq!(orch.stats().threshold_clears, 0);

        counter.set_used(5);
        orch.handle_timer_expiration();
        assert_eq!(orch.stats().threshold_events, 1);
        assert_eq!(orch.stats().threshold_clears, 1);
    }

    #[test]
    fn test_handle_config_field() {
        let (mut orch, _counter, _table) = make_orch(0);

        orch.handle_config_field("polling_interval", "60").unwrap();
        assert_eq!(orch.polling_interval(), Duration::from_secs(60));

        orch.handle_config_field("fdb_entry_threshold_type", "used").unwrap();
        orch.handle_config_field("fdb_entry_high_threshold", "900").unwrap();
        orch.handle_config_field("fdb_entry_low_threshold", "800").unwrap();
        assert_eq!(orch.config().thresholds.threshold_type, CrmThresholdType::Used);
        assert_eq!(orch.config().thresholds.high, 900);
        assert_eq!(orch.config().thresholds.low, 800);
        assert_eq!(orch.stats().config_updates, 4);
    }

    #[test]
    fn test_handle_config_field_errors() {
        let (mut orch, _counter, _table) = make_orch(0);

        assert!(matches!(
            orch.handle_config_field("polling_interval", "soon"),
            Err(CrmOrchError::ParseError(_))
        ));
        assert!(matches!(
            orch.handle_config_field("polling_interval", "0"),
            Err(CrmOrchError::InvalidThreshold(_))
        ));
        assert_eq!(orch.polling_interval(), Duration::from_secs(DEFAULT_POLLING_INTERVAL));
        assert_eq!(orch.stats().config_updates, 0);
        assert!(matches!(
            orch.handle_config_field("ipv4_route_low_threshold", "10"),
            Err(CrmOrchError::ParseError(_))
        ));
        assert!(matches!(
            orch.handle_config_field("fdb_entry_low_threshold", "99"),
            Err(CrmOrchError::InvalidThreshold(_))
        ));
    }
}
