use crate::error::{GirderError, Result};

#[derive(Debug, Clone)]
pub struct GirderConfig {
    pub sweep_interval_secs: u64,
    pub startup_sweep_delay_secs: u64,
    pub stall_threshold_secs: i64,
    pub session_save_retries: u32,
    pub aggregation_debounce_ms: u64,
    pub aggregation_max_attempts: u32,
    pub aggregation_backoff_base_ms: u64,
    pub aggregation_backoff_max_ms: u64,
    pub completed_task_retention_secs: i64,
    pub completed_task_retention_count: usize,
    pub failed_task_retention_secs: i64,
}

impl Default for GirderConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            startup_sweep_delay_secs: 5,
            stall_threshold_secs: 120,
            session_save_retries: 3,
            aggregation_debounce_ms: 5000,
            aggregation_max_attempts: 3,
            aggregation_backoff_base_ms: 1000,
            aggregation_backoff_max_ms: 60000,
            completed_task_retention_secs: 300,
            completed_task_retention_count: 100,
            failed_task_retention_secs: 3600,
        }
    }
}

impl GirderConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(interval) = std::env::var("GIRDER_SWEEP_INTERVAL_SECS") {
            config.sweep_interval_secs = interval.parse().map_err(|e| {
                GirderError::ConfigurationError(format!("Invalid sweep_interval_secs: {e}"))
            })?;
        }

        if let Ok(threshold) = std::env::var("GIRDER_STALL_THRESHOLD_SECS") {
            config.stall_threshold_secs = threshold.parse().map_err(|e| {
                GirderError::ConfigurationError(format!("Invalid stall_threshold_secs: {e}"))
            })?;
        }

        if let Ok(debounce) = std::env::var("GIRDER_AGGREGATION_DEBOUNCE_MS") {
            config.aggregation_debounce_ms = debounce.parse().map_err(|e| {
                GirderError::ConfigurationError(format!("Invalid aggregation_debounce_ms: {e}"))
            })?;
        }

        if let Ok(attempts) = std::env::var("GIRDER_AGGREGATION_MAX_ATTEMPTS") {
            config.aggregation_max_attempts = attempts.parse().map_err(|e| {
                GirderError::ConfigurationError(format!("Invalid aggregation_max_attempts: {e}"))
            })?;
        }

        Ok(config)
    }
}
