//! Tracer configuration
//!
//! [`TracerConfig`] is the static, serializable form (loaded from TOML).
//! [`Thresholds`] is the live form shared by the engine and every assembler;
//! each field is an atomic so operators can retune a running tracer.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

pub const DEFAULT_MAX_TRACE_RECORDS: usize = 4096;
pub const DEFAULT_MIN_METHOD_TIME: u64 = 250_000;
pub const DEFAULT_MIN_TRACE_TIME: u64 = 50_000_000;
pub const DEFAULT_MIN_TRACE_CALLS: u64 = 262_144;
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Node budget of a single trace
    pub max_trace_records: usize,
    /// Frames shorter than this (ns) are merged into their parent
    pub min_method_time: u64,
    /// Initial minimum duration (ns) of a top-level trace
    pub min_trace_time: u64,
    /// Traces with at least this many calls are submitted regardless of duration
    pub min_trace_calls: u64,
    /// Elide interim frames in every trace
    pub drop_interim: bool,
    /// Idle nodes kept per thread for reuse
    pub pool_capacity: usize,
}

impl Default for TracerConfig {
    fn default() -> Self {
        TracerConfig {
            max_trace_records: DEFAULT_MAX_TRACE_RECORDS,
            min_method_time: DEFAULT_MIN_METHOD_TIME,
            min_trace_time: DEFAULT_MIN_TRACE_TIME,
            min_trace_calls: DEFAULT_MIN_TRACE_CALLS,
            drop_interim: false,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

impl TracerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: TracerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_trace_records == 0 {
            return Err(ConfigError::Invalid(
                "max_trace_records must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Runtime-tunable thresholds, read on every event with relaxed ordering.
#[derive(Debug)]
pub struct Thresholds {
    max_trace_records: AtomicUsize,
    min_method_time: AtomicU64,
    min_trace_time: AtomicU64,
    min_trace_calls: AtomicU64,
    drop_interim: AtomicBool,
}

impl Thresholds {
    pub fn new(config: &TracerConfig) -> Self {
        Thresholds {
            max_trace_records: AtomicUsize::new(config.max_trace_records),
            min_method_time: AtomicU64::new(config.min_method_time),
            min_trace_time: AtomicU64::new(config.min_trace_time),
            min_trace_calls: AtomicU64::new(config.min_trace_calls),
            drop_interim: AtomicBool::new(config.drop_interim),
        }
    }

    pub fn max_trace_records(&self) -> usize {
        self.max_trace_records.load(Ordering::Relaxed)
    }

    pub fn set_max_trace_records(&self, records: usize) {
        self.max_trace_records.store(records.max(1), Ordering::Relaxed);
    }

    pub fn min_method_time(&self) -> u64 {
        self.min_method_time.load(Ordering::Relaxed)
    }

    pub fn set_min_method_time(&self, nanos: u64) {
        self.min_method_time.store(nanos, Ordering::Relaxed);
    }

    pub fn min_trace_time(&self) -> u64 {
        self.min_trace_time.load(Ordering::Relaxed)
    }

    pub fn set_min_trace_time(&self, nanos: u64) {
        self.min_trace_time.store(nanos, Ordering::Relaxed);
    }

    pub fn min_trace_calls(&self) -> u64 {
        self.min_trace_calls.load(Ordering::Relaxed)
    }

    pub fn set_min_trace_calls(&self, calls: u64) {
        self.min_trace_calls.store(calls, Ordering::Relaxed);
    }

    pub fn drop_interim(&self) -> bool {
        self.drop_interim.load(Ordering::Relaxed)
    }

    pub fn set_drop_interim(&self, enabled: bool) {
        self.drop_interim.store(enabled, Ordering::Relaxed);
    }

    /// Snapshot the current values back into a config.
    pub fn to_config(&self, pool_capacity: usize) -> TracerConfig {
        TracerConfig {
            max_trace_records: self.max_trace_records(),
            min_method_time: self.min_method_time(),
            min_trace_time: self.min_trace_time(),
            min_trace_calls: self.min_trace_calls(),
            drop_interim: self.drop_interim(),
            pool_capacity,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::new(&TracerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TracerConfig::default();
        assert_eq!(config.max_trace_records, 4096);
        assert_eq!(config.min_method_time, 250_000);
        assert_eq!(config.min_trace_calls, 262_144);
        assert!(!config.drop_interim);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = TracerConfig::from_toml_str(
            r#"
            min_method_time = 1000
            drop_interim = true
            "#,
        )
        .unwrap();
        assert_eq!(config.min_method_time, 1000);
        assert!(config.drop_interim);
        assert_eq!(config.max_trace_records, DEFAULT_MAX_TRACE_RECORDS);
    }

    #[test]
    fn test_zero_budget_rejected() {
        let result = TracerConfig::from_toml_str("max_trace_records = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let result = TracerConfig::from_toml_str("min_method_time = \"fast\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_thresholds_runtime_update() {
        let thresholds = Thresholds::default();
        thresholds.set_min_method_time(10);
        thresholds.set_max_trace_records(0);
        thresholds.set_drop_interim(true);

        assert_eq!(thresholds.min_method_time(), 10);
        assert_eq!(thresholds.max_trace_records(), 1);
        assert!(thresholds.drop_interim());

        let config = thresholds.to_config(16);
        assert_eq!(config.min_method_time, 10);
        assert_eq!(config.pool_capacity, 16);
    }
}
