//! Engine configuration
//!
//! [`SrcrConfig`] carries every tunable of the protocol. It is plain data:
//! hosts build it in code or deserialize it from their own config files,
//! then hand it to the engine builder, which only rejects values that
//! would make the engine unusable. [`SrcrConfig::validate`] reports
//! settings that work but are probably not what the operator wanted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use srcr_core::MAX_WIRE_HOPS;

use crate::error::ConfigError;

/// Configuration for one SRCR engine instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SrcrConfig {
    /// Seen Table capacity before FIFO eviction
    pub max_seen: usize,
    /// Maximum links a query may traverse
    pub max_hops: usize,
    /// Aggregation window between the first copy of a query and its flood
    pub query_wait: Duration,
    /// Minimum time before discovery for the same destination is retried
    pub query_retry_interval: Duration,
    /// How long a failed neighbor stays blacklisted
    pub black_list_timeout: Duration,
    /// Black List capacity before the oldest entry is evicted
    pub max_black_list: usize,
    /// Path Table capacity before the oldest learned path is evicted
    pub max_paths: usize,
    /// Delay route switches until the incumbent has been held long enough
    pub route_dampening: bool,
    /// Minimum time an incumbent path is held before a better one may replace it
    pub time_before_switch: Duration,
    /// Period of the query flush timer
    pub flush_interval: Duration,
    /// Period of exploration queries towards random neighbors (disabled if `None`)
    pub explore_interval: Option<Duration>,
}

impl Default for SrcrConfig {
    fn default() -> Self {
        Self {
            max_seen: 100,
            max_hops: 10,
            query_wait: Duration::from_millis(100),
            query_retry_interval: Duration::from_secs(5),
            black_list_timeout: Duration::from_secs(60),
            max_black_list: 256,
            max_paths: 1024,
            route_dampening: true,
            time_before_switch: Duration::from_secs(10),
            flush_interval: Duration::from_millis(50),
            explore_interval: None,
        }
    }
}

impl SrcrConfig {
    /// Create a config for dense meshes
    ///
    /// Many overlapping floods: a bigger Seen Table, a longer aggregation
    /// window to collect better copies, and a tighter hop limit.
    pub fn dense_mesh() -> Self {
        Self {
            max_seen: 512,
            max_hops: 6,
            query_wait: Duration::from_millis(250),
            query_retry_interval: Duration::from_secs(10),
            black_list_timeout: Duration::from_secs(30),
            max_black_list: 512,
            max_paths: 4096,
            route_dampening: true,
            time_before_switch: Duration::from_secs(20),
            flush_interval: Duration::from_millis(50),
            explore_interval: None,
        }
    }

    /// Create a config for sparse, long chains
    ///
    /// Few duplicates to wait for, long paths, and periodic exploration to
    /// keep link metrics fresh.
    pub fn sparse_mesh() -> Self {
        Self {
            max_seen: 64,
            max_hops: 16,
            query_wait: Duration::from_millis(50),
            query_retry_interval: Duration::from_secs(3),
            black_list_timeout: Duration::from_secs(90),
            max_black_list: 64,
            max_paths: 256,
            route_dampening: true,
            time_before_switch: Duration::from_secs(5),
            flush_interval: Duration::from_millis(25),
            explore_interval: Some(Duration::from_secs(30)),
        }
    }

    /// Reject values the engine cannot run with
    pub fn check(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_seen", self.max_seen),
            ("max_hops", self.max_hops),
            ("max_black_list", self.max_black_list),
            ("max_paths", self.max_paths),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be at least 1".into(),
                });
            }
        }
        if self.max_hops >= MAX_WIRE_HOPS {
            return Err(ConfigError::InvalidValue {
                field: "max_hops",
                reason: format!("must be below {}", MAX_WIRE_HOPS),
            });
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "flush_interval",
                reason: "must be non-zero".into(),
            });
        }
        Ok(())
    }

    /// Validate configuration invariants
    ///
    /// Returns a list of warnings if the configuration has potential issues.
    /// An empty list means the configuration is sound.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.query_wait >= self.query_retry_interval {
            warnings.push(ConfigWarning::QueryWaitExceedsRetry);
        }

        // The flush can only commit a record on a timer tick
        if self.flush_interval > self.query_wait {
            warnings.push(ConfigWarning::FlushCoarserThanQueryWait);
        }

        if self.max_seen < 16 {
            warnings.push(ConfigWarning::SmallSeenTable);
        }

        if self.black_list_timeout.is_zero() {
            warnings.push(ConfigWarning::BlackListDisabled);
        }

        if !self.route_dampening && !self.time_before_switch.is_zero() {
            warnings.push(ConfigWarning::SwitchDelayIgnored);
        }

        if let Some(interval) = self.explore_interval
            && interval < self.query_retry_interval
        {
            warnings.push(ConfigWarning::ExploreFasterThanRetry);
        }

        warnings
    }

    /// Check if the configuration has no warnings
    pub fn is_valid(&self) -> bool {
        self.check().is_ok() && self.validate().is_empty()
    }
}

/// Configuration warnings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Aggregation window is as long as the retry interval
    QueryWaitExceedsRetry,
    /// Flush period is longer than the aggregation window
    FlushCoarserThanQueryWait,
    /// Seen Table is small (< 16): parallel floods evict each other
    SmallSeenTable,
    /// Zero blacklist timeout: failed neighbors are never suppressed
    BlackListDisabled,
    /// `time_before_switch` is set but dampening is off
    SwitchDelayIgnored,
    /// Exploration fires faster than discovery retries are allowed
    ExploreFasterThanRetry,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::QueryWaitExceedsRetry => {
                write!(f, "query_wait is not shorter than query_retry_interval")
            }
            ConfigWarning::FlushCoarserThanQueryWait => {
                write!(f, "flush_interval is longer than query_wait")
            }
            ConfigWarning::SmallSeenTable => write!(f, "max_seen is very small (< 16)"),
            ConfigWarning::BlackListDisabled => write!(f, "black_list_timeout is zero"),
            ConfigWarning::SwitchDelayIgnored => {
                write!(f, "time_before_switch has no effect without route_dampening")
            }
            ConfigWarning::ExploreFasterThanRetry => {
                write!(f, "explore_interval is shorter than query_retry_interval")
            }
        }
    }
}
