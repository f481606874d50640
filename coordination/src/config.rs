//! Swarm configuration
//!
//! Thresholds, timeouts and capacities for every coordination component.
//! Values come from [`SwarmConfig::default`], optionally overridden by a TOML
//! file and then by `SWARM_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level swarm configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Registration is refused beyond this many workers
    pub max_workers: usize,
    /// Similarity above which two workers get a communication link
    pub similarity_threshold: f64,
    /// Weight of links created by connectivity repair
    pub repair_link_weight: f64,
    /// Capability a worker needs before it bids
    pub bid_threshold: f64,
    /// Upper bound on bid collection per auction
    pub bid_timeout_ms: u64,
    /// Upper bound on a single execution unit
    pub execution_timeout_ms: u64,
    /// Accepting-confidence ratio (and quorum fraction) for consensus
    pub consensus_threshold: f64,
    /// Proposals still active after this long are failed by the sweeper
    pub consensus_deadline_ms: u64,
    /// How often the background sweeper checks for expired proposals
    pub consensus_sweep_interval_ms: u64,
    /// Mean confidence a task must exceed to count as emergent
    pub emergence_confidence: f64,
    /// Required improvement over the individual baseline
    pub emergence_factor: f64,
    /// Messages retained for diagnostics/replay
    pub history_capacity: usize,
    /// Per-worker mailbox depth; deliveries beyond it are dropped
    pub mailbox_capacity: usize,
    /// Routing queue depth; publishes beyond it are dropped
    pub queue_capacity: usize,
    /// Bounded idle wait of the bus router loop
    pub bus_idle_poll_ms: u64,
    /// Finished tasks retained in the archive
    pub archive_capacity: usize,
    /// Restructure links when collective intelligence falls below this
    pub restructure_threshold: f64,
    /// Workers whose mean metric is below this get their role re-evaluated
    pub reassign_threshold: f64,
    /// Run the load balancer after every task cycle
    pub auto_rebalance: bool,
    /// Seed for the default heuristics; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_workers: 100,
            similarity_threshold: 0.7,
            repair_link_weight: 0.5,
            bid_threshold: 0.5,
            bid_timeout_ms: 500,
            execution_timeout_ms: 30_000,
            consensus_threshold: 0.67,
            consensus_deadline_ms: 30_000,
            consensus_sweep_interval_ms: 1_000,
            emergence_confidence: 0.9,
            emergence_factor: 1.2,
            history_capacity: 10_000,
            mailbox_capacity: 256,
            queue_capacity: 4_096,
            bus_idle_poll_ms: 1_000,
            archive_capacity: 1_000,
            restructure_threshold: 0.7,
            reassign_threshold: 0.6,
            auto_rebalance: true,
            seed: None,
        }
    }
}

impl SwarmConfig {
    /// Defaults overridden by `SWARM_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(n) = env_parse("SWARM_MAX_WORKERS") {
            self.max_workers = n;
        }
        if let Some(ms) = env_parse("SWARM_BID_TIMEOUT_MS") {
            self.bid_timeout_ms = ms;
        }
        if let Some(ms) = env_parse("SWARM_EXECUTION_TIMEOUT_MS") {
            self.execution_timeout_ms = ms;
        }
        if let Some(ms) = env_parse("SWARM_CONSENSUS_DEADLINE_MS") {
            self.consensus_deadline_ms = ms;
        }
        if let Some(n) = env_parse("SWARM_HISTORY_CAPACITY") {
            self.history_capacity = n;
        }
        if let Some(n) = env_parse("SWARM_QUEUE_CAPACITY") {
            self.queue_capacity = n;
        }
        if let Some(seed) = env_parse("SWARM_SEED") {
            self.seed = Some(seed);
        }
        if let Ok(val) = std::env::var("SWARM_AUTO_REBALANCE") {
            self.auto_rebalance = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Reject thresholds outside [0, 1] and zero capacities
    pub fn validate(&self) -> ConfigResult<()> {
        let unit_fields = [
            ("similarity_threshold", self.similarity_threshold),
            ("bid_threshold", self.bid_threshold),
            ("consensus_threshold", self.consensus_threshold),
            ("emergence_confidence", self.emergence_confidence),
            ("restructure_threshold", self.restructure_threshold),
            ("reassign_threshold", self.reassign_threshold),
        ];
        for (field, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} is outside [0, 1]"),
                });
            }
        }
        if !(self.repair_link_weight > 0.0 && self.repair_link_weight <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "repair_link_weight",
                reason: format!("{} is outside (0, 1]", self.repair_link_weight),
            });
        }
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "max_workers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "mailbox_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "queue_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn bid_timeout(&self) -> Duration {
        Duration::from_millis(self.bid_timeout_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn consensus_deadline(&self) -> Duration {
        Duration::from_millis(self.consensus_deadline_ms)
    }

    pub fn consensus_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.consensus_sweep_interval_ms.max(1))
    }

    pub fn bus_idle_poll(&self) -> Duration {
        Duration::from_millis(self.bus_idle_poll_ms.max(1))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = SwarmConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.consensus_threshold, 0.67);
        assert_eq!(config.history_capacity, 10_000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SwarmConfig::from_toml_str(
            r#"
            max_workers = 8
            seed = 42
            "#,
        )
        .unwrap();

        assert_eq!(config.max_workers, 8);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.similarity_threshold, 0.7);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let err = SwarmConfig::from_toml_str("bid_threshold = 1.5").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "bid_threshold",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        let err = SwarmConfig::from_toml_str("queue_capacity = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "queue_capacity",
                ..
            }
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "consensus_deadline_ms = 250").unwrap();

        let config = SwarmConfig::from_file(file.path()).unwrap();
        assert_eq!(config.consensus_deadline(), Duration::from_millis(250));
    }
}
