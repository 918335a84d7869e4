//! Configuration module for replicore.
//!
//! All tunables are injected through [`ReplicoreConfig`] rather than read
//! from ambient global state, so the core stays testable without
//! process-wide setup.

use crate::error::{ReplicoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for the reconciliation core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicoreConfig {
    /// Replication and reconciliation tunables.
    pub replication: ReplicationConfig,
    /// Observability configuration.
    pub observability: ObservabilityConfig,
}

impl ReplicoreConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ReplicoreError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ReplicoreError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        self.replication.validate()
    }

    /// Create a minimal development configuration.
    pub fn development() -> Self {
        Self {
            replication: ReplicationConfig {
                max_container_size: 256 * 1024 * 1024,
                node_inflight_limit: 4,
                pending_op_timeout: Duration::from_secs(30),
                push_replication: true,
                min_healthy_for_maintenance: 1,
            },
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Replication and reconciliation tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Configured maximum container size in bytes. Used as the free-space
    /// hint for placement so targets can hold a full container even while
    /// usage is still growing.
    pub max_container_size: u64,
    /// Maximum in-flight reconciliation commands per target node.
    pub node_inflight_limit: usize,
    /// How long a pending add/delete may remain unconfirmed before it is
    /// dropped.
    #[serde(with = "humantime_serde")]
    pub pending_op_timeout: Duration,
    /// Replication transfer mode for the whole cluster: sources push to
    /// targets when true, targets pull from sources when false. Mixing
    /// modes per call is not supported.
    pub push_replication: bool,
    /// Healthy replicas that must remain available while nodes holding
    /// other copies are in maintenance.
    pub min_healthy_for_maintenance: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_container_size: 5 * 1024 * 1024 * 1024, // 5GB
            node_inflight_limit: 20,
            pending_op_timeout: Duration::from_secs(10 * 60),
            push_replication: true,
            min_healthy_for_maintenance: 2,
        }
    }
}

impl ReplicationConfig {
    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_container_size == 0 {
            return Err(ReplicoreError::InvalidConfig {
                field: "replication.max_container_size".to_string(),
                reason: "Maximum container size must be non-zero".to_string(),
            });
        }

        if self.node_inflight_limit == 0 {
            return Err(ReplicoreError::InvalidConfig {
                field: "replication.node_inflight_limit".to_string(),
                reason: "In-flight command limit must be non-zero".to_string(),
            });
        }

        if self.pending_op_timeout < Duration::from_secs(1) {
            return Err(ReplicoreError::InvalidConfig {
                field: "replication.pending_op_timeout".to_string(),
                reason: "Pending op timeout must be at least one second".to_string(),
            });
        }

        Ok(())
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics.
    pub metrics_enabled: bool,
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(m) = s.strip_suffix('m') {
            m.parse::<u64>()
                .map(|v| Duration::from_secs(v * 60))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}
