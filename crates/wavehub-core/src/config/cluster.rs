//! Distributed coordination (Redis) configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Extra seconds added to the heartbeat key TTL on top of the instance TTL,
/// so a key never expires between two successful refreshes.
const HEARTBEAT_TTL_BUFFER_SECONDS: u64 = 5;

/// Distributed coordination configuration.
///
/// When `enabled` is false the engine runs single-process and never touches
/// Redis; channels are backed by in-memory managers only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Whether distributed mode is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Redis connection settings.
    #[serde(default)]
    pub redis: RedisClusterConfig,
    /// Instance liveness TTL in seconds. Drives the heartbeat refresh
    /// interval (`ttl/3`) and the cleanup sweep interval (`2×ttl`).
    #[serde(default = "default_instance_ttl")]
    pub instance_ttl_seconds: u64,
}

/// Redis connection configuration for the cluster coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisClusterConfig {
    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl ClusterConfig {
    /// TTL applied to the heartbeat key itself.
    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_secs(self.instance_ttl_seconds + HEARTBEAT_TTL_BUFFER_SECONDS)
    }

    /// Interval at which the heartbeat key is refreshed.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs((self.instance_ttl_seconds / 3).max(1))
    }

    /// Interval at which the dead-instance cleanup sweep runs.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.instance_ttl_seconds * 2)
    }

    /// Interval at which each cluster subscription requests a full
    /// state-sync snapshot.
    pub fn sync_interval(&self) -> Duration {
        self.cleanup_interval()
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redis: RedisClusterConfig::default(),
            instance_ttl_seconds: default_instance_ttl(),
        }
    }
}

impl Default for RedisClusterConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

fn default_instance_ttl() -> u64 {
    90
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
