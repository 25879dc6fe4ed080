//! Channel engine configuration.

use serde::{Deserialize, Serialize};

/// Channel engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Identifier of this endpoint within the deployment. Must not
    /// contain `:` (it is embedded in Redis cache key names).
    #[serde(default = "default_endpoint_id")]
    pub endpoint_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint_id: default_endpoint_id(),
        }
    }
}

fn default_endpoint_id() -> String {
    "default".to_string()
}
