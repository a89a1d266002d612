//! Runtime configuration for survival events.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Where records live, what the rendezvous host loads, and how long the
/// hand-off may wait. Every field has a default, so a partial JSON file is
/// enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurvivalConfig {
    /// Namespace of the survival record (default `"local"`).
    pub record_namespace: String,
    /// Key of the survival record (default `"updateInfo"`).
    pub record_key: String,
    /// Namespace migrations persist the policy to (default `"sync"`).
    pub policy_namespace: String,
    /// Key migrations persist the policy under (default `"policy"`).
    pub policy_key: String,
    /// Document the rendezvous host is created with (default `"about:blank"`).
    pub rendezvous_target: String,
    /// Prefer a private context for the rendezvous host (default true).
    pub prefer_private: bool,
    /// Deadline for readiness plus delivery, in milliseconds (default 30000).
    pub ready_timeout_ms: u64,
    /// Delay between deliveries while the endpoint is missing (default 100).
    pub deliver_retry_ms: u64,
}

impl Default for SurvivalConfig {
    fn default() -> Self {
        Self {
            record_namespace: "local".to_string(),
            record_key: "updateInfo".to_string(),
            policy_namespace: "sync".to_string(),
            policy_key: "policy".to_string(),
            rendezvous_target: "about:blank".to_string(),
            prefer_private: true,
            ready_timeout_ms: 30_000,
            deliver_retry_ms: 100,
        }
    }
}

impl SurvivalConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn deliver_retry(&self) -> Duration {
        Duration::from_millis(self.deliver_retry_ms)
    }
}
