//! The transient plaintext carried across a restart.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::PayloadError;
use crate::types::{Marker, Policy, RuntimeState, SessionId};

/// Logical state handed across the restart boundary.
///
/// Built right before encryption and rebuilt right after decryption. Never
/// written to durable storage in this form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurvivalPayload {
    /// Dry form of the live policy. An empty scalar (`null`, `false`, `0`,
    /// `""`) means the payload is unusable.
    #[serde(default)]
    pub policy: serde_json::Value,
    #[serde(default)]
    pub all_seen: BTreeMap<SessionId, Marker>,
    #[serde(default)]
    pub unrestricted_tabs: Vec<SessionId>,
}

impl SurvivalPayload {
    /// Snapshot `state` together with the markers gathered from live sessions.
    pub fn snapshot(state: &RuntimeState, all_seen: BTreeMap<SessionId, Marker>) -> Self {
        Self {
            policy: state.policy.dry(true),
            all_seen,
            unrestricted_tabs: state.unrestricted.iter().copied().collect(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse decrypted bytes. A missing or empty-scalar policy is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PayloadError> {
        let payload: Self = serde_json::from_slice(bytes)?;
        if is_empty_policy(&payload.policy) {
            return Err(PayloadError::MissingPolicy);
        }
        Ok(payload)
    }

    /// Split into the replacement runtime state and the markers still to be
    /// forwarded to their sessions.
    pub fn into_parts(self) -> (RuntimeState, BTreeMap<SessionId, Marker>) {
        let state = RuntimeState::new(Policy::new(self.policy))
            .with_unrestricted(self.unrestricted_tabs);
        (state, self.all_seen)
    }
}

fn is_empty_policy(policy: &serde_json::Value) -> bool {
    match policy {
        serde_json::Value::Null => true,
        serde_json::Value::Bool(b) => !b,
        serde_json::Value::Number(n) => n.as_f64() == Some(0.0),
        serde_json::Value::String(s) => s.is_empty(),
        // Containers count as present even when empty.
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => false,
    }
}
