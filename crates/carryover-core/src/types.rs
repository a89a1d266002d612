use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ─── Session ──────────────────────────────────────────────────────

/// Identifier of a live session (a tab, a pane, a connection).
///
/// Serializes as a bare integer; when used as a JSON map key it becomes the
/// decimal string form (`{"7": ...}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Opaque per-session "previously observed" bookkeeping value.
pub type Marker = serde_json::Value;

// ─── Policy ───────────────────────────────────────────────────────

/// Key of the built-in preset entry inside a policy document.
pub const DEFAULT_PRESET: &str = "DEFAULT";

/// Live security policy, held as its JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Policy(serde_json::Value);

impl Policy {
    pub fn new(document: serde_json::Value) -> Self {
        Self(document)
    }

    /// Serializable snapshot of the policy.
    ///
    /// With `include_defaults == false` the built-in `DEFAULT` preset is
    /// stripped from object documents; any other shape is returned as is.
    pub fn dry(&self, include_defaults: bool) -> serde_json::Value {
        match &self.0 {
            serde_json::Value::Object(map) if !include_defaults => {
                let mut map = map.clone();
                map.remove(DEFAULT_PRESET);
                serde_json::Value::Object(map)
            }
            other => other.clone(),
        }
    }

    pub fn document(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn document_mut(&mut self) -> &mut serde_json::Value {
        &mut self.0
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self(serde_json::Value::Object(serde_json::Map::new()))
    }
}

// ─── Runtime State ────────────────────────────────────────────────

/// The in-memory state that must survive a restart.
///
/// Owned by the embedding runtime and handed to the coordinator by reference.
/// A restore replaces it wholesale, never field by field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeState {
    pub policy: Policy,
    pub unrestricted: BTreeSet<SessionId>,
}

impl RuntimeState {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            unrestricted: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_unrestricted(mut self, ids: impl IntoIterator<Item = SessionId>) -> Self {
        self.unrestricted.extend(ids);
        self
    }

    pub fn is_unrestricted(&self, id: SessionId) -> bool {
        self.unrestricted.contains(&id)
    }
}
