//! Interfaces of the external collaborators the survival runtime drives:
//! durable key-value storage, the rendezvous host provider, point-to-point
//! messaging, live sessions, and process restart.
//!
//! All traits are object-safe and `Send + Sync` so they can be shared as
//! `Arc<dyn ...>` between the coordinator and the lifecycle gate.

use std::fmt;

use async_trait::async_trait;
use carryover_core::{Marker, SessionId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{MessageError, ProviderError, SessionError, StoreError};

// ─── Durable Store ────────────────────────────────────────────────

/// Small durable key-value store scoped by namespace (`"local"`, `"sync"`).
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    async fn set(&self, namespace: &str, key: &str, value: serde_json::Value) -> Result<(), StoreError>;

    async fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError>;
}

// ─── Rendezvous Host Provider ─────────────────────────────────────

/// Opaque handle of a host instance that outlives the current process
/// generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostHandle(pub u64);

impl fmt::Display for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host#{}", self.0)
    }
}

/// Identifier of an execution context a host can be created in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(pub u64);

/// A context reported by [`HostProvider::list_contexts`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostContext {
    pub id: ContextId,
    /// Isolated from the user's visible session.
    pub private: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateHostOptions {
    /// Context to create the host in; `None` lets the provider choose.
    pub context: Option<ContextId>,
    /// Initial document the host loads.
    pub target: String,
    /// Whether the host should be brought to the foreground.
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Loading,
    Complete,
}

/// Readiness notification emitted by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEvent {
    pub host: HostHandle,
    pub status: HostStatus,
}

#[async_trait]
pub trait HostProvider: Send + Sync {
    async fn list_contexts(&self) -> Result<Vec<HostContext>, ProviderError>;

    async fn create_host(&self, options: CreateHostOptions) -> Result<HostHandle, ProviderError>;

    async fn remove_host(&self, host: HostHandle) -> Result<(), ProviderError>;

    async fn host_status(&self, host: HostHandle) -> Result<HostStatus, ProviderError>;

    /// Subscribe to readiness events of every host. Events sent before the
    /// call are not delivered to the returned receiver.
    fn subscribe(&self) -> broadcast::Receiver<HostEvent>;
}

// ─── Messaging ────────────────────────────────────────────────────

/// Address of a message receiver: a host and a frame inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: HostHandle,
    pub frame: u32,
}

impl Endpoint {
    /// The top-level frame of `host`.
    pub fn top(host: HostHandle) -> Self {
        Self { host, frame: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Store,
    Retrieve,
}

/// Command tag plus a small JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub command: Command,
    pub doc: serde_json::Value,
}

impl Message {
    pub fn store(target: &str, data: String) -> Self {
        Self {
            command: Command::Store,
            doc: serde_json::json!({ "url": target, "data": data }),
        }
    }

    pub fn retrieve(target: &str) -> Self {
        Self {
            command: Command::Retrieve,
            doc: serde_json::json!({ "url": target }),
        }
    }
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, to: Endpoint, message: Message) -> Result<serde_json::Value, MessageError>;
}

// ─── Sessions ─────────────────────────────────────────────────────

/// Live sessions and their per-session "previously observed" markers.
#[async_trait]
pub trait Sessions: Send + Sync {
    async fn list(&self) -> Result<Vec<SessionId>, SessionError>;

    async fn collect_seen(&self, id: SessionId) -> Result<Option<Marker>, SessionError>;

    async fn all_seen(&self, id: SessionId, marker: Marker) -> Result<(), SessionError>;
}

// ─── Restart ──────────────────────────────────────────────────────

/// Forces the process to restart, applying a staged update.
pub trait Restarter: Send + Sync {
    fn restart(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_message_shape() {
        let msg = Message::store("about:blank", "AAAA".to_string());
        let value = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "command": "store",
                "doc": {"url": "about:blank", "data": "AAAA"},
            })
        );
    }

    #[test]
    fn retrieve_message_shape() {
        let msg = Message::retrieve("about:blank");
        assert_eq!(msg.command, Command::Retrieve);
        assert_eq!(msg.doc["url"], "about:blank");
        assert!(msg.doc.get("data").is_none());
    }

    #[test]
    fn endpoint_top_frame() {
        let ep = Endpoint::top(HostHandle(4));
        assert_eq!(ep.frame, 0);
        assert_eq!(ep.host.to_string(), "host#4");
    }

    #[test]
    fn host_status_serde() {
        let json = serde_json::to_string(&HostStatus::Complete).expect("serialize");
        assert_eq!(json, r#""complete""#);
    }
}
