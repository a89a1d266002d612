//! In-process collaborators: a map-backed durable store, a host provider
//! whose hosts outlive any number of coordinator instances, scripted
//! sessions, and a counting restarter.
//!
//! Used by the `simulate` command and by tests. Sharing one `Arc` of each
//! between two coordinators models the process generations before and
//! after a restart.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use carryover_core::{Marker, SessionId};
use tokio::sync::broadcast;

use crate::collaborators::{
    Command, ContextId, CreateHostOptions, Endpoint, HostContext, HostEvent, HostHandle,
    HostProvider, HostStatus, KvStore, Message, Messenger, Restarter, Sessions,
};
use crate::error::{MessageError, ProviderError, SessionError, StoreError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Journal ──────────────────────────────────────────────────────

/// Shared, ordered log of collaborator calls, for asserting cross-component
/// ordering (e.g. record erased before the host is asked for its blob).
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        lock(&self.0).push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    /// Index of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        lock(&self.0).iter().position(|e| e == entry)
    }
}

// ─── Store ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<(String, String), serde_json::Value>>,
    fail_remove: bool,
    journal: Option<Journal>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Every `remove` fails with a backend error.
    #[must_use]
    pub fn fail_remove(mut self) -> Self {
        self.fail_remove = true;
        self
    }

    pub fn peek(&self, namespace: &str, key: &str) -> Option<serde_json::Value> {
        lock(&self.values)
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }

    /// All stored values, serialized, for asserting what reached storage.
    pub fn dump(&self) -> String {
        let values = lock(&self.values);
        let sorted: BTreeMap<String, &serde_json::Value> = values
            .iter()
            .map(|((ns, k), v)| (format!("{ns}/{k}"), v))
            .collect();
        serde_json::to_string(&sorted).unwrap_or_default()
    }

    fn note(&self, entry: String) {
        if let Some(journal) = &self.journal {
            journal.push(entry);
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        self.note(format!("store.get {namespace}/{key}"));
        Ok(self.peek(namespace, key))
    }

    async fn set(&self, namespace: &str, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        self.note(format!("store.set {namespace}/{key}"));
        lock(&self.values).insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        self.note(format!("store.remove {namespace}/{key}"));
        if self.fail_remove {
            return Err(StoreError::Backend("remove refused".to_string()));
        }
        lock(&self.values).remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}

// ─── Hosts ────────────────────────────────────────────────────────

#[derive(Debug)]
struct MemoryHost {
    status: HostStatus,
    blob: Option<String>,
}

#[derive(Debug)]
struct HostsInner {
    next_id: u64,
    contexts: Vec<HostContext>,
    contexts_supported: bool,
    deny_private: bool,
    fail_create: bool,
    ready_script: Vec<HostStatus>,
    missing_endpoint_rounds: usize,
    create_attempts: usize,
    hosts: BTreeMap<HostHandle, MemoryHost>,
    created: Vec<CreateHostOptions>,
    removed: Vec<HostHandle>,
}

/// Host provider and messenger in one: hosts hold the blob they were sent
/// and hand it back on `retrieve`.
#[derive(Debug)]
pub struct MemoryHosts {
    inner: Mutex<HostsInner>,
    events: broadcast::Sender<HostEvent>,
    journal: Option<Journal>,
}

impl Default for MemoryHosts {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHosts {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(HostsInner {
                next_id: 1,
                contexts: vec![HostContext {
                    id: ContextId(1),
                    private: false,
                }],
                contexts_supported: true,
                deny_private: false,
                fail_create: false,
                ready_script: vec![HostStatus::Loading, HostStatus::Complete],
                missing_endpoint_rounds: 0,
                create_attempts: 0,
                hosts: BTreeMap::new(),
                created: Vec::new(),
                removed: Vec::new(),
            }),
            events,
            journal: None,
        }
    }

    #[must_use]
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    #[must_use]
    pub fn with_private_context(self) -> Self {
        {
            let mut inner = lock(&self.inner);
            let id = ContextId(inner.contexts.len() as u64 + 1);
            inner.contexts.push(HostContext { id, private: true });
        }
        self
    }

    /// Creating a host in a private context fails with `PermissionDenied`.
    #[must_use]
    pub fn deny_private(self) -> Self {
        lock(&self.inner).deny_private = true;
        self
    }

    /// Context enumeration is unsupported.
    #[must_use]
    pub fn without_context_support(self) -> Self {
        lock(&self.inner).contexts_supported = false;
        self
    }

    /// Every `create_host` fails.
    #[must_use]
    pub fn fail_create(self) -> Self {
        lock(&self.inner).fail_create = true;
        self
    }

    /// Statuses emitted, in order, while `create_host` runs. The last one
    /// becomes the host's status. Empty leaves the host `Loading`.
    #[must_use]
    pub fn with_ready_script(self, script: Vec<HostStatus>) -> Self {
        lock(&self.inner).ready_script = script;
        self
    }

    /// The first `rounds` store messages answer `EndpointMissing`.
    #[must_use]
    pub fn with_missing_endpoint_rounds(self, rounds: usize) -> Self {
        lock(&self.inner).missing_endpoint_rounds = rounds;
        self
    }

    /// Set a host's status and broadcast it.
    pub fn emit(&self, host: HostHandle, status: HostStatus) {
        if let Some(h) = lock(&self.inner).hosts.get_mut(&host) {
            h.status = status;
        }
        let _ = self.events.send(HostEvent { host, status });
    }

    /// Make a host vanish without going through `remove_host`.
    pub fn crash(&self, host: HostHandle) {
        lock(&self.inner).hosts.remove(&host);
    }

    /// Replace the blob a host holds.
    pub fn tamper(&self, host: HostHandle, blob: impl Into<String>) {
        if let Some(h) = lock(&self.inner).hosts.get_mut(&host) {
            h.blob = Some(blob.into());
        }
    }

    pub fn stored_blob(&self, host: HostHandle) -> Option<String> {
        lock(&self.inner).hosts.get(&host).and_then(|h| h.blob.clone())
    }

    pub fn live_hosts(&self) -> Vec<HostHandle> {
        lock(&self.inner).hosts.keys().copied().collect()
    }

    /// Every `create_host` call, successful or not.
    pub fn create_attempts(&self) -> usize {
        lock(&self.inner).create_attempts
    }

    pub fn created(&self) -> Vec<CreateHostOptions> {
        lock(&self.inner).created.clone()
    }

    pub fn removed(&self) -> Vec<HostHandle> {
        lock(&self.inner).removed.clone()
    }

    fn note(&self, entry: String) {
        if let Some(journal) = &self.journal {
            journal.push(entry);
        }
    }
}

#[async_trait]
impl HostProvider for MemoryHosts {
    async fn list_contexts(&self) -> Result<Vec<HostContext>, ProviderError> {
        let inner = lock(&self.inner);
        if !inner.contexts_supported {
            return Err(ProviderError::Unsupported);
        }
        Ok(inner.contexts.clone())
    }

    async fn create_host(&self, options: CreateHostOptions) -> Result<HostHandle, ProviderError> {
        let (handle, script) = {
            let mut inner = lock(&self.inner);
            inner.create_attempts += 1;
            if inner.fail_create {
                return Err(ProviderError::Failed("host creation refused".to_string()));
            }
            if let Some(ctx) = options.context {
                let private = inner.contexts.iter().any(|c| c.id == ctx && c.private);
                if private && inner.deny_private {
                    return Err(ProviderError::PermissionDenied(
                        "private context not allowed".to_string(),
                    ));
                }
            }
            let handle = HostHandle(inner.next_id);
            inner.next_id += 1;
            inner.hosts.insert(
                handle,
                MemoryHost {
                    status: HostStatus::Loading,
                    blob: None,
                },
            );
            inner.created.push(options);
            (handle, inner.ready_script.clone())
        };
        self.note(format!("host.create {}", handle.0));
        for status in script {
            self.emit(handle, status);
        }
        Ok(handle)
    }

    async fn remove_host(&self, host: HostHandle) -> Result<(), ProviderError> {
        self.note(format!("host.remove {}", host.0));
        let mut inner = lock(&self.inner);
        if inner.hosts.remove(&host).is_none() {
            return Err(ProviderError::NoSuchHost(host));
        }
        inner.removed.push(host);
        Ok(())
    }

    async fn host_status(&self, host: HostHandle) -> Result<HostStatus, ProviderError> {
        lock(&self.inner)
            .hosts
            .get(&host)
            .map(|h| h.status)
            .ok_or(ProviderError::NoSuchHost(host))
    }

    fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl Messenger for MemoryHosts {
    async fn send(&self, to: Endpoint, message: Message) -> Result<serde_json::Value, MessageError> {
        let command = match message.command {
            Command::Store => "store",
            Command::Retrieve => "retrieve",
        };
        self.note(format!("host.{command} {}", to.host.0));

        let mut guard = lock(&self.inner);
        let inner = &mut *guard;
        let host = inner
            .hosts
            .get_mut(&to.host)
            .ok_or(MessageError::NoSuchHost)?;
        if host.status != HostStatus::Complete {
            return Err(MessageError::EndpointMissing);
        }

        match message.command {
            Command::Store => {
                if inner.missing_endpoint_rounds > 0 {
                    inner.missing_endpoint_rounds -= 1;
                    return Err(MessageError::EndpointMissing);
                }
                let data = message
                    .doc
                    .get("data")
                    .and_then(|d| d.as_str())
                    .ok_or_else(|| MessageError::Failed("store without data".to_string()))?;
                host.blob = Some(data.to_string());
                Ok(serde_json::Value::Null)
            }
            Command::Retrieve => host
                .blob
                .clone()
                .map(serde_json::Value::String)
                .ok_or_else(|| MessageError::Failed("nothing stored".to_string())),
        }
    }
}

// ─── Sessions ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemorySessions {
    markers: Mutex<BTreeMap<SessionId, Option<Marker>>>,
    failing_collect: BTreeSet<SessionId>,
    failing_forward: BTreeSet<SessionId>,
    received: Mutex<BTreeMap<SessionId, Marker>>,
}

impl MemorySessions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_session(self, id: SessionId, marker: Option<Marker>) -> Self {
        lock(&self.markers).insert(id, marker);
        self
    }

    /// `collect_seen` for `id` fails.
    #[must_use]
    pub fn failing_collect(mut self, id: SessionId) -> Self {
        self.failing_collect.insert(id);
        self
    }

    /// `all_seen` for `id` fails.
    #[must_use]
    pub fn failing_forward(mut self, id: SessionId) -> Self {
        self.failing_forward.insert(id);
        self
    }

    /// Markers forwarded through `all_seen`, by session.
    pub fn received(&self) -> BTreeMap<SessionId, Marker> {
        lock(&self.received).clone()
    }
}

#[async_trait]
impl Sessions for MemorySessions {
    async fn list(&self) -> Result<Vec<SessionId>, SessionError> {
        Ok(lock(&self.markers).keys().copied().collect())
    }

    async fn collect_seen(&self, id: SessionId) -> Result<Option<Marker>, SessionError> {
        if self.failing_collect.contains(&id) {
            return Err(SessionError::Failed(format!("session {id} did not answer")));
        }
        lock(&self.markers)
            .get(&id)
            .cloned()
            .ok_or(SessionError::Gone(id))
    }

    async fn all_seen(&self, id: SessionId, marker: Marker) -> Result<(), SessionError> {
        if !lock(&self.markers).contains_key(&id) {
            return Err(SessionError::Gone(id));
        }
        if self.failing_forward.contains(&id) {
            return Err(SessionError::Failed(format!("session {id} rejected marker")));
        }
        lock(&self.received).insert(id, marker);
        Ok(())
    }
}

// ─── Restarter ────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CountingRestarter {
    restarts: AtomicUsize,
}

impl CountingRestarter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

impl Restarter for CountingRestarter {
    fn restart(&self) {
        tracing::info!("restart requested");
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }
}
