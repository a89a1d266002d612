//! Lifecycle of the ephemeral host used as a dead-drop for ciphertext.
//!
//! `Unborn -> Created -> Ready -> Delivered | Fetched -> Destroyed`
//!
//! The readiness subscription is taken before the host is created, so a
//! host that finishes loading while `create` is still returning is not
//! missed. A host attached from a previous process generation subscribes
//! first and then checks the current status.

use std::sync::Arc;
use std::time::Duration;

use carryover_codec::{from_transport, to_transport};
use tokio::sync::broadcast;

use crate::collaborators::{
    ContextId, CreateHostOptions, Endpoint, HostEvent, HostHandle, HostProvider, HostStatus,
    Message, Messenger,
};
use crate::error::{MessageError, SurvivalError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HostPhase {
    Unborn,
    Created,
    Ready,
    Delivered,
    Fetched,
    Destroyed,
}

pub struct RendezvousHost {
    provider: Arc<dyn HostProvider>,
    messenger: Arc<dyn Messenger>,
    target: String,
    handle: Option<HostHandle>,
    phase: HostPhase,
    events: Option<broadcast::Receiver<HostEvent>>,
}

impl RendezvousHost {
    pub fn new(
        provider: Arc<dyn HostProvider>,
        messenger: Arc<dyn Messenger>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            messenger,
            target: target.into(),
            handle: None,
            phase: HostPhase::Unborn,
            events: None,
        }
    }

    /// Re-attach to a host created by a previous process generation; it is
    /// assumed to hold a delivered blob.
    pub fn attach(
        provider: Arc<dyn HostProvider>,
        messenger: Arc<dyn Messenger>,
        target: impl Into<String>,
        handle: HostHandle,
    ) -> Self {
        let mut host = Self::new(provider, messenger, target);
        host.handle = Some(handle);
        host.phase = HostPhase::Delivered;
        host
    }

    pub fn handle(&self) -> Option<HostHandle> {
        self.handle
    }

    pub fn phase(&self) -> HostPhase {
        self.phase
    }

    fn require_handle(&self) -> Result<HostHandle, SurvivalError> {
        match (self.handle, self.phase) {
            (Some(handle), phase) if phase != HostPhase::Destroyed => Ok(handle),
            _ => Err(SurvivalError::NoHost),
        }
    }

    /// Create the host, preferring a private context when asked to.
    ///
    /// A failure inside the private context is retried once without it; a
    /// second failure aborts with `HostCreateFailure`.
    pub async fn create(&mut self, prefer_private: bool) -> Result<HostHandle, SurvivalError> {
        if let Some(handle) = self.handle {
            return Ok(handle);
        }

        let events = self.provider.subscribe();

        let mut options = CreateHostOptions {
            context: None,
            target: self.target.clone(),
            active: false,
        };
        if prefer_private {
            options.context = self.private_context().await;
        }

        let handle = match self.provider.create_host(options.clone()).await {
            Ok(handle) => handle,
            Err(e) if options.context.is_some() => {
                tracing::warn!(error = %e, "rendezvous host creation in private context failed, retrying without it");
                options.context = None;
                self.provider
                    .create_host(options)
                    .await
                    .map_err(SurvivalError::HostCreateFailure)?
            }
            Err(e) => return Err(SurvivalError::HostCreateFailure(e)),
        };

        tracing::debug!(host = %handle, "rendezvous host created");
        self.handle = Some(handle);
        self.phase = HostPhase::Created;
        self.events = Some(events);
        Ok(handle)
    }

    async fn private_context(&self) -> Option<ContextId> {
        match self.provider.list_contexts().await {
            Ok(contexts) => contexts.into_iter().find(|c| c.private).map(|c| c.id),
            Err(e) => {
                tracing::debug!(error = %e, "cannot enumerate host contexts");
                None
            }
        }
    }

    /// Wait until the host reports `Complete`. Any number of `Loading`
    /// events may arrive first. No deadline here; callers bound it.
    pub async fn await_ready(&mut self) -> Result<(), SurvivalError> {
        let handle = self.require_handle()?;
        if self.phase >= HostPhase::Ready {
            return Ok(());
        }

        let mut events = match self.events.take() {
            Some(rx) => rx,
            None => self.provider.subscribe(),
        };

        if self.is_complete(handle).await {
            self.phase = HostPhase::Ready;
            return Ok(());
        }

        loop {
            match events.recv().await {
                Ok(event) if event.host == handle => {
                    tracing::debug!(host = %handle, status = ?event.status, "rendezvous host updating");
                    if event.status == HostStatus::Complete {
                        self.phase = HostPhase::Ready;
                        return Ok(());
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "rendezvous readiness events lagged");
                    if self.is_complete(handle).await {
                        self.phase = HostPhase::Ready;
                        return Ok(());
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(SurvivalError::HostUnreachable(
                        "readiness event stream closed".to_string(),
                    ));
                }
            }
        }
    }

    async fn is_complete(&self, handle: HostHandle) -> bool {
        match self.provider.host_status(handle).await {
            Ok(status) => status == HostStatus::Complete,
            Err(e) => {
                tracing::debug!(host = %handle, error = %e, "host status unavailable, waiting for events");
                false
            }
        }
    }

    /// Hand `blob` to the host as transport text.
    ///
    /// `EndpointMissing` means the host is up but its receiver is not yet
    /// registered: sleep `retry` and send again. Anything else is fatal.
    pub async fn deliver(&mut self, blob: &[u8], retry: Duration) -> Result<(), SurvivalError> {
        let handle = self.require_handle()?;
        let message = Message::store(&self.target, to_transport(blob));

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.messenger.send(Endpoint::top(handle), message.clone()).await {
                Ok(_) => {
                    tracing::debug!(host = %handle, attempts, "ciphertext delivered to rendezvous host");
                    self.phase = HostPhase::Delivered;
                    return Ok(());
                }
                Err(MessageError::EndpointMissing) => {
                    tracing::debug!(host = %handle, attempts, "rendezvous endpoint not registered yet");
                    tokio::time::sleep(retry).await;
                }
                Err(e) => return Err(SurvivalError::Delivery(e)),
            }
        }
    }

    /// Ask the host for the blob it was handed.
    pub async fn fetch(&mut self) -> Result<Vec<u8>, SurvivalError> {
        let handle = self.require_handle()?;
        let reply = self
            .messenger
            .send(Endpoint::top(handle), Message::retrieve(&self.target))
            .await
            .map_err(|e| SurvivalError::HostUnreachable(format!("{handle}: {e}")))?;

        let text = reply.as_str().ok_or_else(|| {
            SurvivalError::MalformedPayload("rendezvous reply is not text".to_string())
        })?;
        let blob = from_transport(text)
            .map_err(|e| SurvivalError::MalformedPayload(e.to_string()))?;

        self.phase = HostPhase::Fetched;
        Ok(blob)
    }

    /// Tear the host down. Best-effort: failures are logged only.
    pub async fn destroy(&mut self) {
        let Some(handle) = self.handle else {
            return;
        };
        if self.phase == HostPhase::Destroyed {
            return;
        }
        if let Err(e) = self.provider.remove_host(handle).await {
            tracing::warn!(host = %handle, error = %e, "cannot remove rendezvous host");
        }
        self.phase = HostPhase::Destroyed;
        self.events = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHosts;

    fn host_on(env: &Arc<MemoryHosts>) -> RendezvousHost {
        RendezvousHost::new(env.clone(), env.clone(), "about:blank")
    }

    #[tokio::test]
    async fn create_prefers_private_context() {
        let env = Arc::new(MemoryHosts::new().with_private_context());
        let mut host = host_on(&env);

        host.create(true).await.expect("create");

        let created = env.created();
        assert_eq!(created.len(), 1);
        assert!(created[0].context.is_some());
        assert!(!created[0].active);
        assert_eq!(host.phase(), HostPhase::Created);
    }

    #[tokio::test]
    async fn create_retries_once_without_private_context() {
        let env = Arc::new(MemoryHosts::new().with_private_context().deny_private());
        let mut host = host_on(&env);

        let handle = host.create(true).await.expect("create");

        let created = env.created();
        assert_eq!(created.len(), 1, "only the fallback creation succeeds");
        assert!(created[0].context.is_none());
        assert_eq!(env.live_hosts(), vec![handle]);
    }

    #[tokio::test]
    async fn create_without_preference_skips_enumeration() {
        let env = Arc::new(MemoryHosts::new().with_private_context());
        let mut host = host_on(&env);

        host.create(false).await.expect("create");
        assert!(env.created()[0].context.is_none());
    }

    #[tokio::test]
    async fn create_failure_aborts() {
        let env = Arc::new(MemoryHosts::new().fail_create());
        let mut host = host_on(&env);

        let err = host.create(true).await.expect_err("fails");
        assert!(matches!(err, SurvivalError::HostCreateFailure(_)));
        assert_eq!(env.create_attempts(), 1, "no private context, no retry");
        assert_eq!(host.phase(), HostPhase::Unborn);
        assert!(host.handle().is_none());
    }

    #[tokio::test]
    async fn failed_retry_without_private_context_aborts() {
        let env = Arc::new(MemoryHosts::new().with_private_context().fail_create());
        let mut host = host_on(&env);

        let err = host.create(true).await.expect_err("both attempts fail");
        assert!(matches!(err, SurvivalError::HostCreateFailure(_)));
        assert_eq!(env.create_attempts(), 2);
        assert!(env.live_hosts().is_empty());
        assert_eq!(host.phase(), HostPhase::Unborn);
    }

    #[tokio::test]
    async fn ready_emitted_during_create_is_not_missed() {
        // Default script emits Loading then Complete inside create_host.
        let env = Arc::new(MemoryHosts::new());
        let mut host = host_on(&env);
        host.create(true).await.expect("create");

        host.await_ready().await.expect("ready");
        assert_eq!(host.phase(), HostPhase::Ready);
    }

    #[tokio::test]
    async fn await_ready_waits_across_loading_events() {
        let env = Arc::new(MemoryHosts::new().with_ready_script(vec![]));
        let mut host = host_on(&env);
        let handle = host.create(true).await.expect("create");

        let emitter = {
            let env = env.clone();
            tokio::spawn(async move {
                for _ in 0..3 {
                    tokio::task::yield_now().await;
                    env.emit(handle, HostStatus::Loading);
                }
                env.emit(HostHandle(999), HostStatus::Complete);
                env.emit(handle, HostStatus::Complete);
            })
        };

        host.await_ready().await.expect("ready");
        emitter.await.expect("emitter");
        assert_eq!(host.phase(), HostPhase::Ready);
    }

    #[tokio::test]
    async fn attached_host_checks_current_status() {
        let env = Arc::new(MemoryHosts::new());
        let handle = host_on(&env).create(true).await.expect("create");

        let mut attached = RendezvousHost::attach(env.clone(), env.clone(), "about:blank", handle);
        assert_eq!(attached.phase(), HostPhase::Delivered);
        attached.await_ready().await.expect("already ready");
    }

    #[tokio::test]
    async fn deliver_retries_missing_endpoint() {
        let env = Arc::new(MemoryHosts::new().with_missing_endpoint_rounds(3));
        let mut host = host_on(&env);
        let handle = host.create(true).await.expect("create");
        host.await_ready().await.expect("ready");

        host.deliver(b"sealed", Duration::from_millis(1))
            .await
            .expect("deliver");

        assert_eq!(host.phase(), HostPhase::Delivered);
        assert_eq!(env.stored_blob(handle), Some(to_transport(b"sealed")));
    }

    #[tokio::test]
    async fn deliver_to_vanished_host_is_fatal() {
        let env = Arc::new(MemoryHosts::new());
        let mut host = host_on(&env);
        let handle = host.create(true).await.expect("create");
        env.crash(handle);

        let err = host
            .deliver(b"sealed", Duration::from_millis(1))
            .await
            .expect_err("fatal");
        assert!(matches!(err, SurvivalError::Delivery(MessageError::NoSuchHost)));
    }

    #[tokio::test]
    async fn fetch_returns_delivered_blob() {
        let env = Arc::new(MemoryHosts::new());
        let mut host = host_on(&env);
        let handle = host.create(true).await.expect("create");
        host.await_ready().await.expect("ready");
        host.deliver(b"\x00\xffblob", Duration::from_millis(1))
            .await
            .expect("deliver");

        let mut attached = RendezvousHost::attach(env.clone(), env.clone(), "about:blank", handle);
        assert_eq!(attached.fetch().await.expect("fetch"), b"\x00\xffblob");
        assert_eq!(attached.phase(), HostPhase::Fetched);
    }

    #[tokio::test]
    async fn fetch_from_missing_host_is_unreachable() {
        let env = Arc::new(MemoryHosts::new());
        let mut attached =
            RendezvousHost::attach(env.clone(), env.clone(), "about:blank", HostHandle(42));

        let err = attached.fetch().await.expect_err("unreachable");
        assert!(matches!(err, SurvivalError::HostUnreachable(_)));
    }

    #[tokio::test]
    async fn destroy_is_best_effort_and_final() {
        let env = Arc::new(MemoryHosts::new());
        let mut host = host_on(&env);
        let handle = host.create(true).await.expect("create");
        env.crash(handle);

        host.destroy().await;
        assert_eq!(host.phase(), HostPhase::Destroyed);
        assert!(matches!(host.fetch().await, Err(SurvivalError::NoHost)));
    }
}
