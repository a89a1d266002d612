//! Save and restore paths of a survival event.
//!
//! Save: snapshot -> encrypt -> create host -> await ready -> deliver ->
//! persist record. Restore: take record -> fetch -> decrypt -> replace state
//! -> forward markers -> destroy host.

use std::collections::BTreeMap;
use std::sync::Arc;

use carryover_codec::ExportedKey;
use carryover_core::{Marker, RuntimeState, SessionId, SurvivalPayload};
use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::collaborators::{HostHandle, HostProvider, KvStore, Messenger, Sessions};
use crate::config::SurvivalConfig;
use crate::error::SurvivalError;
use crate::record::{RecordStore, SurvivalRecord};
use crate::rendezvous::RendezvousHost;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    pub host: HostHandle,
    /// Sessions whose marker made it into the payload.
    pub sessions_with_markers: usize,
    pub ciphertext_len: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ForwardReport {
    pub delivered: Vec<SessionId>,
    pub failed: Vec<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RestoreOutcome {
    /// No record: a normal cold start.
    NothingPending,
    Restored { host: HostHandle, forward: ForwardReport },
}

pub struct SurvivalCoordinator {
    config: SurvivalConfig,
    records: RecordStore,
    provider: Arc<dyn HostProvider>,
    messenger: Arc<dyn Messenger>,
    sessions: Arc<dyn Sessions>,
}

impl SurvivalCoordinator {
    pub fn new(
        config: SurvivalConfig,
        store: Arc<dyn KvStore>,
        provider: Arc<dyn HostProvider>,
        messenger: Arc<dyn Messenger>,
        sessions: Arc<dyn Sessions>,
    ) -> Self {
        let records = RecordStore::new(store, &config);
        Self {
            config,
            records,
            provider,
            messenger,
            sessions,
        }
    }

    pub fn config(&self) -> &SurvivalConfig {
        &self.config
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    // ─── Save ─────────────────────────────────────────────────────

    /// Hand `state` to a fresh rendezvous host and persist the record
    /// needed to get it back.
    ///
    /// Any error leaves no record behind; the caller proceeds without
    /// survival.
    pub async fn save(&self, state: &RuntimeState) -> Result<SaveReport, SurvivalError> {
        let all_seen = self.collect_seen().await;
        let sessions_with_markers = all_seen.len();

        let plaintext = Zeroizing::new(
            SurvivalPayload::snapshot(state, all_seen)
                .to_bytes()
                .map_err(|e| SurvivalError::MalformedPayload(e.to_string()))?,
        );
        let sealed = carryover_codec::encrypt(&plaintext)?;
        drop(plaintext);

        let mut host = RendezvousHost::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.messenger),
            self.config.rendezvous_target.clone(),
        );
        let handle = host.create(self.config.prefer_private).await?;

        let retry = self.config.deliver_retry();
        let handoff = async {
            host.await_ready().await?;
            host.deliver(&sealed.ciphertext, retry).await
        };
        let delivered = match tokio::time::timeout(self.config.ready_timeout(), handoff).await {
            Ok(result) => result,
            Err(_) => Err(SurvivalError::HostUnreachable(format!(
                "{handle} not ready within {}ms",
                self.config.ready_timeout_ms
            ))),
        };
        if let Err(e) = delivered {
            host.destroy().await;
            return Err(e);
        }

        let record = SurvivalRecord {
            key: sealed.key.clone(),
            host_ref: handle,
            saved_at: Utc::now(),
        };
        if let Err(e) = self.records.persist(&record).await {
            host.destroy().await;
            return Err(e.into());
        }

        tracing::info!(host = %handle, sessions = sessions_with_markers, "runtime state handed to rendezvous host");
        Ok(SaveReport {
            host: handle,
            sessions_with_markers,
            ciphertext_len: sealed.ciphertext.len(),
        })
    }

    /// Query every live session for its marker concurrently. Sessions that
    /// fail or have nothing are left out.
    async fn collect_seen(&self) -> BTreeMap<SessionId, Marker> {
        let ids = match self.sessions.list().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "cannot enumerate sessions, saving without markers");
                return BTreeMap::new();
            }
        };

        let sessions = &self.sessions;
        let queries = ids
            .into_iter()
            .map(|id| async move { (id, sessions.collect_seen(id).await) });

        join_all(queries)
            .await
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(Some(marker)) => Some((id, marker)),
                Ok(None) => None,
                Err(e) => {
                    tracing::debug!(session = %id, error = %e, "no marker collected");
                    None
                }
            })
            .collect()
    }

    // ─── Restore ──────────────────────────────────────────────────

    /// Consume a pending record, if any, and replace `state` with what it
    /// protects.
    ///
    /// The record is erased before the host is contacted. `state` is left
    /// untouched on every error path.
    pub async fn restore(&self, state: &mut RuntimeState) -> Result<RestoreOutcome, SurvivalError> {
        let Some(record) = self.records.take().await? else {
            tracing::debug!("no pending survival record");
            return Ok(RestoreOutcome::NothingPending);
        };
        let age = Utc::now().signed_duration_since(record.saved_at);
        tracing::debug!(host = %record.host_ref, age_secs = age.num_seconds(), "survival record consumed");

        let mut host = RendezvousHost::attach(
            Arc::clone(&self.provider),
            Arc::clone(&self.messenger),
            self.config.rendezvous_target.clone(),
            record.host_ref,
        );
        let blob = match host.fetch().await {
            Ok(blob) => blob,
            // Nothing to destroy through; leave it.
            Err(e @ SurvivalError::HostUnreachable(_)) => return Err(e),
            // The host answered with something undecodable.
            Err(e) => {
                host.destroy().await;
                return Err(e);
            }
        };

        let (restored, all_seen) = match open(&blob, &record.key) {
            Ok(payload) => payload.into_parts(),
            Err(e) => {
                host.destroy().await;
                return Err(e);
            }
        };

        *state = restored;
        let forward = self.forward_markers(all_seen).await;
        host.destroy().await;

        tracing::info!(
            host = %record.host_ref,
            delivered = forward.delivered.len(),
            failed = forward.failed.len(),
            "runtime state restored"
        );
        Ok(RestoreOutcome::Restored {
            host: record.host_ref,
            forward,
        })
    }

    /// Forward each marker to its session if it still exists. One failing
    /// session never affects the others.
    async fn forward_markers(&self, all_seen: BTreeMap<SessionId, Marker>) -> ForwardReport {
        let sessions = &self.sessions;
        let forwards = all_seen.into_iter().map(|(id, marker)| async move {
            tracing::debug!(session = %id, "restoring marker");
            let result = sessions.all_seen(id, marker).await;
            (id, result)
        });

        let mut report = ForwardReport::default();
        for (id, result) in join_all(forwards).await {
            match result {
                Ok(()) => report.delivered.push(id),
                Err(source) => {
                    let err = SurvivalError::PerSessionForwardFailure { session: id, source };
                    tracing::warn!(error = %err, "marker not restored");
                    report.failed.push(id);
                }
            }
        }
        report
    }
}

fn open(blob: &[u8], key: &ExportedKey) -> Result<SurvivalPayload, SurvivalError> {
    let plaintext = carryover_codec::decrypt(blob, key)?;
    SurvivalPayload::from_bytes(&plaintext).map_err(|e| SurvivalError::MalformedPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::HostStatus;
    use crate::memory::{Journal, MemoryHosts, MemorySessions, MemoryStore};
    use carryover_core::Policy;

    struct Fixture {
        store: Arc<MemoryStore>,
        hosts: Arc<MemoryHosts>,
    }

    impl Fixture {
        fn new(hosts: MemoryHosts) -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                hosts: Arc::new(hosts),
            }
        }

        fn coordinator(&self, sessions: MemorySessions) -> (SurvivalCoordinator, Arc<MemorySessions>) {
            self.coordinator_with(sessions, SurvivalConfig::default())
        }

        fn coordinator_with(
            &self,
            sessions: MemorySessions,
            config: SurvivalConfig,
        ) -> (SurvivalCoordinator, Arc<MemorySessions>) {
            let sessions = Arc::new(sessions);
            let coordinator = SurvivalCoordinator::new(
                config,
                self.store.clone(),
                self.hosts.clone(),
                self.hosts.clone(),
                sessions.clone(),
            );
            (coordinator, sessions)
        }
    }

    fn state(policy: serde_json::Value, unrestricted: &[u64]) -> RuntimeState {
        RuntimeState::new(Policy::new(policy))
            .with_unrestricted(unrestricted.iter().copied().map(SessionId))
    }

    #[tokio::test]
    async fn save_persists_only_key_material() {
        let fx = Fixture::new(MemoryHosts::new());
        let (coordinator, _) = fx.coordinator(
            MemorySessions::new().with_session(SessionId(7), Some(serde_json::json!("secret-marker"))),
        );

        let report = coordinator
            .save(&state(serde_json::json!("secret-policy"), &[3]))
            .await
            .expect("save");

        assert_eq!(report.sessions_with_markers, 1);
        let dump = fx.store.dump();
        assert!(!dump.contains("secret-policy"));
        assert!(!dump.contains("secret-marker"));
        let record = fx.store.peek("local", "updateInfo").expect("record");
        assert_eq!(record["hostRef"], report.host.0);
        assert_eq!(fx.hosts.live_hosts(), vec![report.host]);
    }

    #[tokio::test]
    async fn collect_failures_are_skipped() {
        let fx = Fixture::new(MemoryHosts::new());
        let (coordinator, _) = fx.coordinator(
            MemorySessions::new()
                .with_session(SessionId(1), Some(serde_json::json!("a")))
                .with_session(SessionId(2), Some(serde_json::json!("b")))
                .with_session(SessionId(3), None)
                .failing_collect(SessionId(2)),
        );

        let report = coordinator
            .save(&state(serde_json::json!({}), &[]))
            .await
            .expect("save");
        assert_eq!(report.sessions_with_markers, 1);
    }

    #[tokio::test]
    async fn host_creation_failure_leaves_no_record() {
        let fx = Fixture::new(MemoryHosts::new().with_private_context().fail_create());
        let (coordinator, _) = fx.coordinator(MemorySessions::new());

        let err = coordinator
            .save(&state(serde_json::json!("P1"), &[]))
            .await
            .expect_err("no host");
        assert!(matches!(err, SurvivalError::HostCreateFailure(_)));
        assert_eq!(fx.hosts.create_attempts(), 2);
        assert!(fx.hosts.live_hosts().is_empty());
        assert!(fx.store.peek("local", "updateInfo").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_host_times_out_and_is_removed() {
        let fx = Fixture::new(MemoryHosts::new().with_ready_script(vec![HostStatus::Loading]));
        let config = SurvivalConfig {
            ready_timeout_ms: 50,
            ..SurvivalConfig::default()
        };
        let (coordinator, _) = fx.coordinator_with(MemorySessions::new(), config);

        let err = coordinator
            .save(&state(serde_json::json!("P1"), &[]))
            .await
            .expect_err("times out");
        assert!(matches!(err, SurvivalError::HostUnreachable(_)));
        assert!(fx.store.peek("local", "updateInfo").is_none());
        assert!(fx.hosts.live_hosts().is_empty());
    }

    #[tokio::test]
    async fn restore_without_record_is_noop() {
        let fx = Fixture::new(MemoryHosts::new());
        let (coordinator, _) = fx.coordinator(MemorySessions::new());
        let mut live = state(serde_json::json!("live"), &[1]);

        let outcome = coordinator.restore(&mut live).await.expect("restore");
        assert_eq!(outcome, RestoreOutcome::NothingPending);
        assert_eq!(live, state(serde_json::json!("live"), &[1]));
    }

    #[tokio::test]
    async fn restore_erases_record_before_fetching() {
        let journal = Journal::new();
        let fx = Fixture {
            store: Arc::new(MemoryStore::new().with_journal(journal.clone())),
            hosts: Arc::new(MemoryHosts::new().with_journal(journal.clone())),
        };
        let (before, _) = fx.coordinator(MemorySessions::new());
        let report = before
            .save(&state(serde_json::json!("P1"), &[]))
            .await
            .expect("save");

        let (after, _) = fx.coordinator(MemorySessions::new());
        let mut live = RuntimeState::default();
        after.restore(&mut live).await.expect("restore");

        let erased = journal
            .position("store.remove local/updateInfo")
            .expect("record erased");
        let fetched = journal
            .position(&format!("host.retrieve {}", report.host.0))
            .expect("blob fetched");
        let removed = journal
            .position(&format!("host.remove {}", report.host.0))
            .expect("host removed");
        assert!(erased < fetched);
        assert!(fetched < removed);
    }

    #[tokio::test]
    async fn unreachable_host_consumes_record_and_keeps_state() {
        let fx = Fixture::new(MemoryHosts::new());
        let (before, _) = fx.coordinator(MemorySessions::new());
        let report = before
            .save(&state(serde_json::json!("P1"), &[]))
            .await
            .expect("save");
        fx.hosts.crash(report.host);

        let (after, _) = fx.coordinator(MemorySessions::new());
        let mut live = state(serde_json::json!("fresh"), &[]);
        let err = after.restore(&mut live).await.expect_err("unreachable");

        assert!(matches!(err, SurvivalError::HostUnreachable(_)));
        assert!(fx.store.peek("local", "updateInfo").is_none());
        assert_eq!(live, state(serde_json::json!("fresh"), &[]));
        assert!(fx.hosts.removed().is_empty(), "nothing to destroy through");
    }

    #[tokio::test]
    async fn tampered_blob_is_rejected_and_host_destroyed() {
        let fx = Fixture::new(MemoryHosts::new());
        let (before, _) = fx.coordinator(MemorySessions::new());
        let report = before
            .save(&state(serde_json::json!("P1"), &[]))
            .await
            .expect("save");

        let mut blob =
            carryover_codec::from_transport(&fx.hosts.stored_blob(report.host).expect("blob"))
                .expect("b64");
        blob[0] ^= 0x01;
        fx.hosts.tamper(report.host, carryover_codec::to_transport(&blob));

        let (after, _) = fx.coordinator(MemorySessions::new());
        let mut live = state(serde_json::json!("fresh"), &[]);
        let err = after.restore(&mut live).await.expect_err("integrity");

        assert!(matches!(err, SurvivalError::IntegrityError));
        assert_eq!(live, state(serde_json::json!("fresh"), &[]));
        assert_eq!(fx.hosts.removed(), vec![report.host]);
        assert!(fx.store.peek("local", "updateInfo").is_none());
    }

    #[tokio::test]
    async fn undecodable_reply_is_rejected_and_host_destroyed() {
        let fx = Fixture::new(MemoryHosts::new());
        let (before, _) = fx.coordinator(MemorySessions::new());
        let report = before
            .save(&state(serde_json::json!("P1"), &[]))
            .await
            .expect("save");
        fx.hosts.tamper(report.host, "not*base64");

        let (after, _) = fx.coordinator(MemorySessions::new());
        let mut live = state(serde_json::json!("fresh"), &[]);
        let err = after.restore(&mut live).await.expect_err("malformed");

        assert!(matches!(err, SurvivalError::MalformedPayload(_)));
        assert_eq!(live, state(serde_json::json!("fresh"), &[]));
        assert_eq!(fx.hosts.removed(), vec![report.host]);
        assert!(fx.hosts.live_hosts().is_empty());
        assert!(fx.store.peek("local", "updateInfo").is_none());
    }

    #[tokio::test]
    async fn payload_without_policy_is_malformed() {
        let fx = Fixture::new(MemoryHosts::new());
        let (before, _) = fx.coordinator(MemorySessions::new());
        let report = before
            .save(&state(serde_json::Value::Null, &[]))
            .await
            .expect("save");

        let (after, _) = fx.coordinator(MemorySessions::new());
        let mut live = state(serde_json::json!("fresh"), &[]);
        let err = after.restore(&mut live).await.expect_err("malformed");

        assert!(matches!(err, SurvivalError::MalformedPayload(_)));
        assert_eq!(live.policy, Policy::new(serde_json::json!("fresh")));
        assert_eq!(fx.hosts.removed(), vec![report.host]);
    }

    #[tokio::test]
    async fn failed_record_erase_aborts_before_fetch() {
        let journal = Journal::new();
        let fx = Fixture {
            store: Arc::new(MemoryStore::new().fail_remove()),
            hosts: Arc::new(MemoryHosts::new().with_journal(journal.clone())),
        };
        let (before, _) = fx.coordinator(MemorySessions::new());
        before
            .save(&state(serde_json::json!("P1"), &[]))
            .await
            .expect("save");

        let (after, _) = fx.coordinator(MemorySessions::new());
        let mut live = RuntimeState::default();
        let err = after.restore(&mut live).await.expect_err("store");

        assert!(matches!(err, SurvivalError::Store(_)));
        assert!(!journal.entries().iter().any(|e| e.starts_with("host.retrieve")));
        assert_eq!(live, RuntimeState::default());
    }
}
