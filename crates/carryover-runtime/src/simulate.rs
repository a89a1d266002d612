//! `carryover simulate`: one full update -> restart -> startup cycle.
//!
//! Both process generations share the in-memory store and hosts, the way the
//! durable store and the rendezvous host outlive a real restart. Sessions are
//! rebuilt for the second generation with no markers, so everything they end
//! up holding arrived through forwarding.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use carryover_core::{MigrationRegistry, Policy, RuntimeState, SessionId, VersionTag};
use carryover_runtime::memory::{CountingRestarter, MemoryHosts, MemorySessions, MemoryStore};
use carryover_runtime::{
    InstallDetails, InstallReason, SurvivalConfig, SurvivalCoordinator, UpdateDetails, UpgradeGate,
};
use serde_json::{Value, json};

use crate::cli::SimulateOpts;

struct Shared {
    config: SurvivalConfig,
    store: Arc<MemoryStore>,
    hosts: Arc<MemoryHosts>,
    restarter: Arc<CountingRestarter>,
}

impl Shared {
    fn gate(&self, sessions: Arc<MemorySessions>, version: VersionTag) -> UpgradeGate {
        let coordinator = SurvivalCoordinator::new(
            self.config.clone(),
            self.store.clone(),
            self.hosts.clone(),
            self.hosts.clone(),
            sessions,
        );
        UpgradeGate::new(
            coordinator,
            self.store.clone(),
            self.restarter.clone(),
            version,
        )
    }
}

fn session_ids(opts: &SimulateOpts) -> Vec<SessionId> {
    let mut ids: Vec<SessionId> = opts
        .seen
        .iter()
        .map(|(id, _)| *id)
        .chain(opts.unrestricted.iter().copied())
        .chain(opts.fail_session.iter().copied())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn migrations(thresholds: &[String]) -> anyhow::Result<MigrationRegistry> {
    let mut registry = MigrationRegistry::new();
    for raw in thresholds {
        let threshold = VersionTag::parse(raw)
            .with_context(|| format!("invalid migration threshold {raw:?}"))?;
        let name = format!("mark-{threshold}");
        let label = name.clone();
        registry.register(threshold, name, move |state| {
            if let Some(doc) = state.policy.document_mut().as_object_mut() {
                let applied = doc.entry("migrations").or_insert_with(|| json!([]));
                if let Some(list) = applied.as_array_mut() {
                    list.push(json!(label));
                }
            }
        });
    }
    Ok(registry)
}

fn describe(state: &RuntimeState) -> Value {
    json!({
        "policy": state.policy.document(),
        "unrestricted": state.unrestricted,
    })
}

pub async fn run(opts: &SimulateOpts, config: SurvivalConfig) -> anyhow::Result<Value> {
    let from = VersionTag::parse(&opts.from).context("invalid --from version")?;
    let to = VersionTag::parse(&opts.to).context("invalid --to version")?;
    let policy: Value = serde_json::from_str(&opts.policy).context("--policy is not JSON")?;
    let registry = migrations(&opts.migrate_at)?;

    let shared = Shared {
        config,
        store: Arc::new(MemoryStore::new()),
        hosts: Arc::new(MemoryHosts::new().with_private_context()),
        restarter: Arc::new(CountingRestarter::new()),
    };
    let ids = session_ids(opts);
    let markers: BTreeMap<SessionId, String> = opts.seen.iter().cloned().collect();

    // Generation one: live state, update staged.
    let before = ids.iter().fold(MemorySessions::new(), |sessions, id| {
        sessions.with_session(*id, markers.get(id).map(|m| json!(m)))
    });
    let live = RuntimeState::new(Policy::new(policy))
        .with_unrestricted(opts.unrestricted.iter().copied());
    let update = shared
        .gate(Arc::new(before), from)
        .on_update_available(&UpdateDetails { version: opts.to.clone() }, &live)
        .await;
    tracing::info!(?update, "generation one finished");

    // Generation two: fresh process, default state.
    let after = ids.iter().fold(MemorySessions::new(), |sessions, id| {
        sessions.with_session(*id, None)
    });
    let after = Arc::new(
        opts.fail_session
            .iter()
            .fold(after, |sessions, id| sessions.failing_forward(*id)),
    );
    let gate = shared.gate(after.clone(), to).with_migrations(registry);
    let mut state = RuntimeState::default();
    let install = gate
        .on_installed(
            &InstallDetails {
                reason: InstallReason::Update,
                previous_version: Some(opts.from.clone()),
            },
            &mut state,
        )
        .await;
    tracing::info!(?install, "generation two finished");

    Ok(json!({
        "update": update,
        "install": install,
        "restarts": shared.restarter.restarts(),
        "state": describe(&state),
        "forwarded": after.received(),
        "storedPolicy": shared.store.peek(
            &shared.config.policy_namespace,
            &shared.config.policy_key,
        ),
        "recordPending": gate.coordinator().records().is_pending().await?,
        "liveHosts": shared.hosts.live_hosts(),
    }))
}
