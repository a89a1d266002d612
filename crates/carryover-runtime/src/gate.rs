//! Lifecycle entry points: what to do when an update is staged and when the
//! process comes back up after one.
//!
//! Nothing here returns an error. Every failure below is logged and the
//! lifecycle proceeds as if the failed step had not happened, so neither
//! startup nor an update is ever blocked by survival.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use carryover_core::{MigrationRegistry, RuntimeState, VersionTag};
use serde::{Deserialize, Serialize};

use crate::collaborators::{KvStore, Restarter};
use crate::coordinator::{RestoreOutcome, SurvivalCoordinator};
use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallReason {
    Install,
    Update,
    BrowserUpdate,
    SharedModuleUpdate,
}

/// Payload of an "installed/updated" notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallDetails {
    pub reason: InstallReason,
    #[serde(default)]
    pub previous_version: Option<String>,
}

/// Payload of an "update available" notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDetails {
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum InstallOutcome {
    /// A notification was already handled in this process generation.
    AlreadyHandled,
    /// Not an update: fresh install or an unrelated reason.
    NotAnUpdate,
    /// The previous version is missing or unparseable; no migrations ran.
    UnknownPrevious { restored: bool },
    /// Previous version is newer than the running one.
    Rollback { restored: bool },
    Upgraded { restored: bool, migrations: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum UpdateOutcome {
    /// Staged version is older than the running one; dropped.
    Downgrade,
    /// Restart forced; `saved` tells whether state was handed off.
    Restarted { saved: bool },
}

pub struct UpgradeGate {
    coordinator: SurvivalCoordinator,
    store: Arc<dyn KvStore>,
    restarter: Arc<dyn Restarter>,
    migrations: MigrationRegistry,
    current_version: VersionTag,
    install_handled: AtomicBool,
}

impl UpgradeGate {
    pub fn new(
        coordinator: SurvivalCoordinator,
        store: Arc<dyn KvStore>,
        restarter: Arc<dyn Restarter>,
        current_version: VersionTag,
    ) -> Self {
        Self {
            coordinator,
            store,
            restarter,
            migrations: MigrationRegistry::new(),
            current_version,
            install_handled: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_migrations(mut self, migrations: MigrationRegistry) -> Self {
        self.migrations = migrations;
        self
    }

    pub fn current_version(&self) -> &VersionTag {
        &self.current_version
    }

    pub fn coordinator(&self) -> &SurvivalCoordinator {
        &self.coordinator
    }

    /// Handle the "installed/updated" notification. Only the first call per
    /// gate does anything.
    pub async fn on_installed(&self, details: &InstallDetails, state: &mut RuntimeState) -> InstallOutcome {
        if self.install_handled.swap(true, Ordering::SeqCst) {
            tracing::debug!("install notification already handled");
            return InstallOutcome::AlreadyHandled;
        }
        if details.reason != InstallReason::Update {
            return InstallOutcome::NotAnUpdate;
        }

        let restored = match self.coordinator.restore(state).await {
            Ok(RestoreOutcome::Restored { .. }) => true,
            Ok(RestoreOutcome::NothingPending) => false,
            Err(e) => {
                tracing::warn!(error = %e, "survived state could not be restored");
                false
            }
        };

        let previous = match details.previous_version.as_deref().map(VersionTag::parse) {
            Some(Ok(previous)) => previous,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "unparseable previous version, skipping migrations");
                return InstallOutcome::UnknownPrevious { restored };
            }
            None => {
                tracing::warn!("update without previous version, skipping migrations");
                return InstallOutcome::UnknownPrevious { restored };
            }
        };

        if previous > self.current_version {
            tracing::info!(%previous, current = %self.current_version, "rollback detected, no migrations");
            return InstallOutcome::Rollback { restored };
        }

        let mut ran = Vec::new();
        for migration in self.migrations.pending(&previous) {
            tracing::info!(
                migration = migration.name(),
                threshold = %migration.threshold(),
                %previous,
                "running migration"
            );
            migration.apply(state);
            if let Err(e) = self.save_policy(state).await {
                tracing::warn!(migration = migration.name(), error = %e, "migrated policy not persisted");
            }
            ran.push(migration.name().to_string());
        }

        InstallOutcome::Upgraded {
            restored,
            migrations: ran,
        }
    }

    /// Handle the "update available" notification: save state for the
    /// next generation, then force the restart that applies the update.
    pub async fn on_update_available(&self, details: &UpdateDetails, state: &RuntimeState) -> UpdateOutcome {
        match VersionTag::parse(&details.version) {
            Ok(staged) if staged < self.current_version => {
                tracing::info!(%staged, current = %self.current_version, "staged downgrade, survival skipped");
                return UpdateOutcome::Downgrade;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, version = %details.version, "unparseable staged version, attempting survival");
            }
        }

        let saved = match self.coordinator.save(state).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "runtime state not saved, updating without survival");
                false
            }
        };

        self.restarter.restart();
        UpdateOutcome::Restarted { saved }
    }

    async fn save_policy(&self, state: &RuntimeState) -> Result<(), StoreError> {
        let config = self.coordinator.config();
        self.store
            .set(&config.policy_namespace, &config.policy_key, state.policy.dry(false))
            .await
    }
}
