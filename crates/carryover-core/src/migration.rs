//! Version-gated migration actions.
//!
//! Each action is registered with a threshold version and runs on an update
//! whose previous version is `<=` that threshold. Actions run in ascending
//! threshold order; registration order breaks ties.

use std::fmt;

use crate::types::RuntimeState;
use crate::version::VersionTag;

pub type MigrationAction = Box<dyn Fn(&mut RuntimeState) + Send + Sync>;

/// One registered `(threshold, action)` pair.
pub struct Migration {
    threshold: VersionTag,
    name: String,
    action: MigrationAction,
}

impl Migration {
    pub fn threshold(&self) -> &VersionTag {
        &self.threshold
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether an update from `previous` must run this action.
    pub fn applies_to(&self, previous: &VersionTag) -> bool {
        previous <= &self.threshold
    }

    /// Mutate `state`. Actions are expected to be idempotent.
    pub fn apply(&self, state: &mut RuntimeState) {
        (self.action)(state);
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("threshold", &self.threshold)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Ordered list of migrations evaluated at startup after an update.
#[derive(Debug, Default)]
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, threshold: VersionTag, name: impl Into<String>, action: F) -> &mut Self
    where
        F: Fn(&mut RuntimeState) + Send + Sync + 'static,
    {
        let migration = Migration {
            threshold,
            name: name.into(),
            action: Box::new(action),
        };
        // Insert after every entry with threshold <= ours: stable ascending order.
        let at = self
            .migrations
            .partition_point(|m| m.threshold <= migration.threshold);
        self.migrations.insert(at, migration);
        self
    }

    /// Migrations that apply to an update from `previous`, in run order.
    pub fn pending<'a>(&'a self, previous: &'a VersionTag) -> impl Iterator<Item = &'a Migration> + 'a {
        self.migrations.iter().filter(move |m| m.applies_to(previous))
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}
