//! carryover-runtime: carries an in-memory runtime state (policy plus
//! per-session bookkeeping) across a forced restart.
//!
//! The state is encrypted under a one-time key, parked in a rendezvous host
//! that survives the restart, and fetched back on the next startup. Only the
//! key and a host reference touch durable storage, and both are consumed
//! exactly once.

pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod memory;
pub mod record;
pub mod rendezvous;

pub use collaborators::{
    HostHandle, HostProvider, HostStatus, KvStore, Messenger, Restarter, Sessions,
};
pub use config::SurvivalConfig;
pub use coordinator::{ForwardReport, RestoreOutcome, SaveReport, SurvivalCoordinator};
pub use error::SurvivalError;
pub use gate::{
    InstallDetails, InstallOutcome, InstallReason, UpdateDetails, UpdateOutcome, UpgradeGate,
};
pub use record::{RecordStore, SurvivalRecord};
pub use rendezvous::{HostPhase, RendezvousHost};
