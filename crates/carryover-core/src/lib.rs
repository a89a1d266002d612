//! carryover-core: pure data model for carrying runtime state across a
//! forced restart. No IO, no async, no crypto.

pub mod error;
pub mod migration;
pub mod payload;
pub mod types;
pub mod version;

pub use error::{PayloadError, VersionError};
pub use migration::{Migration, MigrationRegistry};
pub use payload::SurvivalPayload;
pub use types::{Marker, Policy, RuntimeState, SessionId};
pub use version::VersionTag;
