//! Error types for the pure data model.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("empty version string")]
    Empty,

    #[error("invalid version segment {segment:?} in {version:?}")]
    InvalidSegment { version: String, segment: String },
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload carries no policy")]
    MissingPolicy,

    #[error("payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}
