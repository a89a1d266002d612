//! Error types for the survival runtime.

use carryover_codec::CodecError;
use carryover_core::SessionId;
use thiserror::Error;

use crate::collaborators::HostHandle;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend failed: {0}")]
    Backend(String),

    #[error("stored value is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("no such host: {0}")]
    NoSuchHost(HostHandle),

    #[error("operation not supported by this host provider")]
    Unsupported,

    #[error("host provider failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum MessageError {
    /// The host exists but nothing listens on it yet.
    #[error("receiving endpoint does not exist")]
    EndpointMissing,

    #[error("no such host")]
    NoSuchHost,

    #[error("message failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} is gone")]
    Gone(SessionId),

    #[error("session query failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure taxonomy of a survival event.
///
/// None of these are surfaced past the lifecycle entry points; see
/// [`crate::gate::UpgradeGate`].
#[derive(Debug, Error)]
pub enum SurvivalError {
    #[error("one-time key generation failed: {0}")]
    KeyGenFailure(String),

    #[error("cannot create rendezvous host: {0}")]
    HostCreateFailure(ProviderError),

    #[error("rendezvous host unreachable: {0}")]
    HostUnreachable(String),

    #[error("delivery to rendezvous host failed: {0}")]
    Delivery(MessageError),

    #[error("survived state failed authentication")]
    IntegrityError,

    #[error("survived state is malformed: {0}")]
    MalformedPayload(String),

    #[error("cannot forward marker to session {session}: {source}")]
    PerSessionForwardFailure {
        session: SessionId,
        #[source]
        source: SessionError,
    },

    #[error("rendezvous host handle missing")]
    NoHost,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(CodecError),
}

impl From<CodecError> for SurvivalError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::KeyGen(msg) => Self::KeyGenFailure(msg),
            CodecError::Integrity => Self::IntegrityError,
            other => Self::Codec(other),
        }
    }
}
