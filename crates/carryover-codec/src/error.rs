//! Error types for the codec.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("key generation failed: {0}")]
    KeyGen(String),

    #[error("ciphertext failed authentication")]
    Integrity,

    #[error("encryption failed")]
    Seal,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid transport text: {0}")]
    Transport(#[from] base64::DecodeError),
}
