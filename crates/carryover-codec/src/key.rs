//! Single-use key material and its transportable form.

use std::fmt;

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CodecError;
use crate::transport::{from_transport, to_transport};

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;
/// GCM initialization vector length in bytes (96 bits).
pub const IV_LEN: usize = 12;

/// A freshly generated key + IV pair, wiped from memory on drop.
///
/// Never constructed twice with the same bytes: every [`OneTimeKey::generate`]
/// draws new material from the OS generator.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct OneTimeKey {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl OneTimeKey {
    pub fn generate() -> Result<Self, CodecError> {
        let mut otk = Self {
            key: [0; KEY_LEN],
            iv: [0; IV_LEN],
        };
        OsRng
            .try_fill_bytes(&mut otk.key)
            .map_err(|e| CodecError::KeyGen(e.to_string()))?;
        OsRng
            .try_fill_bytes(&mut otk.iv)
            .map_err(|e| CodecError::KeyGen(e.to_string()))?;
        Ok(otk)
    }

    pub(crate) fn key_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub(crate) fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    /// Transportable form suitable for durable storage.
    pub fn export(&self) -> ExportedKey {
        ExportedKey {
            key: to_transport(&self.key),
            iv: to_transport(&self.iv),
        }
    }
}

impl fmt::Debug for OneTimeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OneTimeKey(<redacted>)")
    }
}

/// Base64 form of a [`OneTimeKey`]. This is the only key representation
/// that crosses the persistence boundary.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ExportedKey {
    pub key: String,
    pub iv: String,
}

impl ExportedKey {
    /// Rebuild the key, rejecting material of the wrong length.
    pub fn import(&self) -> Result<OneTimeKey, CodecError> {
        let key = Zeroizing::new(from_transport(&self.key)?);
        let iv = Zeroizing::new(from_transport(&self.iv)?);

        let mut otk = OneTimeKey {
            key: [0; KEY_LEN],
            iv: [0; IV_LEN],
        };
        if key.len() != KEY_LEN {
            return Err(CodecError::InvalidKey(format!(
                "expected {KEY_LEN} key bytes, got {}",
                key.len()
            )));
        }
        if iv.len() != IV_LEN {
            return Err(CodecError::InvalidKey(format!(
                "expected {IV_LEN} iv bytes, got {}",
                iv.len()
            )));
        }
        otk.key.copy_from_slice(&key);
        otk.iv.copy_from_slice(&iv);
        Ok(otk)
    }
}

impl fmt::Debug for ExportedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExportedKey(<redacted>)")
    }
}
