//! AES-256-GCM seal/open with a fresh key per call.

use aes_gcm::Aes256Gcm;
use aes_gcm::aead::{Aead, KeyInit};
use zeroize::Zeroizing;

use crate::error::CodecError;
use crate::key::{ExportedKey, OneTimeKey};

/// Output of [`encrypt`]: the ciphertext (tag appended) and the exported key
/// needed to open it.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub key: ExportedKey,
}

/// Encrypt `plaintext` under a newly generated one-time key.
///
/// The plaintext key lives only for the duration of this call.
pub fn encrypt(plaintext: &[u8]) -> Result<Sealed, CodecError> {
    let otk = OneTimeKey::generate()?;
    let cipher = Aes256Gcm::new(otk.key_bytes().into());
    let ciphertext = cipher
        .encrypt(otk.iv().into(), plaintext)
        .map_err(|_| CodecError::Seal)?;
    Ok(Sealed {
        ciphertext,
        key: otk.export(),
    })
}

/// Authenticated decryption. Any tampering with the ciphertext, key or IV
/// yields [`CodecError::Integrity`], never altered plaintext. The
/// plaintext is wiped when the returned buffer drops.
pub fn decrypt(ciphertext: &[u8], key: &ExportedKey) -> Result<Zeroizing<Vec<u8>>, CodecError> {
    let otk = key.import()?;
    let cipher = Aes256Gcm::new(otk.key_bytes().into());
    cipher
        .decrypt(otk.iv().into(), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CodecError::Integrity)
}
