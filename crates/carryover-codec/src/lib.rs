//! carryover-codec: one-time symmetric encryption for the survival hand-off.
//! AES-256-GCM with a fresh key and IV per call, plus the base64 transport
//! helpers used to move ciphertext and key material as text.

pub mod cipher;
pub mod error;
pub mod key;
pub mod transport;

pub use cipher::{Sealed, decrypt, encrypt};
pub use error::CodecError;
pub use key::{ExportedKey, IV_LEN, KEY_LEN, OneTimeKey};
pub use transport::{from_transport, to_transport};
