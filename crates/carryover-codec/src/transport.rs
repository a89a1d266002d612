//! Binary-to-text helpers for carrying bytes through text-only channels.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::CodecError;

/// Encode bytes as padded standard base64.
pub fn to_transport(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode text produced by [`to_transport`].
pub fn from_transport(text: &str) -> Result<Vec<u8>, CodecError> {
    Ok(STANDARD.decode(text.as_bytes())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_sequence() {
        assert_eq!(to_transport(&[]), "");
        assert_eq!(from_transport("").expect("decode"), Vec::<u8>::new());
    }

    #[test]
    fn known_vector() {
        assert_eq!(to_transport(b"carry"), "Y2Fycnk=");
        assert_eq!(from_transport("Y2Fycnk=").expect("decode"), b"carry");
    }

    #[test]
    fn rejects_non_base64() {
        assert!(matches!(
            from_transport("not*base64"),
            Err(CodecError::Transport(_))
        ));
    }

    proptest! {
        #[test]
        fn transport_is_a_bijection(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let text = to_transport(&bytes);
            prop_assert_eq!(from_transport(&text).expect("decode"), bytes);
            prop_assert!(text.is_ascii());
        }
    }
}
