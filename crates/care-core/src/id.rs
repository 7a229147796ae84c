//! # Opaque Identifiers
//!
//! Every persisted record is keyed by a 20-character string over the
//! URL-safe alphabet `[0-9A-Za-z_-]`. The alphabet has exactly 64 symbols,
//! so masking a random byte to 6 bits selects a symbol without bias.
//! Identifiers carry no ordering or embedded information.

use rand_core::{OsRng, RngCore};

/// Length of every generated identifier.
pub const ID_LEN: usize = 20;

const ALPHABET: &[u8; 64] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_-";

/// Generate a fresh identifier from the operating system CSPRNG.
pub fn new_id() -> String {
    let mut bytes = [0u8; ID_LEN];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| ALPHABET[(b & 0x3f) as usize] as char)
        .collect()
}

/// Whether `value` has the shape of a generated identifier.
pub fn is_valid_id(value: &str) -> bool {
    value.len() == ID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_have_expected_shape() {
        for _ in 0..1_000 {
            let id = new_id();
            assert_eq!(id.len(), ID_LEN);
            assert!(is_valid_id(&id), "bad id: {id}");
        }
    }

    #[test]
    fn generated_ids_do_not_collide_in_small_sample() {
        let ids: HashSet<String> = (0..10_000).map(|_| new_id()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn rejects_wrong_length_and_alphabet() {
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("short"));
        assert!(!is_valid_id("abcdefghijklmnopqrs!"));
        assert!(!is_valid_id("abcdefghijklmnopqrstu"));
        assert!(is_valid_id("abcdefghij_-ABCDE123"));
    }

    proptest::proptest! {
        #[test]
        fn validity_matches_alphabet(s in "[0-9A-Za-z_-]{20}") {
            proptest::prop_assert!(is_valid_id(&s));
        }

        #[test]
        fn other_lengths_are_invalid(s in "[0-9A-Za-z_-]{0,19}") {
            proptest::prop_assert!(!is_valid_id(&s));
        }
    }
}
