//! Safety-number fingerprints for out-of-band identity verification.
//!
//! A fingerprint digests an identity key together with its owner's user id
//! through 5200 rounds of SHA-512 (the iteration count the Signal
//! application uses; changing it changes every displayed number) and renders
//! the first 30 bytes as 30 decimal digits. A safety number joins both
//! parties' fingerprints in a canonical order so that either side computes
//! the same 60-digit string.

use crate::keys::PublicKey;
use sha2::{Digest, Sha512};

/// SHA-512 rounds applied to the identity digest
const ITERATIONS: usize = 5200;

/// Digits in a single fingerprint
const FINGERPRINT_DIGITS: usize = 30;

/// Compute the 30-digit fingerprint of an identity key
///
/// Deterministic: the same key and user id always yield the same digits.
#[must_use]
pub fn fingerprint(identity: &PublicKey, user_id: &str) -> String {
    let mut digest = Vec::with_capacity(32 + user_id.len());
    digest.extend_from_slice(identity.as_bytes());
    digest.extend_from_slice(user_id.as_bytes());

    for _ in 0..ITERATIONS {
        digest = Sha512::digest(&digest).to_vec();
    }

    let mut digits = String::with_capacity(FINGERPRINT_DIGITS);
    for chunk in digest[..FINGERPRINT_DIGITS].chunks(5) {
        // 5-byte big-endian group reduced to 5 decimal digits
        let mut value: u64 = 0;
        for &byte in chunk {
            value = value << 8 | u64::from(byte);
        }
        digits.push_str(&format!("{:05}", value % 100_000));
    }
    digits
}

/// Compute the spaced 60-digit safety number for a conversation
///
/// Fingerprints are ordered by the lexicographically smaller user id, so
/// `safety_number(a, b) == safety_number(b, a)`.
#[must_use]
pub fn safety_number(local: (&PublicKey, &str), remote: (&PublicKey, &str)) -> String {
    let (first, second) = if local.1 <= remote.1 {
        (local, remote)
    } else {
        (remote, local)
    };

    let combined = format!(
        "{}{}",
        fingerprint(first.0, first.1),
        fingerprint(second.0, second.1)
    );

    combined
        .as_bytes()
        .chunks(5)
        .map(|chunk| std::str::from_utf8(chunk).expect("digits are ASCII"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_golden() {
        let alice_key = PublicKey::from_bytes([0x11; 32]);
        assert_eq!(
            fingerprint(&alice_key, "alice"),
            "678380203867683042279811905755"
        );

        let bob_key = PublicKey::from_bytes([0x22; 32]);
        assert_eq!(
            fingerprint(&bob_key, "bob"),
            "607990117636093434561590785169"
        );
    }

    #[test]
    fn test_safety_number_golden() {
        let alice_key = PublicKey::from_bytes([0x11; 32]);
        let bob_key = PublicKey::from_bytes([0x22; 32]);

        let expected =
            "67838 02038 67683 04227 98119 05755 60799 01176 36093 43456 15907 85169";
        assert_eq!(
            safety_number((&alice_key, "alice"), (&bob_key, "bob")),
            expected
        );
    }

    #[test]
    fn test_safety_number_symmetric() {
        let alice_key = PublicKey::from_bytes([0x11; 32]);
        let bob_key = PublicKey::from_bytes([0x22; 32]);

        assert_eq!(
            safety_number((&alice_key, "alice"), (&bob_key, "bob")),
            safety_number((&bob_key, "bob"), (&alice_key, "alice")),
        );
    }

    #[test]
    fn test_safety_number_shape() {
        let a = PublicKey::from_bytes([0x33; 32]);
        let b = PublicKey::from_bytes([0x44; 32]);
        let number = safety_number((&a, "user-a"), (&b, "user-b"));

        let digits: Vec<&str> = number.split(' ').collect();
        assert_eq!(digits.len(), 12);
        for group in digits {
            assert_eq!(group.len(), 5);
            assert!(group.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_fingerprint_sensitive_to_user_id() {
        let key = PublicKey::from_bytes([0x55; 32]);
        assert_ne!(fingerprint(&key, "alice"), fingerprint(&key, "bob"));
    }
}
