use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

/// Hex SHA-1 over the lexicographically sorted concatenation of the shared
/// token, timestamp, and nonce. This is the platform's callback signature
/// scheme; the digest choice is theirs, not ours.
pub fn expected_signature(token: &str, timestamp: &str, nonce: &str) -> String {
    let mut parts = [token, timestamp, nonce];
    parts.sort_unstable();

    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Checks a callback signature in constant time.
pub fn verify_signature(signature: &str, timestamp: &str, nonce: &str, token: &str) -> bool {
    let expected = expected_signature(token, timestamp, nonce);
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    // SHA-1("abc"), the standard digest test vector. Independent of the
    // code under test.
    const SHA1_ABC: &str = "a9993e364706816aba3e25717850c26c9cd0d89d";

    #[test]
    fn matches_known_digest_vector() {
        assert_eq!(expected_signature("b", "c", "a"), SHA1_ABC);
        assert!(verify_signature(SHA1_ABC, "c", "a", "b"));
    }

    #[test]
    fn sorting_makes_parameter_order_irrelevant() {
        let sig = expected_signature("token", "1700000000", "nonce-1");
        assert!(verify_signature(&sig, "1700000000", "nonce-1", "token"));
        // Same three values with timestamp and nonce swapped still verify:
        // only the sorted multiset enters the digest.
        assert!(verify_signature(&sig, "nonce-1", "1700000000", "token"));
    }

    #[test]
    fn different_token_never_verifies() {
        let sig = expected_signature("token", "1700000000", "nonce-1");
        assert!(!verify_signature(&sig, "1700000000", "nonce-1", "other-token"));
        assert!(!verify_signature(&sig, "nonce-1", "1700000000", "other-token"));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let mut sig = expected_signature("token", "1700000000", "nonce-1");
        sig.replace_range(0..1, if sig.starts_with('0') { "1" } else { "0" });
        assert!(!verify_signature(&sig, "1700000000", "nonce-1", "token"));
        assert!(!verify_signature("", "1700000000", "nonce-1", "token"));
    }
}
