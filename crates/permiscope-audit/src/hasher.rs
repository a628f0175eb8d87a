// hasher.rs — Chain hashing and entry signatures.
//
// Without a secret the chain uses plain SHA-256 (hex). With a secret every
// link becomes HMAC-SHA256 (hex) and every entry carries a base64 HMAC
// signature, so a forger who rewrites the file cannot recompute either
// without the key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::hmac;
use sha2::{Digest, Sha256};

/// `previousHash` of the first entry in a log.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Hash arbitrary bytes, returning a lowercase hex-encoded SHA-256 string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash a UTF-8 string, returning a lowercase hex-encoded SHA-256 string.
pub fn hash_str(s: &str) -> String {
    hash_bytes(s.as_bytes())
}

/// Computes chain links and signatures, keyed or not.
#[derive(Clone)]
pub enum ChainHasher {
    Plain,
    Keyed(hmac::Key),
}

impl ChainHasher {
    /// Keyed when a non-empty secret is given.
    pub fn new(secret: Option<&str>) -> Self {
        match secret.filter(|s| !s.is_empty()) {
            Some(secret) => ChainHasher::Keyed(hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes())),
            None => ChainHasher::Plain,
        }
    }

    pub fn is_keyed(&self) -> bool {
        matches!(self, ChainHasher::Keyed(_))
    }

    /// Hash of one raw log line, used as the next entry's `previousHash`.
    pub fn chain_hash(&self, line: &[u8]) -> String {
        match self {
            ChainHasher::Plain => hash_bytes(line),
            ChainHasher::Keyed(key) => hex::encode(hmac::sign(key, line).as_ref()),
        }
    }

    /// Base64 HMAC of a signing payload; `None` for an unkeyed hasher.
    pub fn sign(&self, payload: &[u8]) -> Option<String> {
        match self {
            ChainHasher::Plain => None,
            ChainHasher::Keyed(key) => Some(STANDARD.encode(hmac::sign(key, payload).as_ref())),
        }
    }

    /// Constant-time signature check. Always false for an unkeyed hasher.
    pub fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        let ChainHasher::Keyed(key) = self else {
            return false;
        };
        match STANDARD.decode(signature) {
            Ok(tag) => hmac::verify(key, payload, &tag).is_ok(),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for ChainHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainHasher::Plain => f.write_str("ChainHasher::Plain"),
            ChainHasher::Keyed(_) => f.write_str("ChainHasher::Keyed(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_known_value() {
        // SHA-256("") = e3b0c442...b855
        assert_eq!(
            hash_str(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hash_is_lowercase_hex() {
        let hash = hash_str("test");
        assert_eq!(hash.len(), 64);
        assert!(hash
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn genesis_is_64_zeros() {
        assert_eq!(GENESIS_HASH.len(), 64);
        assert!(GENESIS_HASH.chars().all(|c| c == '0'));
    }

    #[test]
    fn plain_chain_hash_is_sha256() {
        let h = ChainHasher::new(None);
        assert!(!h.is_keyed());
        assert_eq!(h.chain_hash(b"line"), hash_str("line"));
        assert!(h.sign(b"line").is_none());
        assert!(!h.verify_signature(b"line", "anything"));
    }

    #[test]
    fn empty_secret_means_plain() {
        assert!(!ChainHasher::new(Some("")).is_keyed());
    }

    #[test]
    fn keyed_hash_depends_on_secret() {
        let a = ChainHasher::new(Some("secret-a"));
        let b = ChainHasher::new(Some("secret-b"));
        assert!(a.is_keyed());
        assert_ne!(a.chain_hash(b"line"), hash_str("line"));
        assert_ne!(a.chain_hash(b"line"), b.chain_hash(b"line"));
        assert_eq!(a.chain_hash(b"line").len(), 64);
    }

    #[test]
    fn signatures_verify_only_with_same_key() {
        let a = ChainHasher::new(Some("secret-a"));
        let b = ChainHasher::new(Some("secret-b"));
        let sig = a.sign(b"payload").unwrap();
        assert!(a.verify_signature(b"payload", &sig));
        assert!(!a.verify_signature(b"payload2", &sig));
        assert!(!b.verify_signature(b"payload", &sig));
        assert!(!a.verify_signature(b"payload", "not base64!"));
    }

    #[test]
    fn debug_hides_key() {
        let a = ChainHasher::new(Some("hunter2"));
        assert!(!format!("{:?}", a).contains("hunter2"));
    }
}
