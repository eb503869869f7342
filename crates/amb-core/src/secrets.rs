//! Client key and admin token digests.
//!
//! Secrets never persist in plaintext: configuration stores lowercase
//! hex-encoded SHA-256 digests, and every comparison against a presented
//! secret is constant-time.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{BridgeError, BridgeResult};

/// A parsed SHA-256 digest of a client secret or admin token.
#[derive(Clone, Copy)]
pub struct KeyDigest([u8; 32]);

impl KeyDigest {
    /// Digest a plaintext secret.
    pub fn of(secret: &str) -> Self {
        Self(Sha256::digest(secret.as_bytes()).into())
    }

    /// Parse a stored digest from its lowercase hex form.
    ///
    /// The length check here is the only non-constant-time step; it runs at
    /// config load, never against attacker-supplied input.
    pub fn parse_hex(s: &str) -> BridgeResult<Self> {
        if s.len() != 64 {
            return Err(BridgeError::Config(format!(
                "key hash must be 64 hex chars, got {}",
                s.len()
            )));
        }
        let bytes = hex::decode(s)
            .map_err(|e| BridgeError::Config(format!("invalid key hash hex: {e}")))?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|_| BridgeError::Config("key hash must decode to 32 bytes".into()))?;
        Ok(Self(digest))
    }

    /// Constant-time equality against the digest of a presented secret.
    pub fn matches(&self, presented: &str) -> bool {
        let computed = Sha256::digest(presented.as_bytes());
        bool::from(self.0.as_slice().ct_eq(computed.as_slice()))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for KeyDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyDigest({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_round_trips_through_hex() {
        let d = KeyDigest::of("s3cret");
        let parsed = KeyDigest::parse_hex(&d.to_hex()).unwrap();
        assert!(parsed.matches("s3cret"));
    }

    #[test]
    fn wrong_secret_does_not_match() {
        let d = KeyDigest::of("s3cret");
        assert!(!d.matches("S3cret"));
        assert!(!d.matches(""));
    }

    #[test]
    fn hex_is_lowercase_sha256() {
        // sha256("test") — well-known vector
        let d = KeyDigest::of("test");
        assert_eq!(
            d.to_hex(),
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }

    #[test]
    fn parse_rejects_bad_length_and_bad_hex() {
        assert!(KeyDigest::parse_hex("abcd").is_err());
        assert!(KeyDigest::parse_hex(&"g".repeat(64)).is_err());
    }
}
