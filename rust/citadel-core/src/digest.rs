//! SHA-256 / SHA-512 digest helpers.

use sha2::{Digest, Sha256, Sha512};

/// SHA-256 digest of `bytes`.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// SHA-512 digest of `bytes`.
pub fn sha512(bytes: &[u8]) -> [u8; 64] {
    Sha512::digest(bytes).into()
}

/// Hex-encoded SHA-256 digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(sha256(bytes))
}

/// Hex-encoded SHA-512 digest of `bytes`.
pub fn sha512_hex(bytes: &[u8]) -> String {
    hex::encode(sha512(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"hello world!"),
            "7509e5bda0c762d2bac7f90d758b5b2263fa01ccbc542ab5e3df163be08e6ca9"
        );
    }

    #[test]
    fn test_sha512_length() {
        assert_eq!(sha512(b"x").len(), 64);
        assert_eq!(sha512_hex(b"x").len(), 128);
    }
}
