//! API token generation and comparison
//!
//! Tokens are 32 random bytes, hex-encoded. Only the SHA-256 digest of a
//! token is ever persisted.

use data_encoding::HEXLOWER;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Generate a fresh API token
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    HEXLOWER.encode(&bytes)
}

/// Digest stored in place of a token
pub fn hash_token(token: &str) -> String {
    HEXLOWER.encode(&Sha256::digest(token.as_bytes()))
}

/// Constant-time token comparison over SHA-256 digests
pub fn tokens_match(provided: &str, expected: &str) -> bool {
    let a = Sha256::digest(provided.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Constant-time comparison of a token against a stored digest
pub fn token_matches_hash(provided: &str, stored_hash: &str) -> bool {
    let digest = hash_token(provided);
    digest.len() == stored_hash.len()
        && digest
            .bytes()
            .zip(stored_hash.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}
