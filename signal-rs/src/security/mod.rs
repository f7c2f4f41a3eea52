//! Security module
//!
//! - [`token`]: API token generation, hashing and constant-time comparison

pub mod token;

pub use token::{generate_token, hash_token, token_matches_hash, tokens_match};
