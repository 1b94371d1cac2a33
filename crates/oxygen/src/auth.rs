//! Password digests for login.
//!
//! The server never sees the plain password. The client sends a digest
//! of it, and the server compares digests. The digest function is a
//! trait so a test (or a server with a different scheme) can swap it.

use sha2::{Digest, Sha256};

/// Turns a password into the bytes sent in a login request.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Vec<u8>;
}

/// SHA-256 of the UTF-8 password. What the Oxygen server expects.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl PasswordHasher for Sha256Hasher {
    fn hash(&self, password: &str) -> Vec<u8> {
        Sha256::digest(password.as_bytes()).to_vec()
    }
}
