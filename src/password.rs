//! Password hashing.
//!
//! Hashes are Argon2id PHC strings with a random per-password salt. Callers
//! only need hash-and-compare, so the algorithm sits behind [`PasswordHasher`].

use anyhow::{Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher as _, PasswordVerifier as _, password_hash::SaltString,
};
use rand::{RngCore, rngs::OsRng};

pub trait PasswordHasher: Send + Sync {
    /// # Errors
    /// Returns an error if the hash cannot be computed.
    fn hash(&self, password: &str) -> Result<String>;

    /// False for a wrong password and for a malformed stored hash.
    fn verify(&self, password: &str, stored_hash: &str) -> bool;
}

#[derive(Clone, Default)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl Argon2Hasher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String> {
        let mut salt = [0u8; 16];
        OsRng.fill_bytes(&mut salt);
        let salt = SaltString::encode_b64(&salt).map_err(|err| anyhow!("invalid salt: {err}"))?;
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| anyhow!("failed to hash password: {err}"))?;
        Ok(hash.to_string())
    }

    fn verify(&self, password: &str, stored_hash: &str) -> bool {
        PasswordHash::new(stored_hash).is_ok_and(|parsed| {
            self.argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
    }
}
