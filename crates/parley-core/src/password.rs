//! Salted, iterated password hashing (PBKDF2-HMAC-SHA256).
//!
//! Stored form: hex salt, hex digest and the iteration count.

use crate::error::{ParleyError, ParleyResult};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

pub const SALT_LEN: usize = 32;
const DIGEST_LEN: usize = 32;
static ALGORITHM: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

/// A stored password verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash {
    pub salt: String,
    pub hash: String,
    pub iterations: u32,
}

impl PasswordHash {
    /// Hash `password` under a fresh random salt.
    pub fn generate(password: &str, iterations: u32) -> ParleyResult<Self> {
        let salt = generate_salt()?;
        let hash = hash_password(password, &salt, iterations)?;
        Ok(Self {
            salt: hex::encode(salt),
            hash,
            iterations,
        })
    }

    /// Constant-time check of `password` against this verifier.
    pub fn verify(&self, password: &str) -> bool {
        let Some(iterations) = NonZeroU32::new(self.iterations) else {
            return false;
        };
        let (Ok(salt), Ok(expected)) = (hex::decode(&self.salt), hex::decode(&self.hash)) else {
            return false;
        };
        pbkdf2::verify(ALGORITHM, iterations, &salt, password.as_bytes(), &expected).is_ok()
    }
}

/// `Hash(pass, salt, iterations) -> digest`, hex encoded.
pub fn hash_password(password: &str, salt: &[u8], iterations: u32) -> ParleyResult<String> {
    let iterations = NonZeroU32::new(iterations)
        .ok_or_else(|| ParleyError::Config("hash iteration count must be >= 1".into()))?;
    let mut out = [0u8; DIGEST_LEN];
    pbkdf2::derive(ALGORITHM, iterations, salt, password.as_bytes(), &mut out);
    Ok(hex::encode(out))
}

/// Random salt from the system CSPRNG.
pub fn generate_salt() -> ParleyResult<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| ParleyError::Internal("system RNG failure".into()))?;
    Ok(salt)
}
