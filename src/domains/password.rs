//! Move-only password secret and PBKDF2 hashing.

use std::fmt;

use pbkdf2::pbkdf2_hmac;
use serde::Deserialize;
use sha2::Sha256;

/// PBKDF2 iteration count.
pub const HASH_ROUNDS: u32 = 10_000;
/// Salt length in bytes.
pub const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PasswordError {
    #[error("Password already consumed")]
    AlreadyConsumed,
}

/// A plaintext password that can be read exactly once.
///
/// Taking the secret leaves the wrapper empty; any later read fails with
/// [`PasswordError::AlreadyConsumed`]. `Debug` never prints the secret.
#[derive(Deserialize)]
#[serde(from = "String")]
pub struct Password(Option<String>);

impl Password {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Some(secret.into()))
    }

    /// Move the secret out.
    pub fn take(&mut self) -> Result<String, PasswordError> {
        self.0.take().ok_or(PasswordError::AlreadyConsumed)
    }

    /// Length in characters, without consuming the secret.
    pub fn char_count(&self) -> Result<usize, PasswordError> {
        self.0
            .as_deref()
            .map(|s| s.chars().count())
            .ok_or(PasswordError::AlreadyConsumed)
    }

    pub fn is_consumed(&self) -> bool {
        self.0.is_none()
    }
}

impl From<String> for Password {
    fn from(secret: String) -> Self {
        Self::new(secret)
    }
}

impl From<&str> for Password {
    fn from(secret: &str) -> Self {
        Self::new(secret)
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("Password(***)"),
            None => f.write_str("Password(<consumed>)"),
        }
    }
}

/// Fresh random salt, hex encoded.
pub fn generate_salt() -> String {
    let salt: [u8; SALT_LEN] = rand::random();
    hex::encode(salt)
}

/// PBKDF2-HMAC-SHA256 of `secret` under `salt`, hex encoded.
pub fn hash_password(secret: &str, salt: &str) -> String {
    let mut out = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt.as_bytes(), HASH_ROUNDS, &mut out);
    hex::encode(out)
}
