//! PIN hashing for self-service cancellation. Argon2id, PHC strings.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use tracing::warn;

use crate::limits::{PIN_HASH_ITERATIONS, PIN_HASH_MEMORY_KIB};

#[derive(Debug)]
pub enum PinError {
    Hash(String),
    /// The blocking task was cancelled or panicked.
    Join(String),
}

impl std::fmt::Display for PinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinError::Hash(e) => write!(f, "PIN hashing failed: {e}"),
            PinError::Join(e) => write!(f, "PIN hashing task failed: {e}"),
        }
    }
}

impl std::error::Error for PinError {}

fn hasher() -> Result<Argon2<'static>, PinError> {
    let params = Params::new(PIN_HASH_MEMORY_KIB, PIN_HASH_ITERATIONS, 1, None)
        .map_err(|e| PinError::Hash(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

pub fn hash_pin(pin: &str) -> Result<String, PinError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = hasher()?
        .hash_password(pin.as_bytes(), &salt)
        .map_err(|e| PinError::Hash(e.to_string()))?;
    Ok(hash.to_string())
}

/// A malformed stored hash never matches.
pub fn verify_pin(pin: &str, phc: &str) -> bool {
    let parsed = match PasswordHash::new(phc) {
        Ok(p) => p,
        Err(e) => {
            warn!("unparseable PIN hash on record: {e}");
            return false;
        }
    };
    // Cost parameters come from the PHC string, not from `hasher()`.
    Argon2::default()
        .verify_password(pin.as_bytes(), &parsed)
        .is_ok()
}

/// [`hash_pin`] on the blocking pool.
pub async fn hash_pin_blocking(pin: String) -> Result<String, PinError> {
    tokio::task::spawn_blocking(move || hash_pin(&pin))
        .await
        .map_err(|e| PinError::Join(e.to_string()))?
}

/// [`verify_pin`] on the blocking pool. A failed task counts as a mismatch.
pub async fn verify_pin_blocking(pin: String, phc: String) -> bool {
    tokio::task::spawn_blocking(move || verify_pin(&pin, &phc))
        .await
        .unwrap_or(false)
}
