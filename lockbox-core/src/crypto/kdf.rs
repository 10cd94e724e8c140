//! PBKDF2 key derivation for master password processing.
//!
//! Uses PBKDF2-HMAC-SHA256 with parameters:
//! - Salt: the user's stable identifier
//! - Iterations: fixed at build time ([`PBKDF2_ITERATIONS`])
//! - Output length: 32 bytes (256 bits)

use crate::crypto::{keyring::SessionKey, CryptoError, Result};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// Iteration count used for every master-password derivation.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Derived key length in bytes.
pub const KEY_LENGTH: usize = 32;

/// Parameters for PBKDF2 key derivation
///
/// The salt is not part of the parameters: it is always the user id, so the
/// same password reproduces the same key on every device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Number of HMAC-SHA256 iterations
    pub iterations: u32,

    /// Output length in bytes
    pub output_length: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: PBKDF2_ITERATIONS,
            output_length: KEY_LENGTH as u32,
        }
    }
}

impl KdfParams {
    /// Verify that parameters are within acceptable ranges
    pub fn validate(&self) -> Result<()> {
        if self.iterations < 1 {
            return Err(CryptoError::KdfFailed(
                "Iteration count too low (minimum: 1)".to_string(),
            ));
        }
        if self.output_length as usize != KEY_LENGTH {
            return Err(CryptoError::KdfFailed(format!(
                "Output length must be {} bytes",
                KEY_LENGTH
            )));
        }
        Ok(())
    }
}

/// Derive the session key for `user_id` from a master password.
///
/// Deterministic: the same password and user id always give the same key.
/// Password strength is not checked here.
pub fn derive_session_key(password: &[u8], user_id: &str) -> Result<SessionKey> {
    derive_with_params(password, user_id, &KdfParams::default())
}

/// Derive a session key with explicit parameters.
pub fn derive_with_params(
    password: &[u8],
    user_id: &str,
    params: &KdfParams,
) -> Result<SessionKey> {
    params.validate()?;

    if user_id.is_empty() {
        return Err(CryptoError::KdfFailed(
            "User id is required as salt".to_string(),
        ));
    }

    let mut key = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(password, user_id.as_bytes(), params.iterations, &mut key);

    Ok(SessionKey::from_bytes(key))
}
