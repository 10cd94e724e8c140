//! Cryptographic primitives for the vault core.
//!
//! This module provides:
//! - PBKDF2-HMAC-SHA256 session key derivation
//! - A locally persisted fallback key for users without a master password
//! - AES-256-GCM and AES-256-CBC field encryption
//! - Shared-IV sealing of a record's secret fields

pub mod cipher;
pub mod envelope;
pub mod kdf;
pub mod keyring;

pub use cipher::{decrypt, encrypt, generate_iv, CipherMode, EncryptedField};
pub use envelope::SecretEnvelope;
pub use kdf::{derive_session_key, KdfParams, PBKDF2_ITERATIONS};
pub use keyring::{fallback_session_key, FileKeyStore, LocalKeyStore, SessionKey};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KdfFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid IV length for {mode}: expected {expected}, got {got}")]
    InvalidIv {
        mode: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Authentication failed - data may have been tampered with")]
    AuthenticationFailed,

    #[error("Key storage failed: {0}")]
    KeyStorage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CryptoError {
    /// Whether this error arose while reading ciphertext back.
    pub fn is_decryption(&self) -> bool {
        matches!(
            self,
            Self::DecryptionFailed(_) | Self::AuthenticationFailed | Self::InvalidIv { .. }
        )
    }
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
