//! Lockbox vault core
//!
//! Client-side key derivation, per-record encryption of API credentials and
//! passwords, and a quota-guarded lifecycle over a transactional document
//! store.

pub mod config;
pub mod crypto;
pub mod lifecycle;
pub mod platform;
pub mod quota;
pub mod sanitize;
pub mod session;
pub mod store;
pub mod tags;
pub mod vault;

pub use config::{QuotaLimits, VaultConfig};
pub use crypto::{
    derive_session_key, fallback_session_key, CipherMode, CryptoError, EncryptedField,
    FileKeyStore, LocalKeyStore, SecretEnvelope, SessionKey,
};
pub use lifecycle::{LifecycleManager, SoftDeleteOutcome, TrimStatus, TRASH_CAPACITY};
pub use quota::{QuotaCategory, QuotaGuard, QuotaScope};
pub use session::Session;
pub use store::{sqlite::SqliteStore, DocumentStore, Transaction};
pub use tags::{StoreMergeService, Tag, TagDirectory, TagMergeService};
pub use vault::{
    FetchReport, NewRecord, RecordKind, RecordPatch, RecordSecrets, SecretPatch, UpdateOutcome,
    VaultRecord, VaultRepository,
};

use thiserror::Error;

/// Result type for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Errors raised by the document store layer
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored row whose columns could not be decoded
    #[error("Corrupt record {id}: {reason}")]
    CorruptRecord {
        id: String,
        user_id: String,
        reason: String,
    },

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Query unavailable: {0}")]
    IndexUnavailable(String),
}

/// General error type for vault operations
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Daily quota exceeded for {category} (limit {limit})")]
    QuotaExceeded { category: QuotaCategory, limit: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailure(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailure(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CryptoError> for VaultError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Io(io) => Self::Io(io),
            e if e.is_decryption() => Self::DecryptionFailure(e.to_string()),
            e => Self::EncryptionFailure(e.to_string()),
        }
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(e))
    }
}
