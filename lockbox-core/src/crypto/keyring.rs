//! Session keys and the local fallback key store.
//!
//! A session key is either derived from the master password or, for users
//! without one, generated once and kept in local-only storage:
//! Master Password → PBKDF2 → Session Key
//! (no password)   → CSPRNG → Fallback Key (persisted per user)

use crate::crypto::{CryptoError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroize;

/// A 256-bit symmetric key held for the duration of a session
///
/// Never transmitted or stored server-side. Zeroized on drop.
#[derive(Clone)]
pub struct SessionKey {
    key: [u8; 32],
}

impl SessionKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Create a key from raw bytes
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Get the raw key bytes (use sparingly)
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// Derive the subkey used for one named field of a record.
    ///
    /// Fields of one record share an IV; distinct subkeys keep every
    /// (key, nonce) pair unique.
    pub fn field_key(&self, label: &str) -> Result<SessionKey> {
        let hk = Hkdf::<Sha256>::new(None, &self.key);
        let mut okm = [0u8; 32];
        hk.expand(format!("lockbox/field/{}", label).as_bytes(), &mut okm)
            .map_err(|e| CryptoError::KdfFailed(format!("Field key expansion failed: {}", e)))?;
        Ok(Self { key: okm })
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Local-only persistence for per-user fallback keys
pub trait LocalKeyStore: Send + Sync {
    /// Load the stored key for a user, if any.
    fn load(&self, user_id: &str) -> Result<Option<SessionKey>>;

    /// Store a key for a user unless one already exists.
    ///
    /// Returns `false` when another writer got there first.
    fn store_new(&self, user_id: &str, key: &SessionKey) -> Result<bool>;
}

/// File-backed fallback key store, one base64 file per user
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Directory the key files live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, user_id: &str) -> PathBuf {
        // Hash the id so arbitrary user ids never escape the directory.
        let digest = Sha256::digest(user_id.as_bytes());
        let name: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        self.dir.join(format!("{}.key", name))
    }
}

impl LocalKeyStore for FileKeyStore {
    fn load(&self, user_id: &str) -> Result<Option<SessionKey>> {
        let path = self.key_path(user_id);
        let mut encoded = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CryptoError::Io(e)),
        };

        let mut bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::KeyStorage(format!("Corrupt key file: {}", e)))?;
        encoded.zeroize();

        if bytes.len() != 32 {
            let len = bytes.len();
            bytes.zeroize();
            return Err(CryptoError::KeyStorage(format!(
                "Invalid stored key length: {}",
                len
            )));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Some(SessionKey::from_bytes(key)))
    }

    fn store_new(&self, user_id: &str, key: &SessionKey) -> Result<bool> {
        fs::create_dir_all(&self.dir)?;
        let path = self.key_path(user_id);

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = match options.open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(CryptoError::Io(e)),
        };

        let mut encoded = BASE64.encode(key.as_bytes());
        let written = file.write_all(encoded.as_bytes()).and_then(|_| file.sync_all());
        encoded.zeroize();
        written?;

        Ok(true)
    }
}

/// Get the fallback session key for a user, creating it on first use.
///
/// Every later call, from this process or another sharing the same store,
/// returns the same key.
pub fn fallback_session_key(store: &dyn LocalKeyStore, user_id: &str) -> Result<SessionKey> {
    if user_id.is_empty() {
        return Err(CryptoError::KeyStorage("User id is required".to_string()));
    }

    if let Some(key) = store.load(user_id)? {
        debug!("Loaded fallback key from local storage");
        return Ok(key);
    }

    let key = SessionKey::generate();
    if store.store_new(user_id, &key)? {
        info!("Generated new fallback session key");
        return Ok(key);
    }

    // Lost the race to a concurrent session; converge on its key.
    store
        .load(user_id)?
        .ok_or_else(|| CryptoError::KeyStorage("Fallback key vanished after creation".to_string()))
}
