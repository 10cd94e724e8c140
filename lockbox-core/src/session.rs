//! Session context: the current user and their session key.

use crate::crypto::{derive_session_key, fallback_session_key, LocalKeyStore, SessionKey};
use crate::{Result, VaultError};
use tracing::info;

/// Who is using the vault, and with which key
///
/// Supplied by the caller's auth layer. A session without a user id or key
/// fails every vault operation with [`VaultError::Unauthenticated`].
#[derive(Debug, Default)]
pub struct Session {
    user_id: Option<String>,
    key: Option<SessionKey>,
}

impl Session {
    /// A session with no signed-in user.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Build a session from an already available key.
    pub fn new(user_id: impl Into<String>, key: SessionKey) -> Self {
        Self {
            user_id: Some(user_id.into()),
            key: Some(key),
        }
    }

    /// Derive the session key from the user's master password.
    pub fn with_master_password(user_id: &str, master_password: &[u8]) -> Result<Self> {
        if user_id.is_empty() {
            return Err(VaultError::Unauthenticated);
        }
        let key = derive_session_key(master_password, user_id)?;
        info!("Session key derived from master password");
        Ok(Self::new(user_id, key))
    }

    /// Use (creating on first use) the user's locally stored fallback key.
    pub fn with_fallback_key(user_id: &str, key_store: &dyn LocalKeyStore) -> Result<Self> {
        if user_id.is_empty() {
            return Err(VaultError::Unauthenticated);
        }
        let key = fallback_session_key(key_store, user_id)?;
        Ok(Self::new(user_id, key))
    }

    pub fn user_id(&self) -> Result<&str> {
        self.user_id.as_deref().ok_or(VaultError::Unauthenticated)
    }

    pub fn key(&self) -> Result<&SessionKey> {
        // A user without a key cannot read or write anything.
        self.user_id()?;
        self.key.as_ref().ok_or(VaultError::Unauthenticated)
    }

    /// Drop the key from memory; the user id is kept.
    pub fn lock(&mut self) {
        self.key.take();
    }

    pub fn is_unlocked(&self) -> bool {
        self.user_id.is_some() && self.key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::FileKeyStore;

    #[test]
    fn test_anonymous_session_is_unauthenticated() {
        let session = Session::anonymous();
        assert!(matches!(session.user_id(), Err(VaultError::Unauthenticated)));
        assert!(matches!(session.key(), Err(VaultError::Unauthenticated)));
        assert!(!session.is_unlocked());
    }

    #[test]
    fn test_lock_clears_key() {
        let mut session = Session::new("u1", SessionKey::generate());
        assert!(session.is_unlocked());

        session.lock();
        assert!(!session.is_unlocked());
        assert_eq!(session.user_id().unwrap(), "u1");
        assert!(matches!(session.key(), Err(VaultError::Unauthenticated)));
    }

    #[test]
    fn test_master_password_session_is_reproducible() {
        let a = Session::with_master_password("u1", b"correct horse").unwrap();
        let b = Session::with_master_password("u1", b"correct horse").unwrap();
        assert_eq!(a.key().unwrap().as_bytes(), b.key().unwrap().as_bytes());
    }

    #[test]
    fn test_empty_user_id_is_unauthenticated() {
        assert!(matches!(
            Session::with_master_password("", b"pw"),
            Err(VaultError::Unauthenticated)
        ));
    }

    #[test]
    fn test_fallback_sessions_share_key() {
        let dir = std::env::temp_dir().join(format!("lockbox_session_{}", uuid::Uuid::new_v4()));
        let store = FileKeyStore::new(&dir);

        let tab_a = Session::with_fallback_key("u1", &store).unwrap();
        let tab_b = Session::with_fallback_key("u1", &store).unwrap();
        assert_eq!(
            tab_a.key().unwrap().as_bytes(),
            tab_b.key().unwrap().as_bytes()
        );

        let _ = std::fs::remove_dir_all(dir);
    }
}
