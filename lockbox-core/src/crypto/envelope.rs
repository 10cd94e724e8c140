//! Shared-IV sealing of all secret fields of one record.
//!
//! Sealing always draws one new IV and encrypts every field with it; there
//! is no way to re-encrypt a single field. Each field is encrypted under its
//! own subkey (see [`SessionKey::field_key`]) so the shared IV never pairs
//! with the same key twice.

use crate::crypto::{
    cipher::{self, CipherMode, EncryptedField},
    keyring::SessionKey,
    CryptoError, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;
use zeroize::Zeroizing;

/// The encrypted secret fields of one record, keyed by field label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretEnvelope {
    pub mode: CipherMode,
    pub fields: BTreeMap<String, EncryptedField>,
}

impl SecretEnvelope {
    /// Encrypt every `(label, plaintext)` pair under one fresh IV.
    pub fn seal(key: &SessionKey, mode: CipherMode, fields: &[(&str, &str)]) -> Result<Self> {
        if fields.is_empty() {
            return Err(CryptoError::EncryptionFailed(
                "A record needs at least one secret field".to_string(),
            ));
        }

        let iv = cipher::generate_iv(mode);
        let mut sealed = BTreeMap::new();

        for (label, plaintext) in fields {
            let field_key = key.field_key(label)?;
            let encrypted = cipher::encrypt(&field_key, mode, plaintext.as_bytes(), Some(&iv))?;
            if sealed.insert((*label).to_string(), encrypted).is_some() {
                return Err(CryptoError::EncryptionFailed(format!(
                    "Duplicate secret field: {}",
                    label
                )));
            }
        }

        Ok(Self {
            mode,
            fields: sealed,
        })
    }

    /// The IV shared by every field, if the envelope is consistent.
    pub fn shared_iv(&self) -> Option<&[u8]> {
        let mut ivs = self.fields.values().map(|f| f.iv.as_slice());
        let first = ivs.next()?;
        ivs.all(|iv| iv == first).then_some(first)
    }

    /// Decrypt every field.
    ///
    /// Fails as a whole if any field fails; the record is either fully
    /// readable or not at all.
    pub fn open(&self, key: &SessionKey) -> Result<BTreeMap<String, Zeroizing<String>>> {
        if self.shared_iv().is_none() {
            return Err(CryptoError::DecryptionFailed(
                "Secret fields do not share one IV".to_string(),
            ));
        }

        let mut opened = BTreeMap::new();
        for (label, field) in &self.fields {
            let field_key = key.field_key(label)?;
            let plaintext = Zeroizing::new(cipher::decrypt_to_string(&field_key, self.mode, field)?);
            if plaintext.is_empty() && !field.ciphertext.is_empty() {
                warn!(
                    field = %label,
                    "Decryption produced an empty value; the session key may be wrong"
                );
            }
            opened.insert(label.clone(), plaintext);
        }

        Ok(opened)
    }
}
