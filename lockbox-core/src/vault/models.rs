//! Plaintext views of vault records and the inputs that create or edit them.

use crate::crypto::{SecretEnvelope, SessionKey};
use crate::store::{RecordKind, StoredRecord};
use crate::{Result, VaultError};
use chrono::{DateTime, Utc};
use std::fmt;
use zeroize::{Zeroize, Zeroizing};

const FIELD_KEY: &str = "key";
const FIELD_SECRET: &str = "secret";
const FIELD_PASSWORD: &str = "password";

/// Decrypted secret fields of a record
#[derive(Clone, PartialEq, Eq)]
pub enum RecordSecrets {
    /// API key plus an optional secret
    Credential { key: String, secret: Option<String> },
    /// A single password blob
    Password { password: String },
}

impl RecordSecrets {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Credential { .. } => RecordKind::Credential,
            Self::Password { .. } => RecordKind::Password,
        }
    }

    /// `(label, plaintext)` pairs to seal.
    pub(crate) fn fields(&self) -> Vec<(&'static str, &str)> {
        match self {
            Self::Credential { key, secret } => {
                let mut fields = vec![(FIELD_KEY, key.as_str())];
                if let Some(secret) = secret {
                    fields.push((FIELD_SECRET, secret.as_str()));
                }
                fields
            }
            Self::Password { password } => vec![(FIELD_PASSWORD, password.as_str())],
        }
    }

    /// Seal every field under one fresh IV.
    pub(crate) fn seal(&self, key: &SessionKey) -> Result<SecretEnvelope> {
        Ok(SecretEnvelope::seal(key, self.kind().cipher_mode(), &self.fields())?)
    }

    /// Open an envelope written for a record of `kind`.
    pub(crate) fn open(
        kind: RecordKind,
        envelope: &SecretEnvelope,
        key: &SessionKey,
    ) -> Result<Self> {
        if envelope.mode != kind.cipher_mode() {
            return Err(VaultError::DecryptionFailure(format!(
                "{} record sealed with {}",
                kind.as_str(),
                envelope.mode.as_str()
            )));
        }

        let mut fields = envelope.open(key)?;
        let mut take = |label: &str| -> Option<String> {
            fields.remove(label).map(|v: Zeroizing<String>| v.to_string())
        };

        let secrets = match kind {
            RecordKind::Credential => Self::Credential {
                key: take(FIELD_KEY).ok_or_else(|| missing(FIELD_KEY))?,
                secret: take(FIELD_SECRET),
            },
            RecordKind::Password => Self::Password {
                password: take(FIELD_PASSWORD).ok_or_else(|| missing(FIELD_PASSWORD))?,
            },
        };
        Ok(secrets)
    }
}

fn missing(label: &str) -> VaultError {
    VaultError::DecryptionFailure(format!("Secret field {:?} is missing", label))
}

impl fmt::Debug for RecordSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credential { secret, .. } => f
                .debug_struct("Credential")
                .field("key", &"<redacted>")
                .field("secret", &secret.as_ref().map(|_| "<redacted>"))
                .finish(),
            Self::Password { .. } => f
                .debug_struct("Password")
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

impl Drop for RecordSecrets {
    fn drop(&mut self) {
        match self {
            Self::Credential { key, secret } => {
                key.zeroize();
                secret.zeroize();
            }
            Self::Password { password } => password.zeroize(),
        }
    }
}

/// Input for [`VaultRepository::add`](super::VaultRepository::add)
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub name: String,
    pub category: String,
    pub url: Option<String>,
    pub username: Option<String>,
    pub notes: Option<String>,
    pub tag_ids: Vec<String>,
    pub secrets: RecordSecrets,
}

impl NewRecord {
    pub fn credential(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(
            name,
            RecordSecrets::Credential {
                key: key.into(),
                secret: None,
            },
        )
    }

    pub fn password(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(
            name,
            RecordSecrets::Password {
                password: password.into(),
            },
        )
    }

    fn new(name: impl Into<String>, secrets: RecordSecrets) -> Self {
        Self {
            name: name.into(),
            category: "general".to_string(),
            url: None,
            username: None,
            notes: None,
            tag_ids: Vec::new(),
            secrets,
        }
    }
}

/// Replacement secret values
///
/// Fields left as `None` keep their current value; `Some(None)` clears an
/// optional field.
#[derive(Clone, PartialEq, Eq)]
pub enum SecretPatch {
    Credential {
        key: Option<String>,
        secret: Option<Option<String>>,
    },
    Password {
        password: String,
    },
}

impl SecretPatch {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Credential { .. } => RecordKind::Credential,
            Self::Password { .. } => RecordKind::Password,
        }
    }

    /// Whether the result depends on the current secret values.
    pub(crate) fn needs_current(&self) -> bool {
        match self {
            Self::Credential { key, secret } => key.is_none() || secret.is_none(),
            Self::Password { .. } => false,
        }
    }

    /// Apply onto `current`. `current` may only be `None` when
    /// [`needs_current`](Self::needs_current) is false.
    pub(crate) fn apply(&self, current: Option<&RecordSecrets>) -> Option<RecordSecrets> {
        match (self, current) {
            (Self::Password { password }, _) => Some(RecordSecrets::Password {
                password: password.clone(),
            }),
            (
                Self::Credential {
                    key: Some(key),
                    secret: Some(secret),
                },
                _,
            ) => Some(RecordSecrets::Credential {
                key: key.clone(),
                secret: secret.clone(),
            }),
            (
                Self::Credential { key, secret },
                Some(RecordSecrets::Credential {
                    key: current_key,
                    secret: current_secret,
                }),
            ) => Some(RecordSecrets::Credential {
                key: key.clone().unwrap_or_else(|| current_key.clone()),
                secret: secret.clone().unwrap_or_else(|| current_secret.clone()),
            }),
            _ => None,
        }
    }
}

impl fmt::Debug for SecretPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretPatch::{}(<redacted>)", self.kind().as_str())
    }
}

/// Partial edit of a record
///
/// `None` leaves a field untouched. For optional fields `Some(None)` clears
/// the value.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub name: Option<String>,
    pub category: Option<String>,
    pub url: Option<Option<String>>,
    pub username: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub tag_ids: Option<Vec<String>>,
    pub secrets: Option<SecretPatch>,
}

/// Which kinds of change an update actually made
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub secret_changed: bool,
    pub username_changed: bool,
    pub metadata_changed: bool,
}

impl UpdateOutcome {
    pub fn is_noop(&self) -> bool {
        !(self.secret_changed || self.username_changed || self.metadata_changed)
    }
}

/// A decrypted record
#[derive(Debug, Clone)]
pub struct VaultRecord {
    pub id: String,
    pub kind: RecordKind,
    pub name: String,
    pub category: String,
    pub url: Option<String>,
    pub username: Option<String>,
    pub notes: Option<String>,
    pub tag_ids: Vec<String>,
    pub secrets: RecordSecrets,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl VaultRecord {
    pub(crate) fn decrypt(record: StoredRecord, key: &SessionKey) -> Result<Self> {
        let secrets = RecordSecrets::open(record.kind, &record.secrets, key)?;
        Ok(Self {
            id: record.id,
            kind: record.kind,
            name: record.name,
            category: record.category,
            url: record.url,
            username: record.username,
            notes: record.notes,
            tag_ids: record.tag_ids,
            secrets,
            created_at: record.created_at,
            updated_at: record.updated_at,
            deleted_at: record.deleted_at,
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Result of a tolerant bulk read
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub records: Vec<VaultRecord>,
    /// Records that could not be decrypted and were left out
    pub skipped: usize,
}

#[cfg(test)]
pub(crate) fn field_labels(envelope: &SecretEnvelope) -> Vec<String> {
    envelope.fields.keys().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_seal_open() {
        let key = SessionKey::generate();
        let secrets = RecordSecrets::Credential {
            key: "pk_live".to_string(),
            secret: Some("sk_live".to_string()),
        };

        let envelope = secrets.seal(&key).unwrap();
        assert_eq!(field_labels(&envelope), vec!["key", "secret"]);
        assert!(envelope.shared_iv().is_some());

        let opened = RecordSecrets::open(RecordKind::Credential, &envelope, &key).unwrap();
        assert_eq!(opened, secrets);
    }

    #[test]
    fn test_open_rejects_kind_mismatch() {
        let key = SessionKey::generate();
        let envelope = RecordSecrets::Password {
            password: "pw".to_string(),
        }
        .seal(&key)
        .unwrap();

        assert!(matches!(
            RecordSecrets::open(RecordKind::Credential, &envelope, &key),
            Err(VaultError::DecryptionFailure(_))
        ));
    }

    #[test]
    fn test_debug_is_redacted() {
        let secrets = RecordSecrets::Password {
            password: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", secrets).contains("hunter2"));

        let patch = SecretPatch::Password {
            password: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", patch).contains("hunter2"));
    }

    #[test]
    fn test_secret_patch_apply() {
        let current = RecordSecrets::Credential {
            key: "k1".to_string(),
            secret: Some("s1".to_string()),
        };

        let patch = SecretPatch::Credential {
            key: None,
            secret: Some(None),
        };
        assert!(patch.needs_current());
        assert_eq!(
            patch.apply(Some(&current)),
            Some(RecordSecrets::Credential {
                key: "k1".to_string(),
                secret: None
            })
        );
        assert_eq!(patch.apply(None), None);

        let full = SecretPatch::Credential {
            key: Some("k2".to_string()),
            secret: Some(Some("s2".to_string())),
        };
        assert!(!full.needs_current());
        assert!(full.apply(None).is_some());
    }
}
