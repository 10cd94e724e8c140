//! Document shapes persisted by the store.

use crate::crypto::{CipherMode, SecretEnvelope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record shape discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// API credential: key plus optional secret
    Credential,
    /// Password entry: a single secret
    Password,
}

impl RecordKind {
    /// Convert to its stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credential => "credential",
            Self::Password => "password",
        }
    }

    /// Parse the stored string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "credential" => Some(Self::Credential),
            "password" => Some(Self::Password),
            _ => None,
        }
    }

    /// Cipher mode used for this shape's secret fields.
    pub fn cipher_mode(&self) -> CipherMode {
        match self {
            Self::Credential => CipherMode::Gcm,
            Self::Password => CipherMode::Cbc,
        }
    }
}

/// A vault record as stored: plaintext metadata plus sealed secrets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub user_id: String,
    pub kind: RecordKind,
    pub name: String,
    pub category: String,
    pub url: Option<String>,
    pub username: Option<String>,
    pub notes: Option<String>,
    pub tag_ids: Vec<String>,
    pub secrets: SecretEnvelope,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set while the record sits in the trash
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StoredRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// One daily counter for a (user, category, day) scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCounter {
    pub scope_key: String,
    pub count: u32,
    pub updated_at: DateTime<Utc>,
}

/// A user-defined label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub user_id: String,
    pub name: String,
    /// Trimmed, lowercased name; unique per user
    pub normalized_name: String,
    pub color: String,
    pub usage_count: u32,
    pub created_at: DateTime<Utc>,
}
