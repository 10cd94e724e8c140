//! Vault configuration.
//!
//! Loaded from a TOML file; every field has a default so a partial (or
//! missing) file is valid.

use crate::platform::{get_default_key_dir, get_default_vault_path};
use crate::quota::QuotaCategory;
use crate::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Per-category daily mutation ceilings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaLimits {
    pub create: u32,
    pub secret_change: u32,
    pub username_change: u32,
    pub metadata_change: u32,
    pub soft_delete: u32,
    pub restore: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            create: 20,
            secret_change: 20,
            username_change: 3,
            metadata_change: 50,
            soft_delete: 50,
            restore: 50,
        }
    }
}

impl QuotaLimits {
    /// Daily ceiling for a category.
    pub fn limit_for(&self, category: QuotaCategory) -> u32 {
        match category {
            QuotaCategory::Create => self.create,
            QuotaCategory::SecretChange => self.secret_change,
            QuotaCategory::UsernameChange => self.username_change,
            QuotaCategory::MetadataChange => self.metadata_change,
            QuotaCategory::SoftDelete => self.soft_delete,
            QuotaCategory::Restore => self.restore,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// SQLite database holding the vault documents
    pub database_path: PathBuf,
    /// Directory for locally persisted fallback keys
    pub key_dir: PathBuf,
    pub quota: QuotaLimits,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            database_path: get_default_vault_path(),
            key_dir: get_default_key_dir(),
            quota: QuotaLimits::default(),
        }
    }
}

impl VaultConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| VaultError::Config(e.to_string()))
    }
}
