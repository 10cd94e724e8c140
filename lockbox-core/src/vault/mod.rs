//! Vault repository - coordinates the cipher, quota and store layers

mod models;

pub use crate::store::RecordKind;
pub use models::{
    FetchReport, NewRecord, RecordPatch, RecordSecrets, SecretPatch, UpdateOutcome, VaultRecord,
};

use crate::{
    config::VaultConfig,
    crypto::SessionKey,
    lifecycle::{owned_record, LifecycleManager, SoftDeleteOutcome},
    quota::{QuotaCategory, QuotaGuard},
    sanitize::{
        clean_optional, clean_required, clean_secret, dedup_ids, normalize_url, MAX_CATEGORY_LEN,
        MAX_NAME_LEN, MAX_NOTES_LEN, MAX_USERNAME_LEN,
    },
    session::Session,
    store::{DocumentStore, ListedRecord, StoredRecord},
    tags::{adjust_usage, check_tags_exist, Tag, TagDirectory},
    Result, StoreError, VaultError,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Encrypted record storage for the signed-in user
pub struct VaultRepository<S> {
    store: Arc<S>,
    session: Session,
    quota: QuotaGuard,
    lifecycle: LifecycleManager<S>,
    tags: TagDirectory<S>,
}

impl<S: DocumentStore + 'static> VaultRepository<S> {
    /// Create a repository whose tag merges run against `store`
    pub fn new(store: Arc<S>, session: Session, config: &VaultConfig) -> Self {
        let tags = TagDirectory::new(Arc::clone(&store));
        Self::with_tag_directory(store, session, config, tags)
    }
}

impl<S: DocumentStore> VaultRepository<S> {
    /// Create a repository with a caller-supplied tag directory (e.g. one
    /// backed by a remote merge service)
    pub fn with_tag_directory(
        store: Arc<S>,
        session: Session,
        config: &VaultConfig,
        tags: TagDirectory<S>,
    ) -> Self {
        let quota = QuotaGuard::new(config.quota.clone());
        Self {
            lifecycle: LifecycleManager::new(Arc::clone(&store), quota.clone()),
            store,
            session,
            quota,
            tags,
        }
    }

    fn unlocked(&self) -> Result<(&str, &SessionKey)> {
        Ok((self.session.user_id()?, self.session.key()?))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_unlocked(&self) -> bool {
        self.session.is_unlocked()
    }

    /// Drop the session key; every later operation fails with
    /// [`VaultError::Unauthenticated`].
    pub fn lock(&mut self) {
        self.session.lock();
        info!("Vault locked");
    }

    /// Add a new record and return its id
    pub async fn add(&self, record: NewRecord) -> Result<String> {
        let (user_id, key) = self.unlocked()?;

        let name = clean_required(&record.name, "Name", MAX_NAME_LEN)?;
        let category = clean_required(&record.category, "Category", MAX_CATEGORY_LEN)?;
        let url = normalize_url(record.url.as_deref())?;
        let username = clean_optional(record.username.as_deref(), "Username", MAX_USERNAME_LEN)?;
        let notes = clean_optional(record.notes.as_deref(), "Notes", MAX_NOTES_LEN)?;
        let tag_ids = dedup_ids(&record.tag_ids);
        let secrets = clean_secrets(&record.secrets)?;

        let kind = secrets.kind();
        let envelope = secrets.seal(key)?;
        let id = uuid::Uuid::new_v4().to_string();

        self.quota
            .run(&*self.store, user_id, &[QuotaCategory::Create], |tx| {
                check_tags_exist(tx, user_id, &tag_ids)?;

                let now = tx.now();
                tx.put_record(&StoredRecord {
                    id: id.clone(),
                    user_id: user_id.to_string(),
                    kind,
                    name,
                    category,
                    url,
                    username,
                    notes,
                    tag_ids: tag_ids.clone(),
                    secrets: envelope,
                    created_at: now,
                    updated_at: now,
                    deleted_at: None,
                })?;
                adjust_usage(tx, &[], &tag_ids)
            })
            .await?;

        info!(record_id = %id, kind = kind.as_str(), "Record added");
        Ok(id)
    }

    /// Apply a partial edit.
    ///
    /// A secret change re-seals every secret field under a new IV. Secret,
    /// username and other metadata changes each consume their own quota;
    /// a patch that changes nothing writes nothing and consumes nothing.
    pub async fn update(&self, id: &str, patch: RecordPatch) -> Result<UpdateOutcome> {
        let (user_id, key) = self.unlocked()?;

        let name = patch
            .name
            .as_deref()
            .map(|v| clean_required(v, "Name", MAX_NAME_LEN))
            .transpose()?;
        let category = patch
            .category
            .as_deref()
            .map(|v| clean_required(v, "Category", MAX_CATEGORY_LEN))
            .transpose()?;
        let url = patch
            .url
            .as_ref()
            .map(|v| normalize_url(v.as_deref()))
            .transpose()?;
        let username = patch
            .username
            .as_ref()
            .map(|v| clean_optional(v.as_deref(), "Username", MAX_USERNAME_LEN))
            .transpose()?;
        let notes = patch
            .notes
            .as_ref()
            .map(|v| clean_optional(v.as_deref(), "Notes", MAX_NOTES_LEN))
            .transpose()?;
        let tag_ids = patch.tag_ids.as_deref().map(dedup_ids);
        let secrets = patch.secrets.as_ref().map(clean_secret_patch).transpose()?;

        let outcome = self
            .store
            .transaction(|tx| {
                let mut record = owned_record(tx, user_id, id)?;
                if record.is_deleted() {
                    return Err(VaultError::NotFound(format!("Active record {}", id)));
                }

                let mut outcome = UpdateOutcome::default();
                let tags_before = record.tag_ids.clone();

                if let Some(patch) = secrets {
                    if patch.kind() != record.kind {
                        return Err(VaultError::InvalidInput(format!(
                            "Cannot apply {} secrets to a {} record",
                            patch.kind().as_str(),
                            record.kind.as_str()
                        )));
                    }

                    // A full replacement does not need the old values.
                    let current = match RecordSecrets::open(record.kind, &record.secrets, key) {
                        Ok(current) => Some(current),
                        Err(e) if patch.needs_current() => return Err(e),
                        Err(e) => {
                            warn!(record_id = %id, error = %e, "Replacing unreadable secrets");
                            None
                        }
                    };
                    let next = patch.apply(current.as_ref()).ok_or_else(|| {
                        VaultError::InvalidInput("Secret patch does not apply".to_string())
                    })?;
                    if current.as_ref() != Some(&next) {
                        record.secrets = next.seal(key)?;
                        outcome.secret_changed = true;
                    }
                }

                if let Some(username) = username {
                    if username != record.username {
                        record.username = username;
                        outcome.username_changed = true;
                    }
                }

                if let Some(name) = name {
                    if name != record.name {
                        record.name = name;
                        outcome.metadata_changed = true;
                    }
                }
                if let Some(category) = category {
                    if category != record.category {
                        record.category = category;
                        outcome.metadata_changed = true;
                    }
                }
                if let Some(url) = url {
                    if url != record.url {
                        record.url = url;
                        outcome.metadata_changed = true;
                    }
                }
                if let Some(notes) = notes {
                    if notes != record.notes {
                        record.notes = notes;
                        outcome.metadata_changed = true;
                    }
                }
                if let Some(tag_ids) = tag_ids {
                    if tag_ids != record.tag_ids {
                        let added: Vec<String> = tag_ids
                            .iter()
                            .filter(|t| !tags_before.contains(t))
                            .cloned()
                            .collect();
                        check_tags_exist(tx, user_id, &added)?;
                        record.tag_ids = tag_ids;
                        outcome.metadata_changed = true;
                    }
                }

                if outcome.is_noop() {
                    return Ok(outcome);
                }

                let mut categories = Vec::with_capacity(3);
                if outcome.secret_changed {
                    categories.push(QuotaCategory::SecretChange);
                }
                if outcome.username_changed {
                    categories.push(QuotaCategory::UsernameChange);
                }
                if outcome.metadata_changed {
                    categories.push(QuotaCategory::MetadataChange);
                }

                self.quota.check(tx, user_id, &categories, |tx| {
                    record.updated_at = tx.now();
                    tx.put_record(&record)?;
                    adjust_usage(tx, &tags_before, &record.tag_ids)
                })?;

                Ok(outcome)
            })
            .await?;

        if !outcome.is_noop() {
            info!(
                record_id = %id,
                secret = outcome.secret_changed,
                username = outcome.username_changed,
                metadata = outcome.metadata_changed,
                "Record updated"
            );
        }
        Ok(outcome)
    }

    /// Decrypt every active record, skipping the ones that fail.
    pub async fn fetch_all(&self) -> Result<FetchReport> {
        let (user_id, key) = self.unlocked()?;
        let stored = self.store.list_records(user_id).await?;

        let mut report = decrypt_all(stored, key);
        report
            .records
            .sort_by_key(|r| (r.name.to_lowercase(), r.created_at));
        Ok(report)
    }

    /// Decrypt one record (active or trashed).
    ///
    /// Unlike [`fetch_all`](Self::fetch_all), a decryption failure is
    /// returned to the caller.
    pub async fn get(&self, id: &str) -> Result<VaultRecord> {
        let (user_id, key) = self.unlocked()?;
        let record = self
            .store
            .transaction(|tx| owned_record(tx, user_id, id))
            .await
            .map_err(|e| match e {
                VaultError::Store(StoreError::CorruptRecord { reason, .. }) => {
                    VaultError::DecryptionFailure(reason)
                }
                e => e,
            })?;
        VaultRecord::decrypt(record, key)
    }

    /// Records in the trash, most recently deleted first.
    pub async fn fetch_trash(&self) -> Result<FetchReport> {
        let (user_id, key) = self.unlocked()?;
        let stored = self.store.list_trash(user_id).await?;
        Ok(decrypt_all(stored, key))
    }

    /// Soft delete
    pub async fn delete(&self, id: &str) -> Result<SoftDeleteOutcome> {
        let (user_id, _) = self.unlocked()?;
        self.lifecycle.soft_delete(user_id, id).await
    }

    pub async fn restore(&self, id: &str) -> Result<()> {
        let (user_id, _) = self.unlocked()?;
        self.lifecycle.restore(user_id, id).await
    }

    pub async fn hard_delete(&self, id: &str) -> Result<bool> {
        let (user_id, _) = self.unlocked()?;
        self.lifecycle.hard_delete(user_id, id).await
    }

    /// Remaining daily allowance per quota category
    pub async fn quota_remaining(&self) -> Result<Vec<(QuotaCategory, u32)>> {
        let (user_id, _) = self.unlocked()?;
        self.quota.remaining(&*self.store, user_id).await
    }

    // Tags

    pub async fn create_tag(&self, name: &str, color: &str) -> Result<String> {
        let (user_id, _) = self.unlocked()?;
        self.tags.create_or_get(user_id, name, color).await
    }

    pub async fn rename_tag(&self, id: &str, new_name: &str) -> Result<()> {
        let (user_id, _) = self.unlocked()?;
        self.tags.rename(user_id, id, new_name).await
    }

    pub async fn recolor_tag(&self, id: &str, color: &str) -> Result<()> {
        let (user_id, _) = self.unlocked()?;
        self.tags.recolor(user_id, id, color).await
    }

    pub async fn delete_tag(&self, id: &str) -> Result<()> {
        let (user_id, _) = self.unlocked()?;
        self.tags.delete(user_id, id).await
    }

    pub async fn merge_tags(&self, source_id: &str, target_id: &str) -> Result<()> {
        let (user_id, _) = self.unlocked()?;
        self.tags.merge(user_id, source_id, target_id).await
    }

    pub async fn refresh_tags(&self) -> Result<Vec<Tag>> {
        let (user_id, _) = self.unlocked()?;
        self.tags.refresh(user_id).await
    }

    /// Tags as of the last refresh or tag mutation
    pub fn tags(&self) -> Vec<Tag> {
        self.tags.tags()
    }
}

fn decrypt_all(listed: Vec<ListedRecord>, key: &SessionKey) -> FetchReport {
    let mut report = FetchReport::default();
    for entry in listed {
        let decrypted = match entry {
            Ok(record) => {
                let id = record.id.clone();
                VaultRecord::decrypt(record, key).map_err(|e| (id, e))
            }
            Err(StoreError::CorruptRecord { id, reason, .. }) => {
                Err((id, VaultError::DecryptionFailure(reason)))
            }
            Err(e) => Err((String::new(), e.into())),
        };

        match decrypted {
            Ok(record) => report.records.push(record),
            Err((id, e)) => {
                warn!(record_id = %id, error = %e, "Skipping record that could not be decrypted");
                report.skipped += 1;
            }
        }
    }
    report
}

fn clean_optional_secret(value: Option<&str>, field: &str) -> Result<Option<String>> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(Some(clean_secret(v, field, true)?)),
        _ => Ok(None),
    }
}

fn clean_secrets(secrets: &RecordSecrets) -> Result<RecordSecrets> {
    Ok(match secrets {
        RecordSecrets::Credential { key, secret } => RecordSecrets::Credential {
            key: clean_secret(key, "API key", true)?,
            secret: clean_optional_secret(secret.as_deref(), "API secret")?,
        },
        RecordSecrets::Password { password } => RecordSecrets::Password {
            password: clean_secret(password, "Password", false)?,
        },
    })
}

fn clean_secret_patch(patch: &SecretPatch) -> Result<SecretPatch> {
    Ok(match patch {
        SecretPatch::Credential { key, secret } => SecretPatch::Credential {
            key: key
                .as_deref()
                .map(|k| clean_secret(k, "API key", true))
                .transpose()?,
            secret: secret
                .as_ref()
                .map(|s| clean_optional_secret(s.as_deref(), "API secret"))
                .transpose()?,
        },
        SecretPatch::Password { password } => SecretPatch::Password {
            password: clean_secret(password, "Password", false)?,
        },
    })
}
