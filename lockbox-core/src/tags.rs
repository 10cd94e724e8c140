//! Tag directory: a per-user, name-deduplicated label set.

pub use crate::store::Tag;

use crate::sanitize::{clean_required, normalize_tag_name, validate_color, MAX_TAG_NAME_LEN};
use crate::store::{DocumentStore, Transaction};
use crate::{Result, VaultError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Server-trusted tag merge
///
/// Rewrites every record that references `source_id` to reference
/// `target_id` instead (once), then removes the source tag.
#[async_trait]
pub trait TagMergeService: Send + Sync {
    async fn merge_tags(&self, user_id: &str, source_id: &str, target_id: &str) -> Result<()>;
}

/// [`TagMergeService`] that performs the fan-out in one store transaction
pub struct StoreMergeService<S> {
    store: Arc<S>,
}

impl<S: DocumentStore> StoreMergeService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: DocumentStore> TagMergeService for StoreMergeService<S> {
    async fn merge_tags(&self, user_id: &str, source_id: &str, target_id: &str) -> Result<()> {
        let moved = self
            .store
            .transaction(|tx| {
                owned_tag(tx, user_id, source_id)?;
                let mut target = owned_tag(tx, user_id, target_id)?;
                let now = tx.now();

                let affected = tx.records_with_tag(user_id, source_id)?;
                let moved = affected.len();
                for mut record in affected {
                    let mut tag_ids = Vec::with_capacity(record.tag_ids.len());
                    for id in record.tag_ids.drain(..) {
                        let id = if id == source_id {
                            target_id.to_string()
                        } else {
                            id
                        };
                        if !tag_ids.contains(&id) {
                            tag_ids.push(id);
                        }
                    }
                    record.tag_ids = tag_ids;
                    record.updated_at = now;
                    tx.put_record(&record)?;
                }

                target.usage_count = tx.records_with_tag(user_id, target_id)?.len() as u32;
                tx.put_tag(&target)?;
                tx.delete_tag(source_id)?;
                Ok(moved)
            })
            .await?;

        info!(records = moved, "Merged tag into target");
        Ok(())
    }
}

/// Tags of the signed-in user, with a locally cached listing
pub struct TagDirectory<S> {
    store: Arc<S>,
    merge_service: Arc<dyn TagMergeService>,
    cache: Mutex<Vec<Tag>>,
}

impl<S: DocumentStore + 'static> TagDirectory<S> {
    /// Directory whose merges run through [`StoreMergeService`].
    pub fn new(store: Arc<S>) -> Self {
        let merge_service = Arc::new(StoreMergeService::new(Arc::clone(&store)));
        Self::with_merge_service(store, merge_service)
    }
}

impl<S: DocumentStore> TagDirectory<S> {
    pub fn with_merge_service(store: Arc<S>, merge_service: Arc<dyn TagMergeService>) -> Self {
        Self {
            store,
            merge_service,
            cache: Mutex::new(Vec::new()),
        }
    }

    /// Create a tag, or return the id of the existing tag with the same
    /// normalized name. An existing tag keeps its color.
    pub async fn create_or_get(&self, user_id: &str, name: &str, color: &str) -> Result<String> {
        let name = clean_required(name, "Tag name", MAX_TAG_NAME_LEN)?;
        let color = validate_color(color)?;
        let normalized = normalize_tag_name(&name);

        let id = self
            .store
            .transaction(|tx| {
                if let Some(existing) = tx.find_tag(user_id, &normalized)? {
                    debug!(tag_id = %existing.id, "Tag already exists");
                    return Ok(existing.id);
                }

                let tag = Tag {
                    id: uuid::Uuid::new_v4().to_string(),
                    user_id: user_id.to_string(),
                    name,
                    normalized_name: normalized,
                    color,
                    usage_count: 0,
                    created_at: tx.now(),
                };
                tx.put_tag(&tag)?;
                info!(tag_id = %tag.id, "Tag created");
                Ok(tag.id)
            })
            .await?;

        self.refresh(user_id).await?;
        Ok(id)
    }

    pub async fn rename(&self, user_id: &str, id: &str, new_name: &str) -> Result<()> {
        let name = clean_required(new_name, "Tag name", MAX_TAG_NAME_LEN)?;
        let normalized = normalize_tag_name(&name);

        self.store
            .transaction(|tx| {
                let mut tag = owned_tag(tx, user_id, id)?;
                if let Some(other) = tx.find_tag(user_id, &normalized)? {
                    if other.id != tag.id {
                        return Err(VaultError::AlreadyExists(format!(
                            "Tag named {:?}",
                            other.name
                        )));
                    }
                }
                tag.name = name;
                tag.normalized_name = normalized;
                tx.put_tag(&tag)?;
                Ok(())
            })
            .await?;

        self.refresh(user_id).await?;
        Ok(())
    }

    pub async fn recolor(&self, user_id: &str, id: &str, color: &str) -> Result<()> {
        let color = validate_color(color)?;

        self.store
            .transaction(|tx| {
                let mut tag = owned_tag(tx, user_id, id)?;
                tag.color = color;
                tx.put_tag(&tag)?;
                Ok(())
            })
            .await?;

        self.refresh(user_id).await?;
        Ok(())
    }

    /// Remove a tag. Records keep the (now dangling) id.
    pub async fn delete(&self, user_id: &str, id: &str) -> Result<()> {
        self.store
            .transaction(|tx| {
                owned_tag(tx, user_id, id)?;
                tx.delete_tag(id)?;
                Ok(())
            })
            .await?;

        info!(tag_id = %id, "Tag deleted");
        self.refresh(user_id).await?;
        Ok(())
    }

    /// Fold `source_id` into `target_id`, then reload the local listing.
    pub async fn merge(&self, user_id: &str, source_id: &str, target_id: &str) -> Result<()> {
        if source_id == target_id {
            return Err(VaultError::InvalidInput(
                "Cannot merge a tag into itself".to_string(),
            ));
        }

        self.merge_service
            .merge_tags(user_id, source_id, target_id)
            .await?;
        self.refresh(user_id).await?;
        Ok(())
    }

    /// Reload the local listing from the store.
    pub async fn refresh(&self, user_id: &str) -> Result<Vec<Tag>> {
        let tags = self.store.list_tags(user_id).await?;
        *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = tags.clone();
        Ok(tags)
    }

    /// Last loaded listing, sorted by normalized name.
    pub fn tags(&self) -> Vec<Tag> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn owned_tag(tx: &mut dyn Transaction, user_id: &str, id: &str) -> Result<Tag> {
    tx.get_tag(id)?
        .filter(|t| t.user_id == user_id)
        .ok_or_else(|| VaultError::NotFound(format!("Tag {}", id)))
}

/// Ensure every id names a tag owned by `user_id`.
pub(crate) fn check_tags_exist(
    tx: &mut dyn Transaction,
    user_id: &str,
    ids: &[String],
) -> Result<()> {
    for id in ids {
        owned_tag(tx, user_id, id)?;
    }
    Ok(())
}

/// Move usage counts from the `before` tag set to the `after` tag set.
///
/// Tags that no longer exist are ignored.
pub(crate) fn adjust_usage(
    tx: &mut dyn Transaction,
    before: &[String],
    after: &[String],
) -> Result<()> {
    let removed = before.iter().filter(|id| !after.contains(id));
    let added = after.iter().filter(|id| !before.contains(id));

    for (id, delta) in removed.map(|id| (id, -1i64)).chain(added.map(|id| (id, 1))) {
        if let Some(mut tag) = tx.get_tag(id)? {
            tag.usage_count = (i64::from(tag.usage_count) + delta).max(0) as u32;
            tx.put_tag(&tag)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CipherMode, SecretEnvelope, SessionKey};
    use crate::store::sqlite::SqliteStore;
    use crate::store::{RecordKind, StoredRecord};
    use chrono::Utc;

    fn directory() -> (Arc<SqliteStore>, TagDirectory<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        (Arc::clone(&store), TagDirectory::new(store))
    }

    fn record(id: &str, tag_ids: &[&str]) -> StoredRecord {
        let now = Utc::now();
        StoredRecord {
            id: id.to_string(),
            user_id: "u1".to_string(),
            kind: RecordKind::Password,
            name: id.to_string(),
            category: "personal".to_string(),
            url: None,
            username: None,
            notes: None,
            tag_ids: tag_ids.iter().map(|t| t.to_string()).collect(),
            secrets: SecretEnvelope::seal(
                &SessionKey::generate(),
                CipherMode::Cbc,
                &[("password", "pw")],
            )
            .unwrap(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    async fn load(store: &SqliteStore, id: &str) -> StoredRecord {
        let id = id.to_string();
        store
            .transaction(move |tx| Ok(tx.get_record(&id)?))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_or_get_dedups_by_normalized_name() {
        let (_, tags) = directory();

        let first = tags.create_or_get("u1", "Gaming", "#a855f7").await.unwrap();
        let second = tags.create_or_get("u1", "  gaming  ", "#000000").await.unwrap();
        assert_eq!(first, second);

        let listing = tags.tags();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "Gaming");
        assert_eq!(listing[0].color, "#a855f7");
    }

    #[tokio::test]
    async fn test_tags_are_per_user() {
        let (_, tags) = directory();

        let a = tags.create_or_get("u1", "Work", "#111111").await.unwrap();
        let b = tags.create_or_get("u2", "Work", "#222222").await.unwrap();
        assert_ne!(a, b);

        assert!(matches!(
            tags.rename("u2", &a, "Mine").await,
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let (_, tags) = directory();
        assert!(tags.create_or_get("u1", "   ", "#111111").await.is_err());
        assert!(tags.create_or_get("u1", "Work", "red").await.is_err());
    }

    #[tokio::test]
    async fn test_rename_conflict_and_case_change() {
        let (_, tags) = directory();
        let work = tags.create_or_get("u1", "Work", "#111111").await.unwrap();
        tags.create_or_get("u1", "Home", "#222222").await.unwrap();

        assert!(matches!(
            tags.rename("u1", &work, " home ").await,
            Err(VaultError::AlreadyExists(_))
        ));

        tags.rename("u1", &work, "WORK").await.unwrap();
        assert!(tags.tags().iter().any(|t| t.name == "WORK"));
    }

    #[tokio::test]
    async fn test_recolor() {
        let (_, tags) = directory();
        let id = tags.create_or_get("u1", "Work", "#111111").await.unwrap();

        tags.recolor("u1", &id, "#ABCDEF").await.unwrap();
        assert_eq!(tags.tags()[0].color, "#abcdef");

        assert!(tags.recolor("u1", &id, "#12").await.is_err());
        assert!(matches!(
            tags.recolor("u1", "missing", "#123456").await,
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_leaves_dangling_references() {
        let (store, tags) = directory();
        let id = tags.create_or_get("u1", "Work", "#111111").await.unwrap();

        let stored = record("r1", &[&id]);
        store
            .transaction(move |tx| Ok(tx.put_record(&stored)?))
            .await
            .unwrap();

        tags.delete("u1", &id).await.unwrap();
        assert!(tags.tags().is_empty());
        assert_eq!(load(&store, "r1").await.tag_ids, vec![id.clone()]);

        assert!(matches!(
            tags.delete("u1", &id).await,
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_merge_unions_without_duplicates() {
        let (store, tags) = directory();
        let source = tags.create_or_get("u1", "Games", "#111111").await.unwrap();
        let target = tags.create_or_get("u1", "Gaming", "#222222").await.unwrap();

        let records = vec![
            record("r1", &[&source]),
            record("r2", &[&source, "other"]),
            record("r3", &[&source, &target]),
            record("r4", &[&target]),
        ];
        store
            .transaction(move |tx| {
                for r in &records {
                    tx.put_record(r)?;
                }
                Ok(())
            })
            .await
            .unwrap();

        tags.merge("u1", &source, &target).await.unwrap();

        for id in ["r1", "r2", "r3"] {
            let r = load(&store, id).await;
            assert_eq!(r.tag_ids.iter().filter(|t| **t == target).count(), 1);
            assert!(!r.tag_ids.contains(&source));
        }
        assert_eq!(
            load(&store, "r2").await.tag_ids,
            vec![target.clone(), "other".to_string()]
        );

        let listing = tags.tags();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].id, target);
        assert_eq!(listing[0].usage_count, 4);
    }

    #[tokio::test]
    async fn test_merge_rejects_self_and_missing() {
        let (_, tags) = directory();
        let id = tags.create_or_get("u1", "Work", "#111111").await.unwrap();

        assert!(matches!(
            tags.merge("u1", &id, &id).await,
            Err(VaultError::InvalidInput(_))
        ));
        assert!(matches!(
            tags.merge("u1", "missing", &id).await,
            Err(VaultError::NotFound(_))
        ));
        assert_eq!(tags.tags().len(), 1);
    }

    #[tokio::test]
    async fn test_adjust_usage() {
        let (store, tags) = directory();
        let a = tags.create_or_get("u1", "A", "#111111").await.unwrap();
        let b = tags.create_or_get("u1", "B", "#222222").await.unwrap();

        let (a2, b2) = (a.clone(), b.clone());
        store
            .transaction(move |tx| {
                adjust_usage(tx, &[], &[a2.clone(), "gone".to_string()])?;
                adjust_usage(tx, &[a2.clone()], &[b2.clone()])?;
                adjust_usage(tx, &[b2.clone()], &[b2])
            })
            .await
            .unwrap();

        let listing = tags.refresh("u1").await.unwrap();
        let usage = |id: &str| listing.iter().find(|t| t.id == id).unwrap().usage_count;
        assert_eq!(usage(&a), 0);
        assert_eq!(usage(&b), 1);
    }
}
