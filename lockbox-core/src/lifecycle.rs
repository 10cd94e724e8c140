//! Record lifecycle: soft delete, restore, hard delete, and the bounded trash.
//!
//! ```text
//! Active -> SoftDeleted -> Active      (restore)
//!                       -> gone        (hard delete / trash overflow)
//! ```

use crate::quota::{QuotaCategory, QuotaGuard};
use crate::store::{DocumentStore, Transaction};
use crate::tags::adjust_usage;
use crate::{Result, StoreError, VaultError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Maximum number of soft-deleted records kept per user
pub const TRASH_CAPACITY: usize = 5;

/// What happened to the trash after a soft delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrimStatus {
    /// Trash was within bounds after evicting these ids (oldest first removed)
    Trimmed { evicted: Vec<String> },
    /// The trim could not run (or failed part way); the soft delete still stands
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftDeleteOutcome {
    pub id: String,
    pub deleted_at: DateTime<Utc>,
    pub trim: TrimStatus,
}

/// Soft-delete / restore / hard-delete state machine over one store
pub struct LifecycleManager<S> {
    store: Arc<S>,
    quota: QuotaGuard,
}

impl<S: DocumentStore> LifecycleManager<S> {
    pub fn new(store: Arc<S>, quota: QuotaGuard) -> Self {
        Self { store, quota }
    }

    /// Move a record to the trash, then evict anything beyond
    /// [`TRASH_CAPACITY`].
    ///
    /// Eviction is best effort: once the record is flagged, a failing trim
    /// is reported as [`TrimStatus::Skipped`] instead of an error.
    pub async fn soft_delete(&self, user_id: &str, id: &str) -> Result<SoftDeleteOutcome> {
        let deleted_at = self
            .quota
            .run(&*self.store, user_id, &[QuotaCategory::SoftDelete], |tx| {
                let mut record = owned_record(tx, user_id, id)?;
                if record.is_deleted() {
                    return Err(VaultError::InvalidInput(format!(
                        "Record {} is already in the trash",
                        id
                    )));
                }

                let now = tx.now();
                record.deleted_at = Some(now);
                record.updated_at = now;
                tx.put_record(&record)?;
                Ok(now)
            })
            .await?;

        info!(record_id = %id, "Record moved to trash");

        let trim = match self.trim_trash(user_id).await {
            Ok(trim) => trim,
            Err(e) => {
                warn!(record_id = %id, error = %e, "Trash trim failed; soft delete kept");
                TrimStatus::Skipped {
                    reason: e.to_string(),
                }
            }
        };

        Ok(SoftDeleteOutcome {
            id: id.to_string(),
            deleted_at,
            trim,
        })
    }

    /// Hard-delete every trashed record beyond the most recent
    /// [`TRASH_CAPACITY`].
    pub async fn trim_trash(&self, user_id: &str) -> Result<TrimStatus> {
        let trash = match self.store.list_trash(user_id).await {
            Ok(trash) => trash,
            Err(StoreError::IndexUnavailable(reason)) => {
                warn!(%reason, "Trash ordering unavailable; skipping trim");
                return Ok(TrimStatus::Skipped { reason });
            }
            Err(e) => return Err(e.into()),
        };

        let overflow: Vec<String> = trash
            .into_iter()
            .skip(TRASH_CAPACITY)
            .filter_map(|listed| match listed {
                Ok(record) => Some(record.id),
                Err(StoreError::CorruptRecord { id, .. }) => Some(id),
                Err(e) => {
                    warn!(error = %e, "Unreadable trash entry left in place");
                    None
                }
            })
            .collect();

        let mut evicted = Vec::new();
        for id in overflow {
            if self.hard_delete(user_id, &id).await? {
                evicted.push(id);
            }
        }

        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted oldest records from trash");
        }

        Ok(TrimStatus::Trimmed { evicted })
    }

    /// Bring a trashed record back.
    ///
    /// Fails with `NotFound` if the record no longer exists (e.g. it was
    /// evicted from the trash) and `InvalidInput` if it is not in the trash.
    pub async fn restore(&self, user_id: &str, id: &str) -> Result<()> {
        self.store
            .transaction(|tx| {
                let mut record = owned_record(tx, user_id, id)?;
                if !record.is_deleted() {
                    return Err(VaultError::InvalidInput(format!(
                        "Record {} is not in the trash",
                        id
                    )));
                }
                self.quota.check(tx, user_id, &[QuotaCategory::Restore], move |tx| {
                    record.deleted_at = None;
                    record.updated_at = tx.now();
                    tx.put_record(&record)?;
                    Ok(())
                })
            })
            .await?;

        info!(record_id = %id, "Record restored from trash");
        Ok(())
    }

    /// Permanently remove a record. Not quota-gated.
    ///
    /// Returns `false` if there was nothing to remove.
    pub async fn hard_delete(&self, user_id: &str, id: &str) -> Result<bool> {
        let removed = self
            .store
            .transaction(|tx| {
                match owned_record(tx, user_id, id) {
                    Ok(record) => adjust_usage(tx, &record.tag_ids, &[])?,
                    Err(VaultError::NotFound(_)) => return Ok(false),
                    // Owned but undecodable: drop it without touching tag counts.
                    Err(VaultError::Store(StoreError::CorruptRecord { reason, .. })) => {
                        warn!(record_id = %id, %reason, "Purging corrupt record");
                    }
                    Err(e) => return Err(e),
                }
                Ok(tx.delete_record(id)?)
            })
            .await?;

        if removed {
            info!(record_id = %id, "Record permanently deleted");
        }
        Ok(removed)
    }
}

/// Load a record that belongs to `user_id`, or `NotFound`.
pub(crate) fn owned_record(
    tx: &mut dyn Transaction,
    user_id: &str,
    id: &str,
) -> Result<crate::store::StoredRecord> {
    let not_found = || VaultError::NotFound(format!("Record {}", id));
    match tx.get_record(id) {
        Ok(record) => record.filter(|r| r.user_id == user_id).ok_or_else(not_found),
        Err(StoreError::CorruptRecord { user_id: owner, .. }) if owner != user_id => {
            Err(not_found())
        }
        Err(e) => Err(e.into()),
    }
}
