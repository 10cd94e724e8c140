//! Daily mutation quotas to limit abuse.
//!
//! Each (user, category, UTC day) has one counter. A mutation runs only if
//! every counter it touches is below its limit, and the counters are bumped
//! in the same transaction as the mutation itself.

use crate::config::QuotaLimits;
use crate::store::{DocumentStore, QuotaCounter, Transaction};
use crate::{Result, VaultError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Kind of mutation counted against a daily limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaCategory {
    Create,
    SecretChange,
    UsernameChange,
    MetadataChange,
    SoftDelete,
    Restore,
}

impl QuotaCategory {
    pub const ALL: [QuotaCategory; 6] = [
        Self::Create,
        Self::SecretChange,
        Self::UsernameChange,
        Self::MetadataChange,
        Self::SoftDelete,
        Self::Restore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::SecretChange => "secret_change",
            Self::UsernameChange => "username_change",
            Self::MetadataChange => "metadata_change",
            Self::SoftDelete => "soft_delete",
            Self::Restore => "restore",
        }
    }
}

impl fmt::Display for QuotaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Build the counter key for a (user, category, day) tuple.
pub fn scope_key(user_id: &str, category: QuotaCategory, day: NaiveDate) -> String {
    format!("{}:{}:{}", user_id, category, day.format("%Y-%m-%d"))
}

/// One counter to check and bump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaScope {
    pub category: QuotaCategory,
    pub key: String,
    pub limit: u32,
}

/// Check-and-increment every scope, then run `mutation`, inside `tx`.
///
/// If any counter is already at its limit nothing is written and
/// [`VaultError::QuotaExceeded`] is returned.
pub fn guard<T>(
    tx: &mut dyn Transaction,
    scopes: &[QuotaScope],
    mutation: impl FnOnce(&mut dyn Transaction) -> Result<T>,
) -> Result<T> {
    let mut counters = Vec::with_capacity(scopes.len());
    for scope in scopes {
        let count = tx.get_counter(&scope.key)?.map(|c| c.count).unwrap_or(0);
        if count >= scope.limit {
            warn!(
                category = %scope.category,
                limit = scope.limit,
                "Quota exceeded; rejecting mutation"
            );
            return Err(VaultError::QuotaExceeded {
                category: scope.category,
                limit: scope.limit,
            });
        }
        counters.push((scope, count));
    }

    let value = mutation(tx)?;

    let now = tx.now();
    for (scope, count) in counters {
        tx.put_counter(&QuotaCounter {
            scope_key: scope.key.clone(),
            count: count + 1,
            updated_at: now,
        })?;
        debug!(scope = %scope.key, count = count + 1, "Quota counter incremented");
    }

    Ok(value)
}

/// Quota policy for one vault
#[derive(Debug, Clone)]
pub struct QuotaGuard {
    limits: QuotaLimits,
}

impl QuotaGuard {
    pub fn new(limits: QuotaLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &QuotaLimits {
        &self.limits
    }

    /// Scope for `category` on the day containing `now`.
    pub fn scope(&self, user_id: &str, category: QuotaCategory, now: DateTime<Utc>) -> QuotaScope {
        QuotaScope {
            category,
            key: scope_key(user_id, category, now.date_naive()),
            limit: self.limits.limit_for(category),
        }
    }

    /// Guard `mutation` with one scope per distinct category, inside `tx`.
    pub fn check<T>(
        &self,
        tx: &mut dyn Transaction,
        user_id: &str,
        categories: &[QuotaCategory],
        mutation: impl FnOnce(&mut dyn Transaction) -> Result<T>,
    ) -> Result<T> {
        let now = tx.now();
        let mut scopes: Vec<QuotaScope> = Vec::with_capacity(categories.len());
        for category in categories {
            if !scopes.iter().any(|s| s.category == *category) {
                scopes.push(self.scope(user_id, *category, now));
            }
        }
        guard(tx, &scopes, mutation)
    }

    /// Open a store transaction and run `mutation` under the given quotas.
    pub async fn run<S, T, F>(
        &self,
        store: &S,
        user_id: &str,
        categories: &[QuotaCategory],
        mutation: F,
    ) -> Result<T>
    where
        S: DocumentStore,
        T: Send,
        F: FnOnce(&mut dyn Transaction) -> Result<T> + Send,
    {
        store
            .transaction(|tx| self.check(tx, user_id, categories, mutation))
            .await
    }

    /// Remaining allowance per category for today. Read-only.
    pub async fn remaining<S: DocumentStore>(
        &self,
        store: &S,
        user_id: &str,
    ) -> Result<Vec<(QuotaCategory, u32)>> {
        let now = store.now();
        let scopes: Vec<QuotaScope> = QuotaCategory::ALL
            .iter()
            .map(|category| self.scope(user_id, *category, now))
            .collect();
        let keys: Vec<String> = scopes.iter().map(|s| s.key.clone()).collect();
        let counters = store.get_counters(&keys).await?;

        Ok(scopes
            .into_iter()
            .map(|scope| {
                let used = counters
                    .iter()
                    .find(|c| c.scope_key == scope.key)
                    .map(|c| c.count)
                    .unwrap_or(0);
                (scope.category, scope.limit.saturating_sub(used))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteStore;

    fn limits(create: u32) -> QuotaLimits {
        QuotaLimits {
            create,
            ..QuotaLimits::default()
        }
    }

    #[test]
    fn test_scope_key_format() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(
            scope_key("user-1", QuotaCategory::SoftDelete, day),
            "user-1:soft_delete:2026-03-07"
        );
    }

    #[test]
    fn test_scope_is_day_granular() {
        let guard = QuotaGuard::new(QuotaLimits::default());
        let late = "2026-03-07T23:59:59Z".parse::<DateTime<Utc>>().unwrap();
        let early = "2026-03-08T00:00:01Z".parse::<DateTime<Utc>>().unwrap();

        let a = guard.scope("u", QuotaCategory::Create, late);
        let b = guard.scope("u", QuotaCategory::Create, early);
        assert_ne!(a.key, b.key);
        assert_eq!(a.limit, 20);
    }

    #[tokio::test]
    async fn test_limit_enforced() {
        let store = SqliteStore::in_memory().unwrap();
        let guard = QuotaGuard::new(limits(2));

        for _ in 0..2 {
            guard
                .run(&store, "u1", &[QuotaCategory::Create], |_| Ok(()))
                .await
                .unwrap();
        }

        let mut ran = false;
        let result = guard
            .run(&store, "u1", &[QuotaCategory::Create], |_| {
                ran = true;
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(VaultError::QuotaExceeded {
                category: QuotaCategory::Create,
                limit: 2
            })
        ));
        assert!(!ran);
    }

    #[tokio::test]
    async fn test_users_and_categories_are_independent() {
        let store = SqliteStore::in_memory().unwrap();
        let guard = QuotaGuard::new(limits(1));

        guard
            .run(&store, "u1", &[QuotaCategory::Create], |_| Ok(()))
            .await
            .unwrap();
        guard
            .run(&store, "u2", &[QuotaCategory::Create], |_| Ok(()))
            .await
            .unwrap();
        guard
            .run(&store, "u1", &[QuotaCategory::Restore], |_| Ok(()))
            .await
            .unwrap();

        assert!(guard
            .run(&store, "u1", &[QuotaCategory::Create], |_| Ok(()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_failed_mutation_does_not_count() {
        let store = SqliteStore::in_memory().unwrap();
        let guard = QuotaGuard::new(limits(1));

        let failed: Result<()> = guard
            .run(&store, "u1", &[QuotaCategory::Create], |_| {
                Err(VaultError::NotFound("record".to_string()))
            })
            .await;
        assert!(matches!(failed, Err(VaultError::NotFound(_))));

        guard
            .run(&store, "u1", &[QuotaCategory::Create], |_| Ok(()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_any_exhausted_scope_blocks_all() {
        let store = SqliteStore::in_memory().unwrap();
        let guard = QuotaGuard::new(QuotaLimits {
            username_change: 1,
            ..QuotaLimits::default()
        });

        guard
            .run(&store, "u1", &[QuotaCategory::UsernameChange], |_| Ok(()))
            .await
            .unwrap();

        let result = guard
            .run(
                &store,
                "u1",
                &[QuotaCategory::MetadataChange, QuotaCategory::UsernameChange],
                |_| Ok(()),
            )
            .await;
        assert!(matches!(
            result,
            Err(VaultError::QuotaExceeded {
                category: QuotaCategory::UsernameChange,
                ..
            })
        ));

        // The metadata counter was not bumped by the rejected call.
        let remaining = guard.remaining(&store, "u1").await.unwrap();
        let metadata = remaining
            .iter()
            .find(|(c, _)| *c == QuotaCategory::MetadataChange)
            .unwrap();
        assert_eq!(metadata.1, 50);
    }

    #[tokio::test]
    async fn test_zero_limit_rejects_everything() {
        let store = SqliteStore::in_memory().unwrap();
        let guard = QuotaGuard::new(limits(0));

        assert!(guard
            .run(&store, "u1", &[QuotaCategory::Create], |_| Ok(()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_duplicate_categories_count_once() {
        let store = SqliteStore::in_memory().unwrap();
        let guard = QuotaGuard::new(limits(5));

        guard
            .run(
                &store,
                "u1",
                &[QuotaCategory::Create, QuotaCategory::Create],
                |_| Ok(()),
            )
            .await
            .unwrap();

        let remaining = guard.remaining(&store, "u1").await.unwrap();
        assert!(remaining.contains(&(QuotaCategory::Create, 4)));
    }

    #[tokio::test]
    async fn test_remaining_reads_alongside_writer() {
        let path =
            std::env::temp_dir().join(format!("lockbox_quota_{}.db", uuid::Uuid::new_v4()));
        let store = SqliteStore::open(&path).unwrap();
        let guard = QuotaGuard::new(limits(5));
        guard
            .run(&store, "u1", &[QuotaCategory::Create], |_| Ok(()))
            .await
            .unwrap();

        let writer = rusqlite::Connection::open(&path).unwrap();
        writer.execute_batch("BEGIN IMMEDIATE").unwrap();

        let remaining = guard.remaining(&store, "u1").await.unwrap();
        assert!(remaining.contains(&(QuotaCategory::Create, 4)));
        assert!(remaining.contains(&(QuotaCategory::Restore, 50)));

        writer.execute_batch("ROLLBACK").unwrap();
        drop(writer);
        drop(store);
        let _ = std::fs::remove_file(&path);
    }
}
