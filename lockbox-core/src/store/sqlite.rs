//! SQLite-backed document store.

use crate::store::{
    models::{QuotaCounter, RecordKind, StoredRecord, Tag},
    DocumentStore, ListedRecord, StoreResult, Transaction,
};
use crate::{Result, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Current schema version. Incremented when the schema changes.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Name of the index backing the ordered trash query.
pub const TRASH_INDEX: &str = "idx_records_trash";

const RECORD_COLUMNS: &str = "id, user_id, kind, name, category, url, username, notes,
     tag_ids, secrets, created_at, updated_at, deleted_at";

const TAG_COLUMNS: &str = "id, user_id, name, normalized_name, color, usage_count, created_at";

/// Thread-safe SQLite store
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (and initialize) a store at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create a new in-memory store for testing
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS store_metadata (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                category TEXT NOT NULL,
                url TEXT,
                username TEXT,
                notes TEXT,
                tag_ids TEXT NOT NULL DEFAULT '[]',
                secrets TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                deleted_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS tags (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                normalized_name TEXT NOT NULL,
                color TEXT NOT NULL,
                usage_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                UNIQUE (user_id, normalized_name)
            );

            CREATE TABLE IF NOT EXISTS quota_counters (
                scope_key TEXT PRIMARY KEY,
                count INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_records_user
                ON records(user_id, is_deleted);
            CREATE INDEX IF NOT EXISTS {TRASH_INDEX}
                ON records(user_id, is_deleted, deleted_at);

            INSERT OR IGNORE INTO store_metadata (id, version) VALUES (1, {CURRENT_SCHEMA_VERSION});"
        ))?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::LockPoisoned(format!("Failed to lock database: {}", e)))
    }

    /// Stored schema version.
    pub fn schema_version(&self) -> StoreResult<i32> {
        let conn = self.conn()?;
        let version = conn.query_row("SELECT version FROM store_metadata WHERE id = 1", [], |row| {
            row.get(0)
        })?;
        Ok(version)
    }

    fn trash_index_exists(conn: &Connection) -> StoreResult<bool> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1)",
            [TRASH_INDEX],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut dyn Transaction) -> Result<T> + Send,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::Sqlite)?;

        // Dropping `tx` without commit rolls back.
        let value = f(&mut SqliteTransaction { tx: &tx })?;
        tx.commit().map_err(StoreError::Sqlite)?;

        Ok(value)
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn list_records(&self, user_id: &str) -> StoreResult<Vec<ListedRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE user_id = ?1 AND is_deleted = 0
             ORDER BY created_at"
        ))?;
        let rows = stmt
            .query_map([user_id], RecordRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows.into_iter().map(RecordRow::into_record).collect())
    }

    async fn list_trash(&self, user_id: &str) -> StoreResult<Vec<ListedRecord>> {
        let conn = self.conn()?;
        if !Self::trash_index_exists(&conn)? {
            return Err(StoreError::IndexUnavailable(format!(
                "{} is missing; ordered trash query disabled",
                TRASH_INDEX
            )));
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records INDEXED BY {TRASH_INDEX}
             WHERE user_id = ?1 AND is_deleted = 1
             ORDER BY deleted_at DESC"
        ))?;
        let rows = stmt
            .query_map([user_id], RecordRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows.into_iter().map(RecordRow::into_record).collect())
    }

    async fn list_tags(&self, user_id: &str) -> StoreResult<Vec<Tag>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TAG_COLUMNS} FROM tags WHERE user_id = ?1 ORDER BY normalized_name"
        ))?;
        let tags = stmt
            .query_map([user_id], tag_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    async fn get_counters(&self, scope_keys: &[String]) -> StoreResult<Vec<QuotaCounter>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT scope_key, count, updated_at FROM quota_counters WHERE scope_key = ?1",
        )?;

        let mut counters = Vec::with_capacity(scope_keys.len());
        for key in scope_keys {
            if let Some(counter) = stmt.query_row([key], counter_from_row).optional()? {
                counters.push(counter);
            }
        }
        Ok(counters)
    }
}

/// Transaction handle over an open SQLite transaction
struct SqliteTransaction<'a> {
    tx: &'a rusqlite::Transaction<'a>,
}

impl Transaction for SqliteTransaction<'_> {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn get_record(&mut self, id: &str) -> StoreResult<Option<StoredRecord>> {
        let row = self
            .tx
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"),
                [id],
                RecordRow::from_row,
            )
            .optional()?;

        row.map(RecordRow::into_record).transpose()
    }

    fn put_record(&mut self, record: &StoredRecord) -> StoreResult<()> {
        let tag_ids = serde_json::to_string(&record.tag_ids)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let secrets = serde_json::to_string(&record.secrets)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        self.tx.execute(
            "INSERT INTO records (
                id, user_id, kind, name, category, url, username, notes,
                tag_ids, secrets, created_at, updated_at, is_deleted, deleted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                name = excluded.name,
                category = excluded.category,
                url = excluded.url,
                username = excluded.username,
                notes = excluded.notes,
                tag_ids = excluded.tag_ids,
                secrets = excluded.secrets,
                updated_at = excluded.updated_at,
                is_deleted = excluded.is_deleted,
                deleted_at = excluded.deleted_at",
            rusqlite::params![
                record.id,
                record.user_id,
                record.kind.as_str(),
                record.name,
                record.category,
                record.url,
                record.username,
                record.notes,
                tag_ids,
                secrets,
                record.created_at.timestamp_micros(),
                record.updated_at.timestamp_micros(),
                record.is_deleted(),
                record.deleted_at.map(|t| t.timestamp_micros()),
            ],
        )?;
        Ok(())
    }

    fn delete_record(&mut self, id: &str) -> StoreResult<bool> {
        let rows = self.tx.execute("DELETE FROM records WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    fn records_with_tag(&mut self, user_id: &str, tag_id: &str) -> StoreResult<Vec<StoredRecord>> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE user_id = ?1
               AND EXISTS (SELECT 1 FROM json_each(records.tag_ids) WHERE value = ?2)"
        ))?;
        let rows = stmt
            .query_map([user_id, tag_id], RecordRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(RecordRow::into_record).collect()
    }

    fn get_counter(&mut self, scope_key: &str) -> StoreResult<Option<QuotaCounter>> {
        let counter = self
            .tx
            .query_row(
                "SELECT scope_key, count, updated_at FROM quota_counters WHERE scope_key = ?1",
                [scope_key],
                counter_from_row,
            )
            .optional()?;
        Ok(counter)
    }

    fn put_counter(&mut self, counter: &QuotaCounter) -> StoreResult<()> {
        self.tx.execute(
            "INSERT INTO quota_counters (scope_key, count, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(scope_key) DO UPDATE SET
                count = excluded.count,
                updated_at = excluded.updated_at",
            rusqlite::params![
                counter.scope_key,
                counter.count,
                counter.updated_at.timestamp_micros()
            ],
        )?;
        Ok(())
    }

    fn get_tag(&mut self, id: &str) -> StoreResult<Option<Tag>> {
        let tag = self
            .tx
            .query_row(
                &format!("SELECT {TAG_COLUMNS} FROM tags WHERE id = ?1"),
                [id],
                tag_from_row,
            )
            .optional()?;
        Ok(tag)
    }

    fn find_tag(&mut self, user_id: &str, normalized_name: &str) -> StoreResult<Option<Tag>> {
        let tag = self
            .tx
            .query_row(
                &format!(
                    "SELECT {TAG_COLUMNS} FROM tags WHERE user_id = ?1 AND normalized_name = ?2"
                ),
                [user_id, normalized_name],
                tag_from_row,
            )
            .optional()?;
        Ok(tag)
    }

    fn put_tag(&mut self, tag: &Tag) -> StoreResult<()> {
        self.tx.execute(
            "INSERT INTO tags (id, user_id, name, normalized_name, color, usage_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                normalized_name = excluded.normalized_name,
                color = excluded.color,
                usage_count = excluded.usage_count",
            rusqlite::params![
                tag.id,
                tag.user_id,
                tag.name,
                tag.normalized_name,
                tag.color,
                tag.usage_count,
                tag.created_at.timestamp_micros(),
            ],
        )?;
        Ok(())
    }

    fn delete_tag(&mut self, id: &str) -> StoreResult<bool> {
        let rows = self.tx.execute("DELETE FROM tags WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }
}

/// Raw column values of a record row, before JSON decoding
struct RecordRow {
    id: String,
    user_id: String,
    kind: String,
    name: String,
    category: String,
    url: Option<String>,
    username: Option<String>,
    notes: Option<String>,
    tag_ids: String,
    secrets: String,
    created_at: i64,
    updated_at: i64,
    deleted_at: Option<i64>,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            kind: row.get(2)?,
            name: row.get(3)?,
            category: row.get(4)?,
            url: row.get(5)?,
            username: row.get(6)?,
            notes: row.get(7)?,
            tag_ids: row.get(8)?,
            secrets: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
            deleted_at: row.get(12)?,
        })
    }

    fn corrupt(&self, reason: String) -> StoreError {
        StoreError::CorruptRecord {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            reason,
        }
    }

    fn into_record(self) -> StoreResult<StoredRecord> {
        let kind = RecordKind::parse(&self.kind)
            .ok_or_else(|| self.corrupt(format!("unknown kind {:?}", self.kind)))?;
        let tag_ids = serde_json::from_str(&self.tag_ids)
            .map_err(|e| self.corrupt(format!("tag_ids: {}", e)))?;
        let secrets = serde_json::from_str(&self.secrets)
            .map_err(|e| self.corrupt(format!("secrets: {}", e)))?;

        Ok(StoredRecord {
            id: self.id,
            user_id: self.user_id,
            kind,
            name: self.name,
            category: self.category,
            url: self.url,
            username: self.username,
            notes: self.notes,
            tag_ids,
            secrets,
            created_at: from_micros(self.created_at),
            updated_at: from_micros(self.updated_at),
            deleted_at: self.deleted_at.map(from_micros),
        })
    }
}

fn counter_from_row(row: &Row<'_>) -> rusqlite::Result<QuotaCounter> {
    Ok(QuotaCounter {
        scope_key: row.get(0)?,
        count: row.get(1)?,
        updated_at: from_micros(row.get(2)?),
    })
}

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        normalized_name: row.get(3)?,
        color: row.get(4)?,
        usage_count: row.get(5)?,
        created_at: from_micros(row.get(6)?),
    })
}

fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CipherMode, SecretEnvelope, SessionKey};
    use crate::VaultError;

    fn sample_record(id: &str, user_id: &str, tag_ids: &[&str]) -> StoredRecord {
        let key = SessionKey::generate();
        let now = Utc::now();
        StoredRecord {
            id: id.to_string(),
            user_id: user_id.to_string(),
            kind: RecordKind::Credential,
            name: format!("Service {}", id),
            category: "api".to_string(),
            url: None,
            username: None,
            notes: None,
            tag_ids: tag_ids.iter().map(|t| t.to_string()).collect(),
            secrets: SecretEnvelope::seal(&key, CipherMode::Gcm, &[("key", "k")]).unwrap(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn test_schema_version() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_put_and_get_record() {
        let store = SqliteStore::in_memory().unwrap();
        let record = sample_record("r1", "u1", &["t1"]);

        let stored = record.clone();
        store
            .transaction(move |tx| {
                tx.put_record(&stored)?;
                Ok(())
            })
            .await
            .unwrap();

        let fetched = store
            .transaction(|tx| Ok(tx.get_record("r1")?))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(fetched.id, record.id);
        assert_eq!(fetched.secrets, record.secrets);
        assert_eq!(fetched.tag_ids, vec!["t1".to_string()]);
        assert_eq!(
            fetched.created_at.timestamp_micros(),
            record.created_at.timestamp_micros()
        );
    }

    #[tokio::test]
    async fn test_failed_transaction_rolls_back() {
        let store = SqliteStore::in_memory().unwrap();
        let record = sample_record("r1", "u1", &[]);

        let result: Result<()> = store
            .transaction(move |tx| {
                tx.put_record(&record)?;
                Err(VaultError::InvalidInput("abort".to_string()))
            })
            .await;
        assert!(result.is_err());

        assert!(store.list_records("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_trash_ordering() {
        let store = SqliteStore::in_memory().unwrap();
        let base = Utc::now();

        store
            .transaction(move |tx| {
                for (i, id) in ["a", "b", "c"].iter().enumerate() {
                    let mut record = sample_record(id, "u1", &[]);
                    record.deleted_at = Some(base + chrono::Duration::seconds(i as i64));
                    tx.put_record(&record)?;
                }
                tx.put_record(&sample_record("live", "u1", &[]))?;
                Ok(())
            })
            .await
            .unwrap();

        let trash = store.list_trash("u1").await.unwrap();
        let ids: Vec<_> = trash
            .iter()
            .map(|r| r.as_ref().unwrap().id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        let active = store.list_records("u1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].as_ref().unwrap().id, "live");
    }

    #[tokio::test]
    async fn test_corrupt_row_is_listed_in_place() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .transaction(|tx| {
                tx.put_record(&sample_record("r1", "u1", &[]))?;
                tx.put_record(&sample_record("r2", "u1", &[]))?;
                Ok(())
            })
            .await
            .unwrap();
        store
            .conn()
            .unwrap()
            .execute("UPDATE records SET secrets = 'not json' WHERE id = 'r1'", [])
            .unwrap();

        let listed = store.list_records("u1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(matches!(
            &listed[0],
            Err(StoreError::CorruptRecord { id, user_id, .. }) if id == "r1" && user_id == "u1"
        ));
        assert_eq!(listed[1].as_ref().unwrap().id, "r2");

        let result = store.transaction(|tx| Ok(tx.get_record("r1")?)).await;
        assert!(matches!(
            result,
            Err(VaultError::Store(StoreError::CorruptRecord { .. }))
        ));
    }

    #[tokio::test]
    async fn test_list_trash_without_index_is_unavailable() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .conn()
            .unwrap()
            .execute_batch(&format!("DROP INDEX {TRASH_INDEX}"))
            .unwrap();

        assert!(matches!(
            store.list_trash("u1").await,
            Err(StoreError::IndexUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_records_with_tag() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .transaction(|tx| {
                tx.put_record(&sample_record("r1", "u1", &["t1", "t2"]))?;
                tx.put_record(&sample_record("r2", "u1", &["t2"]))?;
                tx.put_record(&sample_record("r3", "u2", &["t1"]))?;
                Ok(())
            })
            .await
            .unwrap();

        let mut ids = store
            .transaction(|tx| {
                Ok(tx
                    .records_with_tag("u1", "t1")?
                    .into_iter()
                    .map(|r| r.id)
                    .collect::<Vec<_>>())
            })
            .await
            .unwrap();
        ids.sort();
        assert_eq!(ids, vec!["r1".to_string()]);
    }

    #[tokio::test]
    async fn test_counter_upsert() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();

        let counter = store
            .transaction(move |tx| {
                tx.put_counter(&QuotaCounter {
                    scope_key: "u1:create:2026-01-01".to_string(),
                    count: 1,
                    updated_at: now,
                })?;
                tx.put_counter(&QuotaCounter {
                    scope_key: "u1:create:2026-01-01".to_string(),
                    count: 2,
                    updated_at: now,
                })?;
                Ok(tx.get_counter("u1:create:2026-01-01")?)
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(counter.count, 2);

        let keys = vec![
            "u1:create:2026-01-01".to_string(),
            "u1:restore:2026-01-01".to_string(),
        ];
        let counters = store.get_counters(&keys).await.unwrap();
        assert_eq!(counters.len(), 1);
        assert_eq!(counters[0].count, 2);
    }

    #[tokio::test]
    async fn test_tag_unique_normalized_name() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();
        let tag = |id: &str| Tag {
            id: id.to_string(),
            user_id: "u1".to_string(),
            name: "Work".to_string(),
            normalized_name: "work".to_string(),
            color: "#112233".to_string(),
            usage_count: 0,
            created_at: now,
        };
        let (first, second) = (tag("t1"), tag("t2"));

        let result = store
            .transaction(move |tx| {
                tx.put_tag(&first)?;
                tx.put_tag(&second)?;
                Ok(())
            })
            .await;
        assert!(result.is_err());
        assert!(store.list_tags("u1").await.unwrap().is_empty());
    }
}
