//! Transactional document store contract.
//!
//! The vault core only needs three things from its backing store:
//! document reads and writes, an atomic read-then-conditional-write
//! transaction, and an ordered listing of soft-deleted records.

pub mod models;
pub mod sqlite;

pub use models::{QuotaCounter, RecordKind, StoredRecord, Tag};

use crate::{Result, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Result type for raw store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One row of a record listing, decoded or not
pub type ListedRecord = StoreResult<StoredRecord>;

/// Document operations available inside one atomic transaction
///
/// Everything done through a handle commits together when the transaction
/// closure returns `Ok`, and nothing is written when it returns `Err`.
pub trait Transaction {
    /// Current time on the store's clock.
    fn now(&self) -> DateTime<Utc>;

    fn get_record(&mut self, id: &str) -> StoreResult<Option<StoredRecord>>;

    /// Insert or replace a record document.
    fn put_record(&mut self, record: &StoredRecord) -> StoreResult<()>;

    /// Remove a record document. Returns whether it existed.
    fn delete_record(&mut self, id: &str) -> StoreResult<bool>;

    /// Every record of a user (active or trashed) referencing `tag_id`.
    fn records_with_tag(&mut self, user_id: &str, tag_id: &str) -> StoreResult<Vec<StoredRecord>>;

    fn get_counter(&mut self, scope_key: &str) -> StoreResult<Option<QuotaCounter>>;

    fn put_counter(&mut self, counter: &QuotaCounter) -> StoreResult<()>;

    fn get_tag(&mut self, id: &str) -> StoreResult<Option<Tag>>;

    /// Look a tag up by its normalized name.
    fn find_tag(&mut self, user_id: &str, normalized_name: &str) -> StoreResult<Option<Tag>>;

    fn put_tag(&mut self, tag: &Tag) -> StoreResult<()>;

    fn delete_tag(&mut self, id: &str) -> StoreResult<bool>;
}

/// A remote (or local) document store with an atomic transaction primitive
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Run `f` as one atomic unit.
    async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut dyn Transaction) -> Result<T> + Send;

    /// Current time on the store's clock.
    fn now(&self) -> DateTime<Utc>;

    /// Active (not soft-deleted) records of a user.
    ///
    /// Rows that cannot be decoded come back as
    /// [`StoreError::CorruptRecord`] entries in place.
    async fn list_records(&self, user_id: &str) -> StoreResult<Vec<ListedRecord>>;

    /// Soft-deleted records of a user, most recently deleted first.
    ///
    /// Fails with [`StoreError::IndexUnavailable`] when the store cannot
    /// serve the ordered query.
    async fn list_trash(&self, user_id: &str) -> StoreResult<Vec<ListedRecord>>;

    async fn list_tags(&self, user_id: &str) -> StoreResult<Vec<Tag>>;

    /// Read quota counters outside a write transaction. Unknown keys are
    /// left out.
    async fn get_counters(&self, scope_keys: &[String]) -> StoreResult<Vec<QuotaCounter>>;
}
