//! Storage traits the sync engine runs against.
//!
//! A production client backs these with its database layer; tests and
//! the reference implementation use [`crate::MemoryStore`]. Every
//! method is async because each call is a potential suspension point
//! for a real backend.

use crate::error::StoreResult;
use crate::meta::SyncMeta;
use crate::records::{
    ActiveSession, Book, Chapter, Contributor, ContributorRole, Genre, Lens, ListeningEvent,
    PlaybackProgress, ReadingSession, Series, Shelf, SyncRecord, Tag,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Per-entity CRUD surface for conflict-checked record types.
#[async_trait]
pub trait RecordStore<R: SyncRecord>: Send + Sync {
    /// Inserts or overwrites the given records by ID.
    async fn upsert_all(&self, records: Vec<R>) -> StoreResult<()>;

    /// Deletes the given IDs. Returns the number of rows removed.
    async fn delete_by_ids(&self, ids: &[String]) -> StoreResult<u64>;

    /// Replaces the whole table with the given records.
    async fn replace_all(&self, records: Vec<R>) -> StoreResult<()>;

    /// Fetches a single record.
    async fn get(&self, id: &str) -> StoreResult<Option<R>>;

    /// Counts all rows.
    async fn count(&self) -> StoreResult<u64>;

    /// Returns sync bookkeeping for the given IDs. Missing IDs are
    /// simply absent from the result.
    async fn sync_meta_for(&self, ids: &[String]) -> StoreResult<HashMap<String, SyncMeta>>;

    /// Returns sync bookkeeping for every row.
    async fn all_sync_meta(&self) -> StoreResult<HashMap<String, SyncMeta>>;

    /// Flips a record into conflict state, retaining the colliding
    /// server version for later reconciliation. The record payload is
    /// left untouched.
    async fn mark_conflict(&self, id: &str, server_version: DateTime<Utc>) -> StoreResult<()>;
}

/// Storage for entity types the server fully owns. No conflict
/// bookkeeping; every pull replaces the local rows wholesale.
#[async_trait]
pub trait SnapshotStore<R: Clone + Send + Sync + 'static>: Send + Sync {
    /// Replaces all local rows with the given snapshot.
    async fn replace_snapshot(&self, rows: Vec<R>) -> StoreResult<()>;

    /// Returns all rows.
    async fn snapshot(&self) -> StoreResult<Vec<R>>;

    /// Counts all rows.
    async fn snapshot_count(&self) -> StoreResult<u64>;
}

/// Storage for listening history. Events are immutable and upserted by
/// ID, so re-pulling the same window is idempotent.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Inserts or overwrites events by ID. Returns how many were
    /// written.
    async fn upsert_events(&self, events: Vec<ListeningEvent>) -> StoreResult<u64>;

    /// Counts all stored events.
    async fn event_count(&self) -> StoreResult<u64>;
}

/// Dependent sub-entities of a book. Each replace is delete-then-insert
/// per parent so a pull yields a consistent copy of the server state
/// rather than a merge.
#[async_trait]
pub trait BookRelations: Send + Sync {
    /// Replaces all chapters of a book.
    async fn replace_chapters(&self, book_id: &str, chapters: Vec<Chapter>) -> StoreResult<()>;

    /// Replaces all contributor-role links of a book.
    async fn replace_contributor_roles(
        &self,
        book_id: &str,
        roles: Vec<ContributorRole>,
    ) -> StoreResult<()>;

    /// Replaces all tag links of a book.
    async fn replace_book_tags(&self, book_id: &str, tag_ids: Vec<String>) -> StoreResult<()>;

    /// Stores the accent color extracted from the book's cover. A
    /// no-op when the book no longer exists; artwork extraction runs
    /// detached from the pull and may finish after a delete.
    async fn set_accent_color(&self, book_id: &str, color: Option<String>) -> StoreResult<()>;

    /// Returns the chapters of a book.
    async fn chapters_for(&self, book_id: &str) -> StoreResult<Vec<Chapter>>;

    /// Returns the contributor-role links of a book.
    async fn contributor_roles_for(&self, book_id: &str) -> StoreResult<Vec<ContributorRole>>;

    /// Returns the tag links of a book.
    async fn book_tags_for(&self, book_id: &str) -> StoreResult<Vec<String>>;
}

/// The full storage surface the sync engine needs, as one bound.
pub trait LibraryStore:
    RecordStore<Book>
    + RecordStore<Series>
    + RecordStore<Contributor>
    + RecordStore<Tag>
    + RecordStore<Genre>
    + RecordStore<Shelf>
    + RecordStore<Lens>
    + RecordStore<PlaybackProgress>
    + SnapshotStore<ReadingSession>
    + SnapshotStore<ActiveSession>
    + EventStore
    + BookRelations
    + 'static
{
}

impl<T> LibraryStore for T where
    T: RecordStore<Book>
        + RecordStore<Series>
        + RecordStore<Contributor>
        + RecordStore<Tag>
        + RecordStore<Genre>
        + RecordStore<Shelf>
        + RecordStore<Lens>
        + RecordStore<PlaybackProgress>
        + SnapshotStore<ReadingSession>
        + SnapshotStore<ActiveSession>
        + EventStore
        + BookRelations
        + 'static
{
}
