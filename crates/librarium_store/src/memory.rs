//! In-memory reference implementations of the storage contracts.
//!
//! Used by tests throughout the workspace and as executable
//! documentation of the trait semantics. Not intended for production
//! use; a real client backs the traits with its database.

use crate::error::{StoreError, StoreResult};
use crate::events::QueueEvents;
use crate::meta::SyncMeta;
use crate::queue::{
    NewOperation, OperationQueue, OperationStatus, PendingOperation, QueueStats,
    DEFAULT_MAX_RETRIES,
};
use crate::records::{
    ActiveSession, Book, Chapter, Contributor, ContributorRole, Genre, Lens, ListeningEvent,
    PlaybackProgress, ReadingSession, Series, Shelf, SyncRecord, Tag,
};
use crate::store::{BookRelations, EventStore, RecordStore, SnapshotStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};
use uuid::Uuid;

/// One conflict-checked entity table.
struct Table<R> {
    rows: RwLock<HashMap<String, R>>,
}

impl<R: SyncRecord> Table<R> {
    fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }

    fn upsert_all(&self, records: Vec<R>) {
        let mut rows = self.rows.write();
        for record in records {
            rows.insert(record.record_id().to_owned(), record);
        }
    }

    fn delete_by_ids(&self, ids: &[String]) -> u64 {
        let mut rows = self.rows.write();
        let mut removed = 0;
        for id in ids {
            if rows.remove(id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    fn replace_all(&self, records: Vec<R>) {
        let mut rows = self.rows.write();
        rows.clear();
        for record in records {
            rows.insert(record.record_id().to_owned(), record);
        }
    }

    fn get(&self, id: &str) -> Option<R> {
        self.rows.read().get(id).cloned()
    }

    fn count(&self) -> u64 {
        self.rows.read().len() as u64
    }

    fn sync_meta_for(&self, ids: &[String]) -> HashMap<String, SyncMeta> {
        let rows = self.rows.read();
        ids.iter()
            .filter_map(|id| rows.get(id).map(|r| (id.clone(), r.sync_meta().clone())))
            .collect()
    }

    fn all_sync_meta(&self) -> HashMap<String, SyncMeta> {
        self.rows
            .read()
            .iter()
            .map(|(id, r)| (id.clone(), r.sync_meta().clone()))
            .collect()
    }

    fn mark_conflict(&self, id: &str, server_version: DateTime<Utc>) -> bool {
        let mut rows = self.rows.write();
        match rows.get_mut(id) {
            Some(record) => {
                record.sync_meta_mut().mark_conflict(server_version);
                true
            }
            None => false,
        }
    }
}

/// One server-owned snapshot table.
struct SnapshotTable<R> {
    rows: RwLock<Vec<R>>,
}

impl<R: Clone> SnapshotTable<R> {
    fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
        }
    }

    fn replace(&self, rows: Vec<R>) {
        *self.rows.write() = rows;
    }

    fn all(&self) -> Vec<R> {
        self.rows.read().clone()
    }

    fn count(&self) -> u64 {
        self.rows.read().len() as u64
    }
}

/// In-memory implementation of the full library storage surface.
pub struct MemoryStore {
    books: Table<Book>,
    series: Table<Series>,
    contributors: Table<Contributor>,
    tags: Table<Tag>,
    genres: Table<Genre>,
    shelves: Table<Shelf>,
    lenses: Table<Lens>,
    progress: Table<PlaybackProgress>,
    reading_sessions: SnapshotTable<ReadingSession>,
    active_sessions: SnapshotTable<ActiveSession>,
    listening_events: RwLock<HashMap<String, ListeningEvent>>,
    chapters: RwLock<HashMap<String, Vec<Chapter>>>,
    contributor_roles: RwLock<HashMap<String, Vec<ContributorRole>>>,
    book_tags: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            books: Table::new(),
            series: Table::new(),
            contributors: Table::new(),
            tags: Table::new(),
            genres: Table::new(),
            shelves: Table::new(),
            lenses: Table::new(),
            progress: Table::new(),
            reading_sessions: SnapshotTable::new(),
            active_sessions: SnapshotTable::new(),
            listening_events: RwLock::new(HashMap::new()),
            chapters: RwLock::new(HashMap::new()),
            contributor_roles: RwLock::new(HashMap::new()),
            book_tags: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! impl_record_store {
    ($field:ident, $record:ty) => {
        #[async_trait]
        impl RecordStore<$record> for MemoryStore {
            async fn upsert_all(&self, records: Vec<$record>) -> StoreResult<()> {
                self.$field.upsert_all(records);
                Ok(())
            }

            async fn delete_by_ids(&self, ids: &[String]) -> StoreResult<u64> {
                Ok(self.$field.delete_by_ids(ids))
            }

            async fn replace_all(&self, records: Vec<$record>) -> StoreResult<()> {
                self.$field.replace_all(records);
                Ok(())
            }

            async fn get(&self, id: &str) -> StoreResult<Option<$record>> {
                Ok(self.$field.get(id))
            }

            async fn count(&self) -> StoreResult<u64> {
                Ok(self.$field.count())
            }

            async fn sync_meta_for(
                &self,
                ids: &[String],
            ) -> StoreResult<HashMap<String, SyncMeta>> {
                Ok(self.$field.sync_meta_for(ids))
            }

            async fn all_sync_meta(&self) -> StoreResult<HashMap<String, SyncMeta>> {
                Ok(self.$field.all_sync_meta())
            }

            async fn mark_conflict(
                &self,
                id: &str,
                server_version: DateTime<Utc>,
            ) -> StoreResult<()> {
                if self.$field.mark_conflict(id, server_version) {
                    Ok(())
                } else {
                    Err(StoreError::not_found(id))
                }
            }
        }
    };
}

impl_record_store!(books, Book);
impl_record_store!(series, Series);
impl_record_store!(contributors, Contributor);
impl_record_store!(tags, Tag);
impl_record_store!(genres, Genre);
impl_record_store!(shelves, Shelf);
impl_record_store!(lenses, Lens);
impl_record_store!(progress, PlaybackProgress);

#[async_trait]
impl SnapshotStore<ReadingSession> for MemoryStore {
    async fn replace_snapshot(&self, rows: Vec<ReadingSession>) -> StoreResult<()> {
        self.reading_sessions.replace(rows);
        Ok(())
    }

    async fn snapshot(&self) -> StoreResult<Vec<ReadingSession>> {
        Ok(self.reading_sessions.all())
    }

    async fn snapshot_count(&self) -> StoreResult<u64> {
        Ok(self.reading_sessions.count())
    }
}

#[async_trait]
impl SnapshotStore<ActiveSession> for MemoryStore {
    async fn replace_snapshot(&self, rows: Vec<ActiveSession>) -> StoreResult<()> {
        self.active_sessions.replace(rows);
        Ok(())
    }

    async fn snapshot(&self) -> StoreResult<Vec<ActiveSession>> {
        Ok(self.active_sessions.all())
    }

    async fn snapshot_count(&self) -> StoreResult<u64> {
        Ok(self.active_sessions.count())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn upsert_events(&self, events: Vec<ListeningEvent>) -> StoreResult<u64> {
        let mut rows = self.listening_events.write();
        let written = events.len() as u64;
        for event in events {
            rows.insert(event.id.clone(), event);
        }
        Ok(written)
    }

    async fn event_count(&self) -> StoreResult<u64> {
        Ok(self.listening_events.read().len() as u64)
    }
}

#[async_trait]
impl BookRelations for MemoryStore {
    async fn replace_chapters(&self, book_id: &str, chapters: Vec<Chapter>) -> StoreResult<()> {
        self.chapters.write().insert(book_id.to_owned(), chapters);
        Ok(())
    }

    async fn replace_contributor_roles(
        &self,
        book_id: &str,
        roles: Vec<ContributorRole>,
    ) -> StoreResult<()> {
        self.contributor_roles
            .write()
            .insert(book_id.to_owned(), roles);
        Ok(())
    }

    async fn replace_book_tags(&self, book_id: &str, tag_ids: Vec<String>) -> StoreResult<()> {
        self.book_tags.write().insert(book_id.to_owned(), tag_ids);
        Ok(())
    }

    async fn set_accent_color(&self, book_id: &str, color: Option<String>) -> StoreResult<()> {
        let mut rows = self.books.rows.write();
        if let Some(book) = rows.get_mut(book_id) {
            book.accent_color = color;
        }
        Ok(())
    }

    async fn chapters_for(&self, book_id: &str) -> StoreResult<Vec<Chapter>> {
        Ok(self.chapters.read().get(book_id).cloned().unwrap_or_default())
    }

    async fn contributor_roles_for(&self, book_id: &str) -> StoreResult<Vec<ContributorRole>> {
        Ok(self
            .contributor_roles
            .read()
            .get(book_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn book_tags_for(&self, book_id: &str) -> StoreResult<Vec<String>> {
        Ok(self.book_tags.read().get(book_id).cloned().unwrap_or_default())
    }
}

/// In-memory operation queue.
///
/// Rows live in insertion order, which equals creation order.
pub struct MemoryQueue {
    ops: RwLock<Vec<PendingOperation>>,
    events: QueueEvents,
    max_retries: u32,
}

impl MemoryQueue {
    /// Creates a queue with the default retry cap.
    pub fn new() -> Self {
        Self::with_max_retries(DEFAULT_MAX_RETRIES)
    }

    /// Creates a queue with a custom retry cap.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            ops: RwLock::new(Vec::new()),
            events: QueueEvents::new(),
            max_retries,
        }
    }

    /// Returns every row regardless of status, for inspection.
    pub fn all_operations(&self) -> Vec<PendingOperation> {
        self.ops.read().clone()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperationQueue for MemoryQueue {
    async fn enqueue(&self, op: NewOperation) -> StoreResult<PendingOperation> {
        let now = Utc::now();
        let stored = PendingOperation {
            id: Uuid::new_v4(),
            kind: op.kind,
            entity_type: op.entity_type,
            entity_id: op.entity_id,
            payload: op.payload,
            batch_key: op.batch_key,
            status: OperationStatus::Pending,
            created_at: now,
            updated_at: now,
            attempt_count: 0,
            last_error: None,
        };

        self.ops.write().push(stored.clone());
        debug!(id = %stored.id, kind = stored.kind.as_str(), "operation queued");
        self.events.emit(stored.id);
        Ok(stored)
    }

    async fn next_batch(&self, limit: usize) -> StoreResult<Vec<PendingOperation>> {
        Ok(self
            .ops
            .read()
            .iter()
            .filter(|op| op.status == OperationStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_in_progress(&self, ids: &[Uuid]) -> StoreResult<()> {
        let now = Utc::now();
        let mut ops = self.ops.write();
        for op in ops.iter_mut() {
            if ids.contains(&op.id) {
                op.status = OperationStatus::InProgress;
                op.updated_at = now;
            }
        }
        Ok(())
    }

    async fn mark_completed(&self, ids: &[Uuid]) -> StoreResult<()> {
        self.ops.write().retain(|op| !ids.contains(&op.id));
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> StoreResult<()> {
        let mut ops = self.ops.write();
        let op = ops
            .iter_mut()
            .find(|op| op.id == id)
            .ok_or_else(|| StoreError::not_found(id.to_string()))?;

        op.attempt_count += 1;
        op.updated_at = Utc::now();

        if op.attempt_count >= self.max_retries {
            op.status = OperationStatus::Failed;
            op.last_error = Some(format!("Max retries exceeded: {error}"));
            warn!(
                id = %op.id,
                attempts = op.attempt_count,
                "operation parked after exhausting retries"
            );
        } else {
            op.status = OperationStatus::Pending;
            op.last_error = Some(error.to_owned());
            debug!(
                id = %op.id,
                attempts = op.attempt_count,
                error,
                "operation failed, will retry on next flush"
            );
        }

        Ok(())
    }

    async fn reset_stuck_operations(&self) -> StoreResult<u64> {
        let now = Utc::now();
        let mut ops = self.ops.write();
        let mut reset = 0;
        for op in ops.iter_mut() {
            if op.status == OperationStatus::InProgress {
                op.status = OperationStatus::Pending;
                op.updated_at = now;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn retry_failed(&self, id: Uuid) -> StoreResult<()> {
        let retried = {
            let mut ops = self.ops.write();
            let op = ops
                .iter_mut()
                .find(|op| op.id == id)
                .ok_or_else(|| StoreError::not_found(id.to_string()))?;

            if op.status != OperationStatus::Failed {
                false
            } else {
                op.status = OperationStatus::Pending;
                op.attempt_count = 0;
                op.last_error = None;
                op.updated_at = Utc::now();
                true
            }
        };

        if retried {
            debug!(id = %id, "failed operation returned to pending");
            self.events.emit(id);
        }
        Ok(())
    }

    async fn stats(&self) -> StoreResult<QueueStats> {
        let ops = self.ops.read();
        let mut stats = QueueStats::default();
        for op in ops.iter() {
            match op.status {
                OperationStatus::Pending => stats.pending += 1,
                OperationStatus::InProgress => stats.in_progress += 1,
                OperationStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    fn subscribe(&self) -> UnboundedReceiver<Uuid> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{SyncMeta, SyncState};
    use crate::queue::OperationKind;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn book(id: &str, version: i64) -> Book {
        Book::new(id, format!("Title {id}"), SyncMeta::synced(at(version)))
    }

    #[tokio::test]
    async fn upsert_and_count() {
        let store = MemoryStore::new();
        store
            .upsert_all(vec![book("b1", 1), book("b2", 2)])
            .await
            .unwrap();

        let count = RecordStore::<Book>::count(&store).await.unwrap();
        assert_eq!(count, 2);

        // Upserting the same IDs again must not duplicate rows.
        store
            .upsert_all(vec![book("b1", 3), book("b2", 4)])
            .await
            .unwrap();
        let count = RecordStore::<Book>::count(&store).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn delete_by_ids_reports_removed() {
        let store = MemoryStore::new();
        store
            .upsert_all(vec![book("b1", 1), book("b2", 1)])
            .await
            .unwrap();

        let removed = RecordStore::<Book>::delete_by_ids(&store, &["b1".into(), "nope".into()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(RecordStore::<Book>::count(&store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mark_conflict_keeps_payload() {
        let store = MemoryStore::new();
        let mut dirty = book("b1", 1);
        dirty.title = "Locally renamed".into();
        dirty.meta = SyncMeta::locally_edited(at(50));
        store.upsert_all(vec![dirty]).await.unwrap();

        RecordStore::<Book>::mark_conflict(&store, "b1", at(40))
            .await
            .unwrap();

        let stored = RecordStore::<Book>::get(&store, "b1").await.unwrap().unwrap();
        assert_eq!(stored.title, "Locally renamed");
        assert_eq!(stored.meta.sync_state, SyncState::Conflict);
        assert_eq!(stored.meta.conflict_server_version, Some(at(40)));
    }

    #[tokio::test]
    async fn mark_conflict_missing_row() {
        let store = MemoryStore::new();
        let err = RecordStore::<Book>::mark_conflict(&store, "ghost", at(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn snapshot_replace() {
        let store = MemoryStore::new();
        let session = ReadingSession {
            id: "rs1".into(),
            book_id: "b1".into(),
            started_at: at(10),
            finished_at: None,
            pages_read: Some(12),
        };
        SnapshotStore::<ReadingSession>::replace_snapshot(&store, vec![session.clone()])
            .await
            .unwrap();
        assert_eq!(
            SnapshotStore::<ReadingSession>::snapshot_count(&store)
                .await
                .unwrap(),
            1
        );

        SnapshotStore::<ReadingSession>::replace_snapshot(&store, vec![])
            .await
            .unwrap();
        assert_eq!(
            SnapshotStore::<ReadingSession>::snapshot_count(&store)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn event_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let event = ListeningEvent {
            id: "ev1".into(),
            book_id: "b1".into(),
            started_at: at(100),
            duration_ms: 60_000,
        };

        store.upsert_events(vec![event.clone()]).await.unwrap();
        store.upsert_events(vec![event]).await.unwrap();
        assert_eq!(store.event_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn book_relations_replace() {
        let store = MemoryStore::new();
        store.upsert_all(vec![book("b1", 1)]).await.unwrap();

        let chapters = vec![
            Chapter {
                id: "c1".into(),
                book_id: "b1".into(),
                title: "One".into(),
                start_ms: 0,
                end_ms: 100,
            },
            Chapter {
                id: "c2".into(),
                book_id: "b1".into(),
                title: "Two".into(),
                start_ms: 100,
                end_ms: 200,
            },
        ];
        store.replace_chapters("b1", chapters).await.unwrap();
        assert_eq!(store.chapters_for("b1").await.unwrap().len(), 2);

        // Replace, not merge.
        store
            .replace_chapters(
                "b1",
                vec![Chapter {
                    id: "c3".into(),
                    book_id: "b1".into(),
                    title: "Rewritten".into(),
                    start_ms: 0,
                    end_ms: 50,
                }],
            )
            .await
            .unwrap();
        let chapters = store.chapters_for("b1").await.unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].id, "c3");
    }

    #[tokio::test]
    async fn accent_color_missing_book_is_noop() {
        let store = MemoryStore::new();
        store
            .set_accent_color("ghost", Some("#aabbcc".into()))
            .await
            .unwrap();

        store.upsert_all(vec![book("b1", 1)]).await.unwrap();
        store
            .set_accent_color("b1", Some("#112233".into()))
            .await
            .unwrap();
        let stored = RecordStore::<Book>::get(&store, "b1").await.unwrap().unwrap();
        assert_eq!(stored.accent_color.as_deref(), Some("#112233"));
    }

    #[tokio::test]
    async fn queue_lifecycle() {
        let queue = MemoryQueue::new();
        let op = queue
            .enqueue(NewOperation::new(OperationKind::Create))
            .await
            .unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.attempt_count, 0);

        let batch = queue.next_batch(10).await.unwrap();
        assert_eq!(batch.len(), 1);

        queue.mark_in_progress(&[op.id]).await.unwrap();
        assert!(queue.next_batch(10).await.unwrap().is_empty());

        queue.mark_completed(&[op.id]).await.unwrap();
        assert_eq!(queue.stats().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn batch_order_is_creation_order() {
        let queue = MemoryQueue::new();
        let first = queue
            .enqueue(NewOperation::new(OperationKind::Create))
            .await
            .unwrap();
        let second = queue
            .enqueue(NewOperation::new(OperationKind::Update))
            .await
            .unwrap();

        let batch = queue.next_batch(10).await.unwrap();
        assert_eq!(batch[0].id, first.id);
        assert_eq!(batch[1].id, second.id);

        let limited = queue.next_batch(1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, first.id);
    }

    #[tokio::test]
    async fn failure_below_cap_stays_pending() {
        let queue = MemoryQueue::new();
        let op = queue
            .enqueue(NewOperation::new(OperationKind::Update))
            .await
            .unwrap();

        queue.mark_failed(op.id, "connection reset").await.unwrap();
        let rows = queue.all_operations();
        assert_eq!(rows[0].status, OperationStatus::Pending);
        assert_eq!(rows[0].attempt_count, 1);
        assert_eq!(rows[0].last_error.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn failure_at_cap_parks_with_prefix() {
        let queue = MemoryQueue::new();
        let op = queue
            .enqueue(NewOperation::new(OperationKind::Update))
            .await
            .unwrap();

        for _ in 0..DEFAULT_MAX_RETRIES {
            queue.mark_failed(op.id, "server exploded").await.unwrap();
        }

        let rows = queue.all_operations();
        assert_eq!(rows[0].status, OperationStatus::Failed);
        assert_eq!(rows[0].attempt_count, DEFAULT_MAX_RETRIES);
        assert_eq!(
            rows[0].last_error.as_deref(),
            Some("Max retries exceeded: server exploded")
        );
    }

    #[tokio::test]
    async fn reset_stuck_operations_returns_count() {
        let queue = MemoryQueue::new();
        let a = queue
            .enqueue(NewOperation::new(OperationKind::Create))
            .await
            .unwrap();
        let b = queue
            .enqueue(NewOperation::new(OperationKind::Create))
            .await
            .unwrap();
        queue.mark_in_progress(&[a.id, b.id]).await.unwrap();

        assert_eq!(queue.reset_stuck_operations().await.unwrap(), 2);
        assert_eq!(queue.next_batch(10).await.unwrap().len(), 2);
        assert_eq!(queue.reset_stuck_operations().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn retry_failed_resets_and_notifies() {
        let queue = MemoryQueue::with_max_retries(1);
        let op = queue
            .enqueue(NewOperation::new(OperationKind::Delete))
            .await
            .unwrap();
        queue.mark_failed(op.id, "boom").await.unwrap();
        assert_eq!(queue.stats().await.unwrap().failed, 1);

        let mut rx = queue.subscribe();
        queue.retry_failed(op.id).await.unwrap();

        let rows = queue.all_operations();
        assert_eq!(rows[0].status, OperationStatus::Pending);
        assert_eq!(rows[0].attempt_count, 0);
        assert_eq!(rows[0].last_error, None);
        assert_eq!(rx.recv().await, Some(op.id));
    }

    #[tokio::test]
    async fn retry_failed_ignores_pending_rows() {
        let queue = MemoryQueue::new();
        let op = queue
            .enqueue(NewOperation::new(OperationKind::Create))
            .await
            .unwrap();

        queue.retry_failed(op.id).await.unwrap();
        assert_eq!(queue.all_operations()[0].status, OperationStatus::Pending);
    }

    #[tokio::test]
    async fn enqueue_notifies_subscribers() {
        let queue = MemoryQueue::new();
        let mut rx = queue.subscribe();

        let op = queue
            .enqueue(NewOperation::new(OperationKind::Create))
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(op.id));
    }
}
