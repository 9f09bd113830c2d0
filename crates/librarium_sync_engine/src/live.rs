//! Application of live server events to local storage.
//!
//! A connected client receives change events over its realtime channel
//! and applies them without waiting for the next pull. Events merge
//! under the same conflict rules as pulled pages, and the whole
//! application runs under the [`SyncMutex`] so it never interleaves
//! with a push flush.

use crate::conflict::ConflictDetector;
use crate::error::SyncResult;
use crate::pullers::{ArtworkFetcher, NoopArtwork};
use librarium_store::{
    ActiveSession, Book, BookRelations, LibraryStore, PlaybackProgress, RecordStore, SnapshotStore,
};
use librarium_sync_protocol::{BookPayload, ProgressPayload, ServerEvent, ServerRecord};
use std::slice;
use std::sync::Arc;
use tracing::{debug, warn};

/// Guard over one serialized local-write section.
pub type SyncGuard<'a> = tokio::sync::MutexGuard<'a, ()>;

/// Serializes the local-write critical sections.
///
/// A push flush reads queue rows and rewrites record state; live event
/// application rewrites the same records. Interleaving the two could
/// apply a server event between a flush reading an operation and
/// acknowledging it, losing the event's write. Both sides hold this
/// mutex for their full critical section. Pulls do not take it: page
/// merges are conflict-checked per record and tolerate concurrent
/// writes.
#[derive(Debug, Default)]
pub struct SyncMutex {
    inner: tokio::sync::Mutex<()>,
}

impl SyncMutex {
    /// Creates an unlocked mutex.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the mutex, waiting for the current holder.
    pub async fn lock(&self) -> SyncGuard<'_> {
        self.inner.lock().await
    }

    /// Acquires the mutex only if it is free.
    pub fn try_lock(&self) -> Option<SyncGuard<'_>> {
        self.inner.try_lock().ok()
    }
}

/// Counters for one applied batch of live events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveApplyOutcome {
    /// Events applied to the store.
    pub applied: u64,
    /// Events suppressed because a local edit won the conflict check.
    pub preserved: u64,
}

/// Applies server events as they arrive.
pub struct LiveEventApplier<S> {
    store: Arc<S>,
    detector: ConflictDetector,
    mutex: Arc<SyncMutex>,
    artwork: Arc<dyn ArtworkFetcher>,
}

impl<S: LibraryStore> LiveEventApplier<S> {
    /// Creates an applier with no artwork fetcher.
    pub fn new(store: Arc<S>, mutex: Arc<SyncMutex>) -> Self {
        Self {
            store,
            detector: ConflictDetector::new(),
            mutex,
            artwork: Arc::new(NoopArtwork),
        }
    }

    /// Sets the artwork fetcher run after live book upserts.
    pub fn with_artwork(mut self, artwork: Arc<dyn ArtworkFetcher>) -> Self {
        self.artwork = artwork;
        self
    }

    /// Applies a batch of events under the [`SyncMutex`].
    pub async fn apply(&self, events: Vec<ServerEvent>) -> SyncResult<LiveApplyOutcome> {
        let _guard = self.mutex.lock().await;
        let mut outcome = LiveApplyOutcome::default();

        for event in events {
            debug!(kind = event.kind(), "applying live event");
            match event {
                ServerEvent::BookChanged(payload) => {
                    self.apply_book(payload, &mut outcome).await?;
                }
                ServerEvent::BookRemoved { id } => {
                    // Server deletions win regardless of conflict state,
                    // same as deletions carried on a pulled page.
                    <S as RecordStore<Book>>::delete_by_ids(&self.store, slice::from_ref(&id))
                        .await?;
                    outcome.applied += 1;
                }
                ServerEvent::ProgressChanged(payload) => {
                    self.apply_progress(payload, &mut outcome).await?;
                }
                ServerEvent::ActiveSessionsChanged(sessions) => {
                    let rows: Vec<ActiveSession> = sessions.into_iter().map(Into::into).collect();
                    <S as SnapshotStore<ActiveSession>>::replace_snapshot(&self.store, rows)
                        .await?;
                    outcome.applied += 1;
                }
            }
        }

        Ok(outcome)
    }

    async fn apply_book(
        &self,
        mut payload: BookPayload,
        outcome: &mut LiveApplyOutcome,
    ) -> SyncResult<()> {
        let ids = [payload.id.clone()];
        let local = <S as RecordStore<Book>>::sync_meta_for(&self.store, &ids).await?;

        let fresh = self.detector.detect(&local, slice::from_ref(&payload));
        for (id, version) in &fresh {
            <S as RecordStore<Book>>::mark_conflict(&self.store, id, *version).await?;
        }
        if self
            .detector
            .should_preserve_local(local.get(payload.id.as_str()), payload.updated_at)
        {
            outcome.preserved += 1;
            return Ok(());
        }

        let book_id = payload.id.clone();
        let chapters: Vec<_> = std::mem::take(&mut payload.chapters)
            .into_iter()
            .map(|c| c.into_chapter(&book_id))
            .collect();
        let roles: Vec<_> = std::mem::take(&mut payload.contributors)
            .into_iter()
            .map(|c| c.into_role(&book_id))
            .collect();
        let tag_ids = std::mem::take(&mut payload.tag_ids);
        let cover_url = payload.cover_url.clone();

        <S as RecordStore<Book>>::upsert_all(&self.store, vec![payload.into_record()]).await?;
        self.store.replace_chapters(&book_id, chapters).await?;
        self.store.replace_contributor_roles(&book_id, roles).await?;
        self.store.replace_book_tags(&book_id, tag_ids).await?;

        if let Some(cover_url) = cover_url {
            self.spawn_artwork(book_id, cover_url);
        }
        outcome.applied += 1;
        Ok(())
    }

    async fn apply_progress(
        &self,
        payload: ProgressPayload,
        outcome: &mut LiveApplyOutcome,
    ) -> SyncResult<()> {
        let ids = [payload.id().to_owned()];
        let local = <S as RecordStore<PlaybackProgress>>::sync_meta_for(&self.store, &ids).await?;

        let fresh = self.detector.detect(&local, slice::from_ref(&payload));
        for (id, version) in &fresh {
            <S as RecordStore<PlaybackProgress>>::mark_conflict(&self.store, id, *version).await?;
        }
        if self
            .detector
            .should_preserve_local(local.get(payload.id()), payload.updated_at())
        {
            outcome.preserved += 1;
            return Ok(());
        }

        <S as RecordStore<PlaybackProgress>>::upsert_all(&self.store, vec![payload.into_record()])
            .await?;
        outcome.applied += 1;
        Ok(())
    }

    fn spawn_artwork(&self, book_id: String, cover_url: String) {
        let artwork = Arc::clone(&self.artwork);
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Some(color) = artwork.accent_color(&book_id, &cover_url).await {
                if let Err(error) = store.set_accent_color(&book_id, Some(color)).await {
                    warn!(%book_id, %error, "failed to store accent color");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pullers::MockArtwork;
    use chrono::{DateTime, TimeZone, Utc};
    use librarium_store::{MemoryStore, SyncMeta, SyncState};
    use librarium_sync_protocol::{ActiveSessionPayload, ChapterPayload};
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn applier(store: &Arc<MemoryStore>) -> LiveEventApplier<MemoryStore> {
        LiveEventApplier::new(Arc::clone(store), Arc::new(SyncMutex::new()))
    }

    #[tokio::test]
    async fn book_changed_upserts_with_relations() {
        let store = Arc::new(MemoryStore::new());
        let mut payload = BookPayload::new("b1", "Use of Weapons", at(100));
        payload.chapters = vec![ChapterPayload {
            id: "c1".into(),
            title: "One".into(),
            start_ms: 0,
            end_ms: 1_000,
        }];
        payload.tag_ids = vec!["t1".into()];

        let outcome = applier(&store)
            .apply(vec![ServerEvent::BookChanged(payload)])
            .await
            .unwrap();

        assert_eq!(outcome, LiveApplyOutcome { applied: 1, preserved: 0 });
        let stored = RecordStore::<Book>::get(&*store, "b1").await.unwrap().unwrap();
        assert_eq!(stored.title, "Use of Weapons");
        assert_eq!(store.chapters_for("b1").await.unwrap().len(), 1);
        assert_eq!(store.book_tags_for("b1").await.unwrap(), vec!["t1"]);
    }

    #[tokio::test]
    async fn newer_local_edit_survives_live_event() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_all(vec![Book::new("b1", "Mine", SyncMeta::locally_edited(at(200)))])
            .await
            .unwrap();

        let outcome = applier(&store)
            .apply(vec![ServerEvent::BookChanged(BookPayload::new(
                "b1", "Theirs", at(150),
            ))])
            .await
            .unwrap();

        assert_eq!(outcome, LiveApplyOutcome { applied: 0, preserved: 1 });
        let stored = RecordStore::<Book>::get(&*store, "b1").await.unwrap().unwrap();
        assert_eq!(stored.title, "Mine");
        assert_eq!(stored.meta.sync_state, SyncState::Conflict);
        assert_eq!(stored.meta.conflict_server_version, Some(at(150)));
    }

    #[tokio::test]
    async fn older_local_edit_loses_to_live_event() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_all(vec![Book::new("b1", "Mine", SyncMeta::locally_edited(at(100)))])
            .await
            .unwrap();

        let outcome = applier(&store)
            .apply(vec![ServerEvent::BookChanged(BookPayload::new(
                "b1", "Theirs", at(150),
            ))])
            .await
            .unwrap();

        assert_eq!(outcome.applied, 1);
        let stored = RecordStore::<Book>::get(&*store, "b1").await.unwrap().unwrap();
        assert_eq!(stored.title, "Theirs");
        assert_eq!(stored.meta.sync_state, SyncState::Synced);
    }

    #[tokio::test]
    async fn book_removed_deletes_even_conflicted_rows() {
        let store = Arc::new(MemoryStore::new());
        let mut meta = SyncMeta::locally_edited(at(200));
        meta.mark_conflict(at(150));
        store
            .upsert_all(vec![Book::new("b1", "Mine", meta)])
            .await
            .unwrap();

        applier(&store)
            .apply(vec![ServerEvent::BookRemoved { id: "b1".into() }])
            .await
            .unwrap();

        assert!(RecordStore::<Book>::get(&*store, "b1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn progress_event_respects_local_edit() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_all(vec![PlaybackProgress::new(
                "b1",
                5_000,
                SyncMeta::locally_edited(at(300)),
            )])
            .await
            .unwrap();

        let outcome = applier(&store)
            .apply(vec![ServerEvent::ProgressChanged(ProgressPayload::new(
                "b1", 9_000, at(250),
            ))])
            .await
            .unwrap();

        assert_eq!(outcome.preserved, 1);
        let stored = RecordStore::<PlaybackProgress>::get(&*store, "b1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.position_ms, 5_000);
    }

    fn session(id: &str, book_id: &str, device: &str) -> ActiveSessionPayload {
        ActiveSessionPayload {
            id: id.into(),
            book_id: book_id.into(),
            device_name: device.into(),
            position_ms: 0,
            updated_at: at(1),
        }
    }

    #[tokio::test]
    async fn active_sessions_replaced_wholesale() {
        let store = Arc::new(MemoryStore::new());
        let first = vec![
            session("s1", "b1", "device-a"),
            session("s2", "b2", "device-b"),
        ];
        let second = vec![session("s3", "b1", "device-a")];

        let applier = applier(&store);
        applier
            .apply(vec![ServerEvent::ActiveSessionsChanged(first)])
            .await
            .unwrap();
        applier
            .apply(vec![ServerEvent::ActiveSessionsChanged(second)])
            .await
            .unwrap();

        let sessions = SnapshotStore::<ActiveSession>::snapshot(&*store).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "s3");
    }

    #[tokio::test]
    async fn held_mutex_defers_application() {
        let store = Arc::new(MemoryStore::new());
        let mutex = Arc::new(SyncMutex::new());
        let applier = Arc::new(
            LiveEventApplier::new(Arc::clone(&store), Arc::clone(&mutex)),
        );

        let guard = mutex.lock().await;
        let handle = tokio::spawn({
            let applier = Arc::clone(&applier);
            async move {
                applier
                    .apply(vec![ServerEvent::BookChanged(BookPayload::new(
                        "b1", "Deferred", at(10),
                    ))])
                    .await
            }
        });

        // While the mutex is held the event must not land.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(RecordStore::<Book>::count(&*store).await.unwrap(), 0);

        drop(guard);
        handle.await.unwrap().unwrap();
        assert_eq!(RecordStore::<Book>::count(&*store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn live_book_event_feeds_artwork() {
        let store = Arc::new(MemoryStore::new());
        let artwork = Arc::new(MockArtwork::new());
        artwork.set_color("b1", "#aa3311");
        let applier = LiveEventApplier::new(Arc::clone(&store), Arc::new(SyncMutex::new()))
            .with_artwork(artwork.clone() as Arc<dyn ArtworkFetcher>);

        let mut payload = BookPayload::new("b1", "Matter", at(10));
        payload.cover_url = Some("https://covers/b1.jpg".into());
        applier
            .apply(vec![ServerEvent::BookChanged(payload)])
            .await
            .unwrap();

        // The extraction runs detached; poll for its completion.
        let mut color = None;
        for _ in 0..100 {
            let stored = RecordStore::<Book>::get(&*store, "b1").await.unwrap().unwrap();
            if stored.accent_color.is_some() {
                color = stored.accent_color;
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(color.as_deref(), Some("#aa3311"));
    }
}
