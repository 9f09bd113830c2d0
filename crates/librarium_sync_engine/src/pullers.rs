//! Per-entity pull and merge against local storage.
//!
//! Three merge shapes cover every entity type:
//!
//! - paginated delta merge (books, series, contributors, tags, genres,
//!   playback progress): page through the endpoint, apply server
//!   deletions first, conflict-check, upsert the survivors
//! - snapshot merge (shelves, lenses): one unpaginated response that is
//!   authoritative for the full set; clean local rows absent from it
//!   are deleted, edited rows are conflict-checked like any other
//! - full replace (reading sessions, active sessions): the server is
//!   the sole source of truth, local rows are dropped wholesale
//!
//! Listening events are immutable and merge by plain upsert.

use crate::api::SyncApi;
use crate::conflict::ConflictDetector;
use crate::error::{SyncError, SyncResult};
use crate::progress::PhaseProgress;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use librarium_store::{
    ActiveSession, Book, BookRelations, EventStore, LibraryStore, ListeningEvent, ReadingSession,
    RecordStore, SnapshotStore, SyncState,
};
use librarium_sync_protocol::{EntityPage, PageQuery, ServerRecord};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Counters accumulated by one entity phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullOutcome {
    /// Items received from the server, including conflicted ones.
    pub items: u64,
    /// Pages fetched.
    pub pages: u32,
    /// Fresh conflicts detected.
    pub conflicts: u64,
}

/// Derives denormalized artwork data after a book lands.
///
/// Runs on a detached task; the pull neither waits for it nor fails
/// when it fails.
#[async_trait]
pub trait ArtworkFetcher: Send + Sync + 'static {
    /// Extracts an accent color from the cover at `cover_url`.
    ///
    /// Returns `None` when the cover cannot be fetched or decoded.
    async fn accent_color(&self, book_id: &str, cover_url: &str) -> Option<String>;
}

/// Fetcher that never produces a color.
pub struct NoopArtwork;

#[async_trait]
impl ArtworkFetcher for NoopArtwork {
    async fn accent_color(&self, _book_id: &str, _cover_url: &str) -> Option<String> {
        None
    }
}

/// Scriptable fetcher for tests.
#[derive(Default)]
pub struct MockArtwork {
    colors: Mutex<HashMap<String, String>>,
    requests: Mutex<Vec<String>>,
}

impl MockArtwork {
    /// Creates a fetcher with no colors scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the color extracted for `book_id`.
    pub fn set_color(&self, book_id: impl Into<String>, color: impl Into<String>) {
        self.colors.lock().insert(book_id.into(), color.into());
    }

    /// Book IDs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ArtworkFetcher for MockArtwork {
    async fn accent_color(&self, book_id: &str, _cover_url: &str) -> Option<String> {
        self.requests.lock().push(book_id.to_owned());
        self.colors.lock().get(book_id).cloned()
    }
}

/// The per-entity pull implementations, shared by the orchestrator.
pub struct EntityPullers<S> {
    api: Arc<dyn SyncApi>,
    store: Arc<S>,
    detector: ConflictDetector,
    artwork: Arc<dyn ArtworkFetcher>,
    page_limit: u32,
}

impl<S: LibraryStore> EntityPullers<S> {
    /// Creates the pullers around their collaborators.
    pub fn new(
        api: Arc<dyn SyncApi>,
        store: Arc<S>,
        artwork: Arc<dyn ArtworkFetcher>,
        page_limit: u32,
    ) -> Self {
        Self {
            api,
            store,
            detector: ConflictDetector::new(),
            artwork,
            page_limit,
        }
    }

    /// Pulls series pages.
    pub async fn pull_series(
        &self,
        updated_after: Option<DateTime<Utc>>,
        progress: &PhaseProgress<'_>,
    ) -> SyncResult<PullOutcome> {
        let api = Arc::clone(&self.api);
        self.pull_paged(
            move |query| {
                let api = Arc::clone(&api);
                async move { api.series_page(query).await }
            },
            updated_after,
            progress,
        )
        .await
    }

    /// Pulls contributor pages.
    pub async fn pull_contributors(
        &self,
        updated_after: Option<DateTime<Utc>>,
        progress: &PhaseProgress<'_>,
    ) -> SyncResult<PullOutcome> {
        let api = Arc::clone(&self.api);
        self.pull_paged(
            move |query| {
                let api = Arc::clone(&api);
                async move { api.contributor_page(query).await }
            },
            updated_after,
            progress,
        )
        .await
    }

    /// Pulls tag pages.
    pub async fn pull_tags(
        &self,
        updated_after: Option<DateTime<Utc>>,
        progress: &PhaseProgress<'_>,
    ) -> SyncResult<PullOutcome> {
        let api = Arc::clone(&self.api);
        self.pull_paged(
            move |query| {
                let api = Arc::clone(&api);
                async move { api.tag_page(query).await }
            },
            updated_after,
            progress,
        )
        .await
    }

    /// Pulls genre pages.
    pub async fn pull_genres(
        &self,
        updated_after: Option<DateTime<Utc>>,
        progress: &PhaseProgress<'_>,
    ) -> SyncResult<PullOutcome> {
        let api = Arc::clone(&self.api);
        self.pull_paged(
            move |query| {
                let api = Arc::clone(&api);
                async move { api.genre_page(query).await }
            },
            updated_after,
            progress,
        )
        .await
    }

    /// Pulls playback progress pages.
    pub async fn pull_progress(
        &self,
        updated_after: Option<DateTime<Utc>>,
        progress: &PhaseProgress<'_>,
    ) -> SyncResult<PullOutcome> {
        let api = Arc::clone(&self.api);
        self.pull_paged(
            move |query| {
                let api = Arc::clone(&api);
                async move { api.progress_page(query).await }
            },
            updated_after,
            progress,
        )
        .await
    }

    /// Pulls book pages, including chapters, contributor roles, and tag
    /// links, which are replaced per book rather than merged.
    pub async fn pull_books(
        &self,
        updated_after: Option<DateTime<Utc>>,
        progress: &PhaseProgress<'_>,
    ) -> SyncResult<PullOutcome> {
        let mut outcome = PullOutcome::default();
        let mut query = PageQuery::delta(self.page_limit, updated_after);

        loop {
            progress.page(outcome.pages + 1);
            let page = self.api.book_page(query.clone()).await?;
            let EntityPage {
                items,
                deleted_ids,
                next_cursor,
                has_more,
            } = page;

            if !deleted_ids.is_empty() {
                let removed =
                    <S as RecordStore<Book>>::delete_by_ids(&self.store, &deleted_ids).await?;
                debug!(removed, "removed server-deleted books");
            }

            let received = items.len() as u64;
            let ids: Vec<String> = items.iter().map(|p| p.id.clone()).collect();
            let local = <S as RecordStore<Book>>::sync_meta_for(&self.store, &ids).await?;

            let fresh = self.detector.detect(&local, &items);
            for (id, version) in &fresh {
                <S as RecordStore<Book>>::mark_conflict(&self.store, id, *version).await?;
            }
            outcome.conflicts += fresh.len() as u64;

            let mut records = Vec::new();
            let mut relations = Vec::new();
            let mut covers = Vec::new();
            for mut payload in items {
                if self
                    .detector
                    .should_preserve_local(local.get(payload.id.as_str()), payload.updated_at)
                {
                    continue;
                }

                let chapters = std::mem::take(&mut payload.chapters);
                let contributors = std::mem::take(&mut payload.contributors);
                let tag_ids = std::mem::take(&mut payload.tag_ids);
                relations.push((payload.id.clone(), chapters, contributors, tag_ids));

                if let Some(cover_url) = payload.cover_url.clone() {
                    covers.push((payload.id.clone(), cover_url));
                }
                records.push(payload.into_record());
            }

            if !records.is_empty() {
                <S as RecordStore<Book>>::upsert_all(&self.store, records).await?;
            }
            for (book_id, chapters, contributors, tag_ids) in relations {
                let chapters = chapters
                    .into_iter()
                    .map(|c| c.into_chapter(&book_id))
                    .collect();
                self.store.replace_chapters(&book_id, chapters).await?;

                let roles = contributors
                    .into_iter()
                    .map(|c| c.into_role(&book_id))
                    .collect();
                self.store.replace_contributor_roles(&book_id, roles).await?;

                self.store.replace_book_tags(&book_id, tag_ids).await?;
            }
            if !covers.is_empty() {
                self.spawn_artwork(covers);
            }

            outcome.items += received;
            outcome.pages += 1;
            progress.add(received);

            if !has_more {
                break;
            }
            match next_cursor {
                Some(cursor) => query = query.next(cursor),
                None => {
                    return Err(SyncError::Protocol(
                        "page reported hasMore without a cursor".into(),
                    ))
                }
            }
        }

        Ok(outcome)
    }

    /// Pulls the shelf snapshot.
    pub async fn pull_shelves(&self, progress: &PhaseProgress<'_>) -> SyncResult<PullOutcome> {
        let rows = self.api.shelves().await?;
        self.merge_snapshot(rows, progress).await
    }

    /// Pulls the lens snapshot.
    pub async fn pull_lenses(&self, progress: &PhaseProgress<'_>) -> SyncResult<PullOutcome> {
        let rows = self.api.lenses().await?;
        self.merge_snapshot(rows, progress).await
    }

    /// Replaces the local reading session history with the server's.
    pub async fn pull_reading_sessions(
        &self,
        progress: &PhaseProgress<'_>,
    ) -> SyncResult<PullOutcome> {
        let rows = self.api.reading_sessions().await?;
        let received = rows.len() as u64;
        let sessions: Vec<ReadingSession> = rows.into_iter().map(Into::into).collect();
        <S as SnapshotStore<ReadingSession>>::replace_snapshot(&self.store, sessions).await?;
        progress.add(received);
        Ok(PullOutcome {
            items: received,
            pages: 1,
            conflicts: 0,
        })
    }

    /// Replaces the local active session list with the server's.
    pub async fn pull_active_sessions(
        &self,
        progress: &PhaseProgress<'_>,
    ) -> SyncResult<PullOutcome> {
        let rows = self.api.active_sessions().await?;
        let received = rows.len() as u64;
        let sessions: Vec<ActiveSession> = rows.into_iter().map(Into::into).collect();
        <S as SnapshotStore<ActiveSession>>::replace_snapshot(&self.store, sessions).await?;
        progress.add(received);
        Ok(PullOutcome {
            items: received,
            pages: 1,
            conflicts: 0,
        })
    }

    /// Merges listening events, optionally only those after `since`.
    pub async fn pull_listening_events(
        &self,
        since: Option<DateTime<Utc>>,
        progress: &PhaseProgress<'_>,
    ) -> SyncResult<PullOutcome> {
        let rows = self.api.listening_events(since).await?;
        let received = rows.len() as u64;
        let events: Vec<ListeningEvent> = rows.into_iter().map(Into::into).collect();
        let written = self.store.upsert_events(events).await?;
        debug!(received, written, "merged listening events");
        progress.add(received);
        Ok(PullOutcome {
            items: received,
            pages: 1,
            conflicts: 0,
        })
    }

    /// Generic paginated pull: fetch pages while `hasMore`, merging each.
    async fn pull_paged<P, F, Fut>(
        &self,
        fetch: F,
        updated_after: Option<DateTime<Utc>>,
        progress: &PhaseProgress<'_>,
    ) -> SyncResult<PullOutcome>
    where
        P: ServerRecord,
        S: RecordStore<P::Record>,
        F: Fn(PageQuery) -> Fut,
        Fut: Future<Output = SyncResult<EntityPage<P>>>,
    {
        let mut outcome = PullOutcome::default();
        let mut query = PageQuery::delta(self.page_limit, updated_after);

        loop {
            progress.page(outcome.pages + 1);
            let page = fetch(query.clone()).await?;
            let EntityPage {
                items,
                deleted_ids,
                next_cursor,
                has_more,
            } = page;

            // Server deletions apply before this page's upserts and
            // regardless of conflict state.
            if !deleted_ids.is_empty() {
                let removed =
                    <S as RecordStore<P::Record>>::delete_by_ids(&self.store, &deleted_ids).await?;
                debug!(
                    entity = %progress.entity(),
                    removed,
                    "removed server-deleted rows"
                );
            }

            let received = items.len() as u64;
            let (merged, conflicts) = self.merge_items(items).await?;
            debug!(
                entity = %progress.entity(),
                received, merged, conflicts,
                "merged page"
            );

            outcome.items += received;
            outcome.conflicts += conflicts;
            outcome.pages += 1;
            progress.add(received);

            if !has_more {
                break;
            }
            match next_cursor {
                Some(cursor) => query = query.next(cursor),
                None => {
                    return Err(SyncError::Protocol(
                        "page reported hasMore without a cursor".into(),
                    ))
                }
            }
        }

        Ok(outcome)
    }

    /// Conflict-checks one batch of payloads and upserts the survivors.
    ///
    /// Returns `(merged, fresh_conflicts)`.
    async fn merge_items<P>(&self, items: Vec<P>) -> SyncResult<(u64, u64)>
    where
        P: ServerRecord,
        S: RecordStore<P::Record>,
    {
        if items.is_empty() {
            return Ok((0, 0));
        }

        let ids: Vec<String> = items.iter().map(|p| p.id().to_owned()).collect();
        let local = <S as RecordStore<P::Record>>::sync_meta_for(&self.store, &ids).await?;

        let fresh = self.detector.detect(&local, &items);
        for (id, version) in &fresh {
            <S as RecordStore<P::Record>>::mark_conflict(&self.store, id, *version).await?;
        }

        let survivors: Vec<P::Record> = items
            .into_iter()
            .filter(|p| {
                !self
                    .detector
                    .should_preserve_local(local.get(p.id()), p.updated_at())
            })
            .map(ServerRecord::into_record)
            .collect();

        let merged = survivors.len() as u64;
        if !survivors.is_empty() {
            <S as RecordStore<P::Record>>::upsert_all(&self.store, survivors).await?;
        }
        Ok((merged, fresh.len() as u64))
    }

    /// Merges an authoritative snapshot: conflict-checks and upserts the
    /// incoming rows, then deletes clean local rows absent from it.
    ///
    /// Rows with unsynced edits or standing conflicts are never deleted
    /// here, even when the server no longer lists them.
    async fn merge_snapshot<P>(
        &self,
        rows: Vec<P>,
        progress: &PhaseProgress<'_>,
    ) -> SyncResult<PullOutcome>
    where
        P: ServerRecord,
        S: RecordStore<P::Record>,
    {
        let all_local = <S as RecordStore<P::Record>>::all_sync_meta(&self.store).await?;
        let incoming_ids: HashSet<&str> = rows.iter().map(ServerRecord::id).collect();
        let stale: Vec<String> = all_local
            .iter()
            .filter(|(id, meta)| {
                !incoming_ids.contains(id.as_str()) && meta.sync_state == SyncState::Synced
            })
            .map(|(id, _)| id.clone())
            .collect();
        if !stale.is_empty() {
            let removed = <S as RecordStore<P::Record>>::delete_by_ids(&self.store, &stale).await?;
            debug!(entity = %progress.entity(), removed, "removed rows absent from snapshot");
        }

        let received = rows.len() as u64;
        let (_, conflicts) = self.merge_items(rows).await?;
        progress.add(received);
        Ok(PullOutcome {
            items: received,
            pages: 1,
            conflicts,
        })
    }

    fn spawn_artwork(&self, covers: Vec<(String, String)>) {
        let artwork = Arc::clone(&self.artwork);
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            for (book_id, cover_url) in covers {
                if let Some(color) = artwork.accent_color(&book_id, &cover_url).await {
                    if let Err(error) = store.set_accent_color(&book_id, Some(color)).await {
                        warn!(%book_id, %error, "failed to store accent color");
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockApi;
    use crate::progress::{NullObserver, ProgressObserver, ProgressTracker, RecordingObserver};
    use chrono::TimeZone;
    use librarium_store::{EntityType, MemoryStore, SyncMeta, Tag};
    use librarium_sync_protocol::{
        BookContributorPayload, BookPayload, ChapterPayload, ReadingSessionPayload, SeriesPayload,
        ShelfPayload, TagPayload,
    };
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    struct Fixture {
        api: Arc<MockApi>,
        store: Arc<MemoryStore>,
        artwork: Arc<MockArtwork>,
        pullers: EntityPullers<MemoryStore>,
        tracker: ProgressTracker,
    }

    fn fixture(page_limit: u32) -> Fixture {
        let api = Arc::new(MockApi::new());
        let store = Arc::new(MemoryStore::new());
        let artwork = Arc::new(MockArtwork::new());
        let pullers = EntityPullers::new(
            api.clone() as Arc<dyn SyncApi>,
            store.clone(),
            artwork.clone() as Arc<dyn ArtworkFetcher>,
            page_limit,
        );
        let tracker = ProgressTracker::new(Arc::new(NullObserver) as Arc<dyn ProgressObserver>);
        Fixture {
            api,
            store,
            artwork,
            pullers,
            tracker,
        }
    }

    fn books(n: i64) -> Vec<BookPayload> {
        (0..n)
            .map(|i| BookPayload::new(format!("b{i}"), format!("Book {i}"), at(i)))
            .collect()
    }

    #[tokio::test]
    async fn paginated_pull_fetches_until_has_more_clears() {
        let fx = fixture(60);
        fx.api.books.script_pages(books(100), 60);

        let phase = fx.tracker.phase(EntityType::Book, Some(100));
        let outcome = fx.pullers.pull_books(None, &phase).await.unwrap();

        assert_eq!(outcome.items, 100);
        assert_eq!(outcome.pages, 2);
        assert_eq!(outcome.conflicts, 0);
        assert_eq!(fx.api.books.request_count(), 2);
        assert_eq!(
            RecordStore::<Book>::count(&*fx.store).await.unwrap(),
            100
        );
    }

    #[tokio::test]
    async fn full_pull_issues_unfiltered_queries() {
        let fx = fixture(60);
        fx.api.series.script_pages(
            vec![SeriesPayload::new("s1", "Culture", at(1))],
            60,
        );

        let phase = fx.tracker.phase(EntityType::Series, None);
        fx.pullers.pull_series(None, &phase).await.unwrap();

        let queries = fx.api.series.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].updated_after, None);
        assert_eq!(queries[0].limit, 60);
    }

    #[tokio::test]
    async fn delta_pull_filters_every_page() {
        let fx = fixture(1);
        fx.api.series.script_pages(
            vec![
                SeriesPayload::new("s1", "Culture", at(10)),
                SeriesPayload::new("s2", "Discworld", at(11)),
            ],
            1,
        );

        let checkpoint = at(5);
        let phase = fx.tracker.phase(EntityType::Series, None);
        fx.pullers
            .pull_series(Some(checkpoint), &phase)
            .await
            .unwrap();

        let queries = fx.api.series.queries();
        assert_eq!(queries.len(), 2);
        assert!(queries.iter().all(|q| q.updated_after == Some(checkpoint)));
        assert_eq!(queries[1].cursor.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn deletions_apply_before_upserts() {
        let fx = fixture(60);
        fx.store
            .upsert_all(vec![
                Tag::new("t1", "old", SyncMeta::synced(at(1))),
                Tag::new("t2", "stays", SyncMeta::synced(at(1))),
            ])
            .await
            .unwrap();

        // The same page deletes t1 and re-creates it with new content.
        let page = EntityPage::of(vec![TagPayload::new("t1", "rebuilt", at(5))])
            .with_deleted(vec!["t1".into()]);
        fx.api.tags.push_page(page);

        let phase = fx.tracker.phase(EntityType::Tag, None);
        fx.pullers.pull_tags(None, &phase).await.unwrap();

        let tag = RecordStore::<Tag>::get(&*fx.store, "t1").await.unwrap().unwrap();
        assert_eq!(tag.name, "rebuilt");
        assert_eq!(RecordStore::<Tag>::count(&*fx.store).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn deletions_remove_conflicted_rows() {
        let fx = fixture(60);
        let mut edited = Tag::new("t1", "mine", SyncMeta::locally_edited(at(100)));
        edited.meta.mark_conflict(at(50));
        fx.store.upsert_all(vec![edited]).await.unwrap();

        fx.api
            .tags
            .push_page(EntityPage::of(Vec::<TagPayload>::new()).with_deleted(vec!["t1".into()]));

        let phase = fx.tracker.phase(EntityType::Tag, None);
        fx.pullers.pull_tags(None, &phase).await.unwrap();

        assert_eq!(RecordStore::<Tag>::count(&*fx.store).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn conflicting_local_edit_survives_pull() {
        let fx = fixture(60);
        let mut mine = Book::new("b1", "My rename", SyncMeta::locally_edited(at(100)));
        mine.accent_color = Some("#123456".into());
        fx.store.upsert_all(vec![mine]).await.unwrap();

        fx.api
            .books
            .script_pages(vec![BookPayload::new("b1", "Server title", at(50))], 60);

        let phase = fx.tracker.phase(EntityType::Book, None);
        let outcome = fx.pullers.pull_books(None, &phase).await.unwrap();
        assert_eq!(outcome.conflicts, 1);

        let stored = RecordStore::<Book>::get(&*fx.store, "b1").await.unwrap().unwrap();
        assert_eq!(stored.title, "My rename");
        assert_eq!(stored.meta.sync_state, SyncState::Conflict);
        assert_eq!(stored.meta.conflict_server_version, Some(at(50)));
    }

    #[tokio::test]
    async fn pull_twice_is_idempotent() {
        let fx = fixture(60);
        fx.api.books.script_pages(books(5), 60);
        fx.api.books.script_pages(books(5), 60);

        let phase = fx.tracker.phase(EntityType::Book, None);
        fx.pullers.pull_books(None, &phase).await.unwrap();
        let second = fx.pullers.pull_books(None, &phase).await.unwrap();

        assert_eq!(second.conflicts, 0);
        assert_eq!(RecordStore::<Book>::count(&*fx.store).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn book_relations_are_replaced() {
        let fx = fixture(60);
        let mut payload = BookPayload::new("b1", "Dune", at(1));
        payload.chapters = vec![ChapterPayload {
            id: "c1".into(),
            title: "One".into(),
            start_ms: 0,
            end_ms: 100,
        }];
        payload.contributors = vec![BookContributorPayload {
            contributor_id: "a1".into(),
            role: "author".into(),
        }];
        payload.tag_ids = vec!["t1".into()];
        fx.api.books.script_pages(vec![payload], 60);

        let phase = fx.tracker.phase(EntityType::Book, None);
        fx.pullers.pull_books(None, &phase).await.unwrap();

        assert_eq!(fx.store.chapters_for("b1").await.unwrap().len(), 1);
        let roles = fx.store.contributor_roles_for("b1").await.unwrap();
        assert_eq!(roles[0].contributor_id, "a1");
        assert_eq!(fx.store.book_tags_for("b1").await.unwrap(), vec!["t1".to_string()]);

        // A later pull without the chapter drops it.
        fx.api
            .books
            .script_pages(vec![BookPayload::new("b1", "Dune", at(2))], 60);
        fx.pullers.pull_books(None, &phase).await.unwrap();
        assert!(fx.store.chapters_for("b1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn accent_color_lands_off_the_pull_path() {
        let fx = fixture(60);
        fx.artwork.set_color("b1", "#aa00ff");
        let mut payload = BookPayload::new("b1", "Dune", at(1));
        payload.cover_url = Some("https://covers.example/b1.jpg".into());
        fx.api.books.script_pages(vec![payload], 60);

        let phase = fx.tracker.phase(EntityType::Book, None);
        fx.pullers.pull_books(None, &phase).await.unwrap();

        // The fetch runs detached; poll until it lands.
        let mut color = None;
        for _ in 0..100 {
            color = RecordStore::<Book>::get(&*fx.store, "b1")
                .await
                .unwrap()
                .and_then(|b| b.accent_color);
            if color.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(color.as_deref(), Some("#aa00ff"));
        assert_eq!(fx.artwork.requests(), vec!["b1".to_string()]);
    }

    #[tokio::test]
    async fn snapshot_deletes_clean_rows_only() {
        let fx = fixture(60);
        fx.store
            .upsert_all(vec![
                librarium_store::Shelf::new("sh1", "Synced gone", SyncMeta::synced(at(1))),
                librarium_store::Shelf::new("sh2", "Edited stays", SyncMeta::locally_edited(at(9))),
            ])
            .await
            .unwrap();

        fx.api
            .shelves
            .set(vec![ShelfPayload::new("sh3", "New", at(5))]);

        let phase = fx.tracker.phase(EntityType::Shelf, None);
        fx.pullers.pull_shelves(&phase).await.unwrap();

        use librarium_store::Shelf;
        assert!(RecordStore::<Shelf>::get(&*fx.store, "sh1").await.unwrap().is_none());
        assert!(RecordStore::<Shelf>::get(&*fx.store, "sh2").await.unwrap().is_some());
        assert!(RecordStore::<Shelf>::get(&*fx.store, "sh3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reading_sessions_fully_replaced() {
        let fx = fixture(60);
        let old = ReadingSessionPayload {
            id: "rs-old".into(),
            book_id: "b1".into(),
            started_at: at(1),
            finished_at: Some(at(2)),
            pages_read: None,
        };
        fx.api.reading_sessions.set(vec![old]);
        let phase = fx.tracker.phase(EntityType::ReadingSession, None);
        fx.pullers.pull_reading_sessions(&phase).await.unwrap();

        let new = ReadingSessionPayload {
            id: "rs-new".into(),
            book_id: "b2".into(),
            started_at: at(3),
            finished_at: None,
            pages_read: Some(20),
        };
        fx.api.reading_sessions.set(vec![new]);
        fx.pullers.pull_reading_sessions(&phase).await.unwrap();

        let sessions = SnapshotStore::<ReadingSession>::snapshot(&*fx.store).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "rs-new");
    }

    #[tokio::test]
    async fn page_progress_messages() {
        let api = Arc::new(MockApi::new());
        let store = Arc::new(MemoryStore::new());
        let pullers = EntityPullers::new(
            api.clone() as Arc<dyn SyncApi>,
            store,
            Arc::new(NoopArtwork) as Arc<dyn ArtworkFetcher>,
            60,
        );
        let observer = Arc::new(RecordingObserver::new());
        let tracker = ProgressTracker::new(observer.clone() as Arc<dyn ProgressObserver>);

        api.books.script_pages(books(100), 60);
        let phase = tracker.phase(EntityType::Book, Some(100));
        pullers.pull_books(None, &phase).await.unwrap();

        let messages = observer.messages();
        assert!(messages.contains(&"Syncing books (page 1)...".to_string()));
        assert!(messages.contains(&"Syncing books (page 2)...".to_string()));
        assert!(messages.contains(&"Syncing books: 100 of 100".to_string()));
    }

    #[tokio::test]
    async fn missing_cursor_with_has_more_is_protocol_error() {
        let fx = fixture(60);
        let mut page = EntityPage::of(vec![TagPayload::new("t1", "tag", at(1))]);
        page.has_more = true;
        fx.api.tags.push_page(page);

        let phase = fx.tracker.phase(EntityType::Tag, None);
        let err = fx.pullers.pull_tags(None, &phase).await.unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }
}
