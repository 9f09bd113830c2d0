//! The server API surface the engine pulls from.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use librarium_sync_protocol::{
    ActiveSessionPayload, BookPayload, ContributorPayload, EntityPage, GenrePayload, LensPayload,
    ListeningEventPayload, PageQuery, ProgressPayload, ReadingSessionPayload, SeriesPayload,
    ShelfPayload, SyncManifest, TagPayload,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Read side of the sync server.
///
/// Catalog entities page through `(limit, cursor, updatedAfter)` queries;
/// shelves, lenses, reading sessions, and active sessions return a full
/// snapshot in one call; listening events filter by a start instant.
/// Implementations handle auth and the actual transport.
#[async_trait]
pub trait SyncApi: Send + Sync {
    /// Fetches the per-pull manifest of server-side record counts.
    async fn manifest(&self) -> SyncResult<SyncManifest>;

    /// Fetches one page of books.
    async fn book_page(&self, query: PageQuery) -> SyncResult<EntityPage<BookPayload>>;

    /// Fetches one page of series.
    async fn series_page(&self, query: PageQuery) -> SyncResult<EntityPage<SeriesPayload>>;

    /// Fetches one page of contributors.
    async fn contributor_page(&self, query: PageQuery)
        -> SyncResult<EntityPage<ContributorPayload>>;

    /// Fetches one page of tags.
    async fn tag_page(&self, query: PageQuery) -> SyncResult<EntityPage<TagPayload>>;

    /// Fetches one page of genres.
    async fn genre_page(&self, query: PageQuery) -> SyncResult<EntityPage<GenrePayload>>;

    /// Fetches one page of playback progress records.
    async fn progress_page(&self, query: PageQuery) -> SyncResult<EntityPage<ProgressPayload>>;

    /// Fetches the complete shelf list.
    async fn shelves(&self) -> SyncResult<Vec<ShelfPayload>>;

    /// Fetches the complete lens list.
    async fn lenses(&self) -> SyncResult<Vec<LensPayload>>;

    /// Fetches the complete reading session history.
    async fn reading_sessions(&self) -> SyncResult<Vec<ReadingSessionPayload>>;

    /// Fetches the live playback sessions.
    async fn active_sessions(&self) -> SyncResult<Vec<ActiveSessionPayload>>;

    /// Fetches listening events, optionally only those started after `since`.
    async fn listening_events(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<ListeningEventPayload>>;
}

/// Scripted responses for one paginated endpoint of [`MockApi`].
///
/// Responses are consumed in push order; an exhausted queue answers
/// with an empty final page so tests only script what they assert on.
pub struct ScriptedPages<P> {
    responses: Mutex<VecDeque<SyncResult<EntityPage<P>>>>,
    queries: Mutex<Vec<PageQuery>>,
}

impl<P: Clone> ScriptedPages<P> {
    fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Splits `items` into pages of `limit` and queues them in order.
    pub fn script_pages(&self, items: Vec<P>, limit: usize) {
        let mut responses = self.responses.lock();
        for page in EntityPage::paginate(items, limit) {
            responses.push_back(Ok(page));
        }
    }

    /// Queues one page verbatim.
    pub fn push_page(&self, page: EntityPage<P>) {
        self.responses.lock().push_back(Ok(page));
    }

    /// Queues one failure at the current position.
    pub fn fail_next(&self, error: SyncError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Every query this endpoint has answered, in order.
    pub fn queries(&self) -> Vec<PageQuery> {
        self.queries.lock().clone()
    }

    /// How many requests this endpoint has answered.
    pub fn request_count(&self) -> usize {
        self.queries.lock().len()
    }

    fn next(&self, query: PageQuery) -> SyncResult<EntityPage<P>> {
        self.queries.lock().push(query);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(EntityPage::empty()))
    }
}

/// Scripted responses for one snapshot endpoint of [`MockApi`].
pub struct ScriptedSnapshot<T> {
    responses: Mutex<VecDeque<SyncResult<Vec<T>>>>,
    calls: AtomicU64,
}

impl<T: Clone> ScriptedSnapshot<T> {
    fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: AtomicU64::new(0),
        }
    }

    /// Queues one snapshot response.
    pub fn set(&self, rows: Vec<T>) {
        self.responses.lock().push_back(Ok(rows));
    }

    /// Queues one failure at the current position.
    pub fn fail_next(&self, error: SyncError) {
        self.responses.lock().push_back(Err(error));
    }

    /// How many times the endpoint was called.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> SyncResult<Vec<T>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Scripted responses for the listening event endpoint of [`MockApi`].
pub struct ScriptedEvents {
    responses: Mutex<VecDeque<SyncResult<Vec<ListeningEventPayload>>>>,
    queries: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl ScriptedEvents {
    fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Queues one event batch.
    pub fn set(&self, events: Vec<ListeningEventPayload>) {
        self.responses.lock().push_back(Ok(events));
    }

    /// Queues one failure at the current position.
    pub fn fail_next(&self, error: SyncError) {
        self.responses.lock().push_back(Err(error));
    }

    /// The `since` filter of every request answered, in order.
    pub fn queries(&self) -> Vec<Option<DateTime<Utc>>> {
        self.queries.lock().clone()
    }

    fn next(&self, since: Option<DateTime<Utc>>) -> SyncResult<Vec<ListeningEventPayload>> {
        self.queries.lock().push(since);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// A scriptable in-memory server, for tests.
///
/// Every endpoint checks the connected flag first and answers
/// [`SyncError::Offline`] while disconnected.
pub struct MockApi {
    connected: AtomicBool,
    manifest: Mutex<Option<SyncManifest>>,
    /// Book endpoint.
    pub books: ScriptedPages<BookPayload>,
    /// Series endpoint.
    pub series: ScriptedPages<SeriesPayload>,
    /// Contributor endpoint.
    pub contributors: ScriptedPages<ContributorPayload>,
    /// Tag endpoint.
    pub tags: ScriptedPages<TagPayload>,
    /// Genre endpoint.
    pub genres: ScriptedPages<GenrePayload>,
    /// Playback progress endpoint.
    pub progress: ScriptedPages<ProgressPayload>,
    /// Shelf snapshot endpoint.
    pub shelves: ScriptedSnapshot<ShelfPayload>,
    /// Lens snapshot endpoint.
    pub lenses: ScriptedSnapshot<LensPayload>,
    /// Reading session snapshot endpoint.
    pub reading_sessions: ScriptedSnapshot<ReadingSessionPayload>,
    /// Active session snapshot endpoint.
    pub active_sessions: ScriptedSnapshot<ActiveSessionPayload>,
    /// Listening event endpoint.
    pub listening_events: ScriptedEvents,
}

impl MockApi {
    /// Creates a connected mock with nothing scripted.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            manifest: Mutex::new(None),
            books: ScriptedPages::new(),
            series: ScriptedPages::new(),
            contributors: ScriptedPages::new(),
            tags: ScriptedPages::new(),
            genres: ScriptedPages::new(),
            progress: ScriptedPages::new(),
            shelves: ScriptedSnapshot::new(),
            lenses: ScriptedSnapshot::new(),
            reading_sessions: ScriptedSnapshot::new(),
            active_sessions: ScriptedSnapshot::new(),
            listening_events: ScriptedEvents::new(),
        }
    }

    /// Sets the manifest returned to every pull.
    pub fn set_manifest(&self, manifest: SyncManifest) {
        *self.manifest.lock() = Some(manifest);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> SyncResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::Offline)
        }
    }
}

impl Default for MockApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncApi for MockApi {
    async fn manifest(&self) -> SyncResult<SyncManifest> {
        self.ensure_online()?;
        self.manifest
            .lock()
            .clone()
            .ok_or_else(|| SyncError::Protocol("no manifest scripted".into()))
    }

    async fn book_page(&self, query: PageQuery) -> SyncResult<EntityPage<BookPayload>> {
        self.ensure_online()?;
        self.books.next(query)
    }

    async fn series_page(&self, query: PageQuery) -> SyncResult<EntityPage<SeriesPayload>> {
        self.ensure_online()?;
        self.series.next(query)
    }

    async fn contributor_page(
        &self,
        query: PageQuery,
    ) -> SyncResult<EntityPage<ContributorPayload>> {
        self.ensure_online()?;
        self.contributors.next(query)
    }

    async fn tag_page(&self, query: PageQuery) -> SyncResult<EntityPage<TagPayload>> {
        self.ensure_online()?;
        self.tags.next(query)
    }

    async fn genre_page(&self, query: PageQuery) -> SyncResult<EntityPage<GenrePayload>> {
        self.ensure_online()?;
        self.genres.next(query)
    }

    async fn progress_page(&self, query: PageQuery) -> SyncResult<EntityPage<ProgressPayload>> {
        self.ensure_online()?;
        self.progress.next(query)
    }

    async fn shelves(&self) -> SyncResult<Vec<ShelfPayload>> {
        self.ensure_online()?;
        self.shelves.next()
    }

    async fn lenses(&self) -> SyncResult<Vec<LensPayload>> {
        self.ensure_online()?;
        self.lenses.next()
    }

    async fn reading_sessions(&self) -> SyncResult<Vec<ReadingSessionPayload>> {
        self.ensure_online()?;
        self.reading_sessions.next()
    }

    async fn active_sessions(&self) -> SyncResult<Vec<ActiveSessionPayload>> {
        self.ensure_online()?;
        self.active_sessions.next()
    }

    async fn listening_events(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<ListeningEventPayload>> {
        self.ensure_online()?;
        self.listening_events.next(since)
    }
}
