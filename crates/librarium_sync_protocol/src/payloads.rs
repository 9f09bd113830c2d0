//! Entity payloads as the server sends them.
//!
//! Payloads carry the server's `updatedAt` alongside the entity fields.
//! Converting a payload into a local record stamps the record's sync
//! metadata as `Synced` with that timestamp as the server version, so a
//! pulled record is clean until the user edits it.

use chrono::{DateTime, Utc};
use librarium_store::{
    ActiveSession, Book, Chapter, Contributor, ContributorRole, Genre, Lens, ListeningEvent,
    PlaybackProgress, ReadingSession, Series, Shelf, SyncMeta, SyncRecord, Tag,
};
use serde::{Deserialize, Serialize};

/// A server payload that maps onto one conflict-checked local record.
pub trait ServerRecord: Clone + Send + Sync + 'static {
    /// The local record this payload converts into.
    type Record: SyncRecord;

    /// The server-assigned record ID.
    fn id(&self) -> &str;

    /// The server's modification timestamp for this record.
    fn updated_at(&self) -> DateTime<Utc>;

    /// Converts into a local record stamped `Synced` at [`Self::updated_at`].
    fn into_record(self) -> Self::Record;
}

/// A book as served by the catalog endpoint.
///
/// Sub-entity lists (chapters, contributor roles, tag links) ride along
/// with the book and are replaced wholesale on merge; they carry no sync
/// metadata of their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookPayload {
    /// Server-assigned book ID.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Series this book belongs to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_id: Option<String>,
    /// Position within the series.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_index: Option<f64>,
    /// Audio duration in milliseconds, absent for text-only books.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Cover image URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    /// Server modification timestamp.
    pub updated_at: DateTime<Utc>,
    /// Chapter list, replaced per book on merge.
    #[serde(default)]
    pub chapters: Vec<ChapterPayload>,
    /// Contributor role links, replaced per book on merge.
    #[serde(default)]
    pub contributors: Vec<BookContributorPayload>,
    /// Tag links, replaced per book on merge.
    #[serde(default)]
    pub tag_ids: Vec<String>,
}

impl BookPayload {
    /// Creates a minimal book payload with no relations.
    pub fn new(id: impl Into<String>, title: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            series_id: None,
            series_index: None,
            duration_ms: None,
            cover_url: None,
            updated_at,
            chapters: Vec::new(),
            contributors: Vec::new(),
            tag_ids: Vec::new(),
        }
    }
}

impl ServerRecord for BookPayload {
    type Record = Book;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn into_record(self) -> Book {
        Book {
            meta: SyncMeta::synced(self.updated_at),
            id: self.id,
            title: self.title,
            series_id: self.series_id,
            series_index: self.series_index,
            duration_ms: self.duration_ms,
            cover_url: self.cover_url,
            // Derived locally from the cover image after the upsert.
            accent_color: None,
        }
    }
}

/// A chapter nested inside a [`BookPayload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterPayload {
    /// Server-assigned chapter ID.
    pub id: String,
    /// Chapter title.
    pub title: String,
    /// Start offset in milliseconds.
    pub start_ms: u64,
    /// End offset in milliseconds.
    pub end_ms: u64,
}

impl ChapterPayload {
    /// Converts into a local chapter row under `book_id`.
    pub fn into_chapter(self, book_id: &str) -> Chapter {
        Chapter {
            id: self.id,
            book_id: book_id.to_owned(),
            title: self.title,
            start_ms: self.start_ms,
            end_ms: self.end_ms,
        }
    }
}

/// A contributor role link nested inside a [`BookPayload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookContributorPayload {
    /// The linked contributor's ID.
    pub contributor_id: String,
    /// Role on this book, e.g. "author" or "narrator".
    pub role: String,
}

impl BookContributorPayload {
    /// Converts into a local role row under `book_id`.
    pub fn into_role(self, book_id: &str) -> ContributorRole {
        ContributorRole {
            book_id: book_id.to_owned(),
            contributor_id: self.contributor_id,
            role: self.role,
        }
    }
}

/// A series as served by the catalog endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPayload {
    /// Server-assigned series ID.
    pub id: String,
    /// Series name.
    pub name: String,
    /// Server modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl SeriesPayload {
    /// Creates a series payload.
    pub fn new(id: impl Into<String>, name: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            updated_at,
        }
    }
}

impl ServerRecord for SeriesPayload {
    type Record = Series;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn into_record(self) -> Series {
        Series {
            meta: SyncMeta::synced(self.updated_at),
            id: self.id,
            name: self.name,
        }
    }
}

/// A contributor (author, narrator, translator) as served by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributorPayload {
    /// Server-assigned contributor ID.
    pub id: String,
    /// Contributor name.
    pub name: String,
    /// Server modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ContributorPayload {
    /// Creates a contributor payload.
    pub fn new(id: impl Into<String>, name: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            updated_at,
        }
    }
}

impl ServerRecord for ContributorPayload {
    type Record = Contributor;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn into_record(self) -> Contributor {
        Contributor {
            meta: SyncMeta::synced(self.updated_at),
            id: self.id,
            name: self.name,
        }
    }
}

/// A tag as served by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagPayload {
    /// Server-assigned tag ID.
    pub id: String,
    /// Tag name.
    pub name: String,
    /// Server modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl TagPayload {
    /// Creates a tag payload.
    pub fn new(id: impl Into<String>, name: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            updated_at,
        }
    }
}

impl ServerRecord for TagPayload {
    type Record = Tag;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn into_record(self) -> Tag {
        Tag {
            meta: SyncMeta::synced(self.updated_at),
            id: self.id,
            name: self.name,
        }
    }
}

/// A genre as served by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenrePayload {
    /// Server-assigned genre ID.
    pub id: String,
    /// Genre name.
    pub name: String,
    /// Server modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl GenrePayload {
    /// Creates a genre payload.
    pub fn new(id: impl Into<String>, name: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            updated_at,
        }
    }
}

impl ServerRecord for GenrePayload {
    type Record = Genre;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn into_record(self) -> Genre {
        Genre {
            meta: SyncMeta::synced(self.updated_at),
            id: self.id,
            name: self.name,
        }
    }
}

/// A shelf as served by the snapshot endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShelfPayload {
    /// Server-assigned shelf ID.
    pub id: String,
    /// Shelf name.
    pub name: String,
    /// Ordered book IDs on the shelf.
    #[serde(default)]
    pub book_ids: Vec<String>,
    /// Server modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ShelfPayload {
    /// Creates a shelf payload with no books.
    pub fn new(id: impl Into<String>, name: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            book_ids: Vec::new(),
            updated_at,
        }
    }
}

impl ServerRecord for ShelfPayload {
    type Record = Shelf;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn into_record(self) -> Shelf {
        Shelf {
            meta: SyncMeta::synced(self.updated_at),
            id: self.id,
            name: self.name,
            book_ids: self.book_ids,
        }
    }
}

/// A lens (saved smart filter) as served by the snapshot endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LensPayload {
    /// Server-assigned lens ID.
    pub id: String,
    /// Lens name.
    pub name: String,
    /// Filter expression evaluated by the client.
    pub query: String,
    /// Server modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl LensPayload {
    /// Creates a lens payload.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        query: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            query: query.into(),
            updated_at,
        }
    }
}

impl ServerRecord for LensPayload {
    type Record = Lens;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn into_record(self) -> Lens {
        Lens {
            meta: SyncMeta::synced(self.updated_at),
            id: self.id,
            name: self.name,
            query: self.query,
        }
    }
}

/// Playback position for one book.
///
/// Keyed by book ID on the wire and locally: one progress row per book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    /// The book this progress belongs to.
    pub book_id: String,
    /// Playback position in milliseconds.
    pub position_ms: u64,
    /// Whether the book is marked finished.
    pub finished: bool,
    /// Server modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ProgressPayload {
    /// Creates a progress payload.
    pub fn new(book_id: impl Into<String>, position_ms: u64, updated_at: DateTime<Utc>) -> Self {
        Self {
            book_id: book_id.into(),
            position_ms,
            finished: false,
            updated_at,
        }
    }
}

impl ServerRecord for ProgressPayload {
    type Record = PlaybackProgress;

    fn id(&self) -> &str {
        &self.book_id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn into_record(self) -> PlaybackProgress {
        PlaybackProgress {
            meta: SyncMeta::synced(self.updated_at),
            id: self.book_id,
            position_ms: self.position_ms,
            finished: self.finished,
        }
    }
}

/// A finished listening event from the history endpoint.
///
/// Events are immutable once written, so they carry no `updatedAt` and
/// are never conflict-checked; upserts by ID make re-fetches idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListeningEventPayload {
    /// Server-assigned event ID.
    pub id: String,
    /// The book that was played.
    pub book_id: String,
    /// When playback started.
    pub started_at: DateTime<Utc>,
    /// How long playback lasted, in milliseconds.
    pub duration_ms: u64,
}

impl From<ListeningEventPayload> for ListeningEvent {
    fn from(payload: ListeningEventPayload) -> Self {
        ListeningEvent {
            id: payload.id,
            book_id: payload.book_id,
            started_at: payload.started_at,
            duration_ms: payload.duration_ms,
        }
    }
}

/// A reading session from the snapshot endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingSessionPayload {
    /// Server-assigned session ID.
    pub id: String,
    /// The book that was read.
    pub book_id: String,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// When the session ended, absent while in progress.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Pages read during the session, where the format has pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages_read: Option<u32>,
}

impl From<ReadingSessionPayload> for ReadingSession {
    fn from(payload: ReadingSessionPayload) -> Self {
        ReadingSession {
            id: payload.id,
            book_id: payload.book_id,
            started_at: payload.started_at,
            finished_at: payload.finished_at,
            pages_read: payload.pages_read,
        }
    }
}

/// A live playback session on some device, from the snapshot endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSessionPayload {
    /// Server-assigned session ID.
    pub id: String,
    /// The book being played.
    pub book_id: String,
    /// Human-readable device name.
    pub device_name: String,
    /// Current playback position in milliseconds.
    pub position_ms: u64,
    /// Last heartbeat from the device.
    pub updated_at: DateTime<Utc>,
}

impl From<ActiveSessionPayload> for ActiveSession {
    fn from(payload: ActiveSessionPayload) -> Self {
        ActiveSession {
            id: payload.id,
            book_id: payload.book_id,
            device_name: payload.device_name,
            position_ms: payload.position_ms,
            updated_at: payload.updated_at,
        }
    }
}
