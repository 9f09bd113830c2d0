//! Entity record types held in the local store.
//!
//! Records carry only the fields the sync engine needs: identity, the
//! display fields pullers denormalize, and the [`SyncMeta`] bookkeeping
//! pair (`last_modified` / `server_version`) conflict detection runs on.

use crate::meta::SyncMeta;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A record the sync engine can pull, conflict-check and upsert.
pub trait SyncRecord: Clone + Send + Sync + 'static {
    /// Stable server-assigned identifier.
    fn record_id(&self) -> &str;

    /// Sync bookkeeping for this record.
    fn sync_meta(&self) -> &SyncMeta;

    /// Mutable sync bookkeeping.
    fn sync_meta_mut(&mut self) -> &mut SyncMeta;
}

macro_rules! impl_sync_record {
    ($record:ty) => {
        impl SyncRecord for $record {
            fn record_id(&self) -> &str {
                &self.id
            }

            fn sync_meta(&self) -> &SyncMeta {
                &self.meta
            }

            fn sync_meta_mut(&mut self) -> &mut SyncMeta {
                &mut self.meta
            }
        }
    };
}

/// A book in the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    /// Server-assigned identifier.
    pub id: String,
    /// Title.
    pub title: String,
    /// Series this book belongs to, if any.
    pub series_id: Option<String>,
    /// Position within the series.
    pub series_index: Option<f64>,
    /// Total audio duration in milliseconds, if an audiobook.
    pub duration_ms: Option<u64>,
    /// Cover artwork URL on the server.
    pub cover_url: Option<String>,
    /// Accent color extracted from the cover artwork. Filled in
    /// asynchronously after a pull; never part of the server payload.
    pub accent_color: Option<String>,
    /// Sync bookkeeping.
    pub meta: SyncMeta,
}

impl Book {
    /// Creates a book with the given identity and bookkeeping.
    pub fn new(id: impl Into<String>, title: impl Into<String>, meta: SyncMeta) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            series_id: None,
            series_index: None,
            duration_ms: None,
            cover_url: None,
            accent_color: None,
            meta,
        }
    }
}

impl_sync_record!(Book);

/// A chapter of a book. Replaced wholesale whenever the parent book is
/// pulled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    /// Server-assigned identifier.
    pub id: String,
    /// Owning book.
    pub book_id: String,
    /// Chapter title.
    pub title: String,
    /// Start offset in milliseconds.
    pub start_ms: u64,
    /// End offset in milliseconds.
    pub end_ms: u64,
}

/// A contributor's role on a specific book (author, narrator, ...).
/// Replaced wholesale whenever the parent book is pulled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributorRole {
    /// Owning book.
    pub book_id: String,
    /// The contributor.
    pub contributor_id: String,
    /// Role name, e.g. "author" or "narrator".
    pub role: String,
}

/// A series grouping books.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Server-assigned identifier.
    pub id: String,
    /// Series name.
    pub name: String,
    /// Sync bookkeeping.
    pub meta: SyncMeta,
}

impl Series {
    /// Creates a series record.
    pub fn new(id: impl Into<String>, name: impl Into<String>, meta: SyncMeta) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            meta,
        }
    }
}

impl_sync_record!(Series);

/// An author, narrator or translator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contributor {
    /// Server-assigned identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Sync bookkeeping.
    pub meta: SyncMeta,
}

impl Contributor {
    /// Creates a contributor record.
    pub fn new(id: impl Into<String>, name: impl Into<String>, meta: SyncMeta) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            meta,
        }
    }
}

impl_sync_record!(Contributor);

/// A user-defined tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    /// Server-assigned identifier.
    pub id: String,
    /// Tag name.
    pub name: String,
    /// Sync bookkeeping.
    pub meta: SyncMeta,
}

impl Tag {
    /// Creates a tag record.
    pub fn new(id: impl Into<String>, name: impl Into<String>, meta: SyncMeta) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            meta,
        }
    }
}

impl_sync_record!(Tag);

/// A genre.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genre {
    /// Server-assigned identifier.
    pub id: String,
    /// Genre name.
    pub name: String,
    /// Sync bookkeeping.
    pub meta: SyncMeta,
}

impl Genre {
    /// Creates a genre record.
    pub fn new(id: impl Into<String>, name: impl Into<String>, meta: SyncMeta) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            meta,
        }
    }
}

impl_sync_record!(Genre);

/// A shelf: a user-curated, ordered collection of books.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shelf {
    /// Server-assigned identifier.
    pub id: String,
    /// Shelf name.
    pub name: String,
    /// Books on the shelf, in display order.
    pub book_ids: Vec<String>,
    /// Sync bookkeeping.
    pub meta: SyncMeta,
}

impl Shelf {
    /// Creates a shelf record.
    pub fn new(id: impl Into<String>, name: impl Into<String>, meta: SyncMeta) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            book_ids: Vec::new(),
            meta,
        }
    }
}

impl_sync_record!(Shelf);

/// A lens: a saved filter over the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lens {
    /// Server-assigned identifier.
    pub id: String,
    /// Lens name.
    pub name: String,
    /// Serialized filter expression. Opaque to the sync engine.
    pub query: String,
    /// Sync bookkeeping.
    pub meta: SyncMeta,
}

impl Lens {
    /// Creates a lens record.
    pub fn new(id: impl Into<String>, name: impl Into<String>, meta: SyncMeta) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            query: String::new(),
            meta,
        }
    }
}

impl_sync_record!(Lens);

/// Per-book playback progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackProgress {
    /// The book this progress belongs to. Doubles as the record ID.
    pub id: String,
    /// Playback position in milliseconds.
    pub position_ms: u64,
    /// Whether the book is marked finished.
    pub finished: bool,
    /// Sync bookkeeping.
    pub meta: SyncMeta,
}

impl PlaybackProgress {
    /// Creates a progress record for the given book.
    pub fn new(book_id: impl Into<String>, position_ms: u64, meta: SyncMeta) -> Self {
        Self {
            id: book_id.into(),
            position_ms,
            finished: false,
            meta,
        }
    }
}

impl_sync_record!(PlaybackProgress);

/// A playback history entry. Events are immutable facts; they carry no
/// sync bookkeeping and are upserted by ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListeningEvent {
    /// Server-assigned identifier.
    pub id: String,
    /// The book that was played.
    pub book_id: String,
    /// When playback started.
    pub started_at: DateTime<Utc>,
    /// How long playback lasted, in milliseconds.
    pub duration_ms: u64,
}

/// A reading session. The server is the sole source of truth; local
/// rows are fully replaced on every pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingSession {
    /// Server-assigned identifier.
    pub id: String,
    /// The book being read.
    pub book_id: String,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// When the session ended, if it has.
    pub finished_at: Option<DateTime<Utc>>,
    /// Pages read during the session, if known.
    pub pages_read: Option<u32>,
}

/// A playback session currently open on some device. Fully replaced on
/// every pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSession {
    /// Server-assigned identifier.
    pub id: String,
    /// The book being played.
    pub book_id: String,
    /// Human-readable device name.
    pub device_name: String,
    /// Current playback position in milliseconds.
    pub position_ms: u64,
    /// Last time the server heard from the device.
    pub updated_at: DateTime<Utc>,
}
