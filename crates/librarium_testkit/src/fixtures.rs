//! Deterministic fixture builders.
//!
//! Every builder takes an index and returns the same value on every
//! call, so tests can assert on exact IDs and timestamps. Timestamps
//! count seconds from a fixed base, which makes `timestamp(n)` strictly
//! newer than `timestamp(m)` whenever `n > m`.

use chrono::{DateTime, Duration, TimeZone, Utc};
use librarium_store::{
    Book, EntityType, NewOperation, OperationKind, PlaybackProgress, SyncMeta,
};
use librarium_sync_protocol::{
    ActiveSessionPayload, BookContributorPayload, BookPayload, ChapterPayload, ContributorPayload,
    GenrePayload, LensPayload, ListeningEventPayload, ProgressPayload, ReadingSessionPayload,
    SeriesPayload, ShelfPayload, SyncManifest, TagPayload,
};

/// A fixed point in time all fixture timestamps are offset from.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// `base_time()` plus `offset_secs` seconds.
pub fn timestamp(offset_secs: i64) -> DateTime<Utc> {
    base_time() + Duration::seconds(offset_secs)
}

/// Deterministic book ID, e.g. `book-0007`.
pub fn book_id(n: u32) -> String {
    format!("book-{n:04}")
}

/// Deterministic series ID.
pub fn series_id(n: u32) -> String {
    format!("series-{n:04}")
}

/// Deterministic contributor ID.
pub fn contributor_id(n: u32) -> String {
    format!("contributor-{n:04}")
}

/// Deterministic tag ID.
pub fn tag_id(n: u32) -> String {
    format!("tag-{n:04}")
}

/// Builds `count` fixtures with a one-based index.
///
/// ```rust,ignore
/// let pages = batch(100, book); // book-0001 through book-0100
/// ```
pub fn batch<T>(count: u32, build: impl Fn(u32) -> T) -> Vec<T> {
    (1..=count).map(build).collect()
}

/// A minimal book payload with no relations, updated at `timestamp(n)`.
pub fn book(n: u32) -> BookPayload {
    BookPayload::new(book_id(n), format!("Book {n}"), timestamp(i64::from(n)))
}

/// A series payload updated at `timestamp(n)`.
pub fn series(n: u32) -> SeriesPayload {
    SeriesPayload::new(series_id(n), format!("Series {n}"), timestamp(i64::from(n)))
}

/// A contributor payload updated at `timestamp(n)`.
pub fn contributor(n: u32) -> ContributorPayload {
    ContributorPayload::new(
        contributor_id(n),
        format!("Contributor {n}"),
        timestamp(i64::from(n)),
    )
}

/// A tag payload updated at `timestamp(n)`.
pub fn tag(n: u32) -> TagPayload {
    TagPayload::new(tag_id(n), format!("Tag {n}"), timestamp(i64::from(n)))
}

/// A genre payload updated at `timestamp(n)`.
pub fn genre(n: u32) -> GenrePayload {
    GenrePayload::new(
        format!("genre-{n:04}"),
        format!("Genre {n}"),
        timestamp(i64::from(n)),
    )
}

/// An empty shelf payload updated at `timestamp(n)`.
pub fn shelf(n: u32) -> ShelfPayload {
    ShelfPayload::new(
        format!("shelf-{n:04}"),
        format!("Shelf {n}"),
        timestamp(i64::from(n)),
    )
}

/// A lens payload with a fixed query, updated at `timestamp(n)`.
pub fn lens(n: u32) -> LensPayload {
    LensPayload::new(
        format!("lens-{n:04}"),
        format!("Lens {n}"),
        "finished:false",
        timestamp(i64::from(n)),
    )
}

/// Progress for `book_id(n)` at `n * 1000` ms, updated at `timestamp(n)`.
pub fn progress(n: u32) -> ProgressPayload {
    ProgressPayload::new(book_id(n), u64::from(n) * 1000, timestamp(i64::from(n)))
}

/// A one-minute listening event against `book_id(n)`.
pub fn listening_event(n: u32) -> ListeningEventPayload {
    ListeningEventPayload {
        id: format!("event-{n:04}"),
        book_id: book_id(n),
        started_at: timestamp(i64::from(n)),
        duration_ms: 60_000,
    }
}

/// A finished reading session against `book_id(n)`.
pub fn reading_session(n: u32) -> ReadingSessionPayload {
    ReadingSessionPayload {
        id: format!("reading-{n:04}"),
        book_id: book_id(n),
        started_at: timestamp(i64::from(n)),
        finished_at: Some(timestamp(i64::from(n) + 1800)),
        pages_read: Some(12),
    }
}

/// A live playback session against `book_id(n)`.
pub fn active_session(n: u32) -> ActiveSessionPayload {
    ActiveSessionPayload {
        id: format!("session-{n:04}"),
        book_id: book_id(n),
        device_name: format!("Device {n}"),
        position_ms: u64::from(n) * 500,
        updated_at: timestamp(i64::from(n)),
    }
}

/// A local book record stamped `Synced` at `server_version`.
pub fn synced_book(n: u32, server_version: DateTime<Utc>) -> Book {
    Book::new(book_id(n), format!("Book {n}"), SyncMeta::synced(server_version))
}

/// A local book record carrying an unsynced edit made at `edited_at`.
pub fn locally_edited_book(n: u32, edited_at: DateTime<Utc>) -> Book {
    Book::new(
        book_id(n),
        format!("Book {n} (edited)"),
        SyncMeta::locally_edited(edited_at),
    )
}

/// A local progress record carrying an unsynced edit made at `edited_at`.
pub fn locally_edited_progress(
    n: u32,
    position_ms: u64,
    edited_at: DateTime<Utc>,
) -> PlaybackProgress {
    PlaybackProgress::new(book_id(n), position_ms, SyncMeta::locally_edited(edited_at))
}

/// A queue entry recording a progress update against `book_id(n)`.
pub fn progress_update(n: u32, position_ms: u64) -> NewOperation {
    NewOperation::new(OperationKind::Update)
        .with_entity(EntityType::Progress, book_id(n))
        .with_payload(serde_json::json!({ "positionMs": position_ms, "finished": false }))
}

/// A queue entry recording a book deletion against `book_id(n)`.
pub fn book_delete(n: u32) -> NewOperation {
    NewOperation::new(OperationKind::Delete).with_entity(EntityType::Book, book_id(n))
}

/// A manifest reporting only catalog counts; everything else zero.
pub fn manifest(books: u64, series: u64, contributors: u64) -> SyncManifest {
    SyncManifest {
        books,
        series,
        contributors,
        ..Default::default()
    }
}

/// Canned multi-entity datasets for end-to-end tests.
pub mod scenarios {
    use super::*;

    /// A coherent set of server payloads covering every entity type.
    ///
    /// Relations are internally consistent: books reference series,
    /// contributors and tags from the same set, the shelf holds real
    /// book IDs, and history rows target real books.
    #[derive(Debug, Clone)]
    pub struct Library {
        /// Catalog books, with chapters, roles and tag links attached.
        pub books: Vec<BookPayload>,
        /// Series referenced by the books.
        pub series: Vec<SeriesPayload>,
        /// Contributors referenced by the books.
        pub contributors: Vec<ContributorPayload>,
        /// Tags referenced by the books.
        pub tags: Vec<TagPayload>,
        /// Genres.
        pub genres: Vec<GenrePayload>,
        /// Shelves holding books from this set.
        pub shelves: Vec<ShelfPayload>,
        /// Lenses.
        pub lenses: Vec<LensPayload>,
        /// Playback progress rows.
        pub progress: Vec<ProgressPayload>,
        /// Listening history.
        pub listening_events: Vec<ListeningEventPayload>,
        /// Reading sessions.
        pub reading_sessions: Vec<ReadingSessionPayload>,
        /// Live playback sessions.
        pub active_sessions: Vec<ActiveSessionPayload>,
    }

    impl Library {
        /// A manifest whose counts match this set exactly.
        pub fn manifest(&self) -> SyncManifest {
            SyncManifest {
                books: self.books.len() as u64,
                series: self.series.len() as u64,
                contributors: self.contributors.len() as u64,
                tags: self.tags.len() as u64,
                genres: self.genres.len() as u64,
                shelves: self.shelves.len() as u64,
                lenses: self.lenses.len() as u64,
                listening_events: self.listening_events.len() as u64,
                reading_sessions: self.reading_sessions.len() as u64,
                generated_at: Some(timestamp(0)),
            }
        }
    }

    /// Six books across two series, three contributors, and one row of
    /// every library-data type.
    pub fn small_library() -> Library {
        let mut books = batch(6, book);

        // Books 1-3 form series 1, books 4-5 form series 2, book 6
        // stands alone.
        for (i, b) in books.iter_mut().enumerate() {
            let n = i as u32 + 1;
            match n {
                1..=3 => {
                    b.series_id = Some(series_id(1));
                    b.series_index = Some(f64::from(n));
                }
                4..=5 => {
                    b.series_id = Some(series_id(2));
                    b.series_index = Some(f64::from(n - 3));
                }
                _ => {}
            }
            // Books 1-4 are audiobooks with two chapters each.
            if n <= 4 {
                b.duration_ms = Some(3_600_000);
                b.chapters = vec![
                    ChapterPayload {
                        id: format!("chapter-{n:04}-1"),
                        title: "Opening".into(),
                        start_ms: 0,
                        end_ms: 1_800_000,
                    },
                    ChapterPayload {
                        id: format!("chapter-{n:04}-2"),
                        title: "Closing".into(),
                        start_ms: 1_800_000,
                        end_ms: 3_600_000,
                    },
                ];
            }
            b.contributors = vec![BookContributorPayload {
                contributor_id: contributor_id((n - 1) % 3 + 1),
                role: "author".into(),
            }];
            if n <= 2 {
                b.tag_ids = vec![tag_id(n)];
            }
        }

        let mut shelves = vec![shelf(1)];
        shelves[0].book_ids = vec![book_id(1), book_id(6)];

        Library {
            books,
            series: batch(2, series),
            contributors: batch(3, contributor),
            tags: batch(2, tag),
            genres: vec![genre(1)],
            shelves,
            lenses: vec![lens(1)],
            progress: vec![progress(1), progress(2)],
            listening_events: batch(3, listening_event),
            reading_sessions: vec![reading_session(6)],
            active_sessions: vec![active_session(1)],
        }
    }
}
