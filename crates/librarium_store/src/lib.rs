//! # Librarium Store
//!
//! Storage contracts and records for the Librarium client.
//!
//! This crate provides:
//! - Synced record types (books, series, contributors, tags, genres,
//!   shelves, lenses, playback progress)
//! - Server-owned history types (listening events, reading sessions,
//!   active sessions)
//! - Per-record sync metadata (`Synced` / `PendingLocalEdit` / `Conflict`)
//! - The offline operation queue and its change notifications
//! - The pull checkpoint store
//! - In-memory implementations of every contract, used in tests
//!
//! ## Key Invariants
//!
//! - Every synced record carries its own [`SyncMeta`]; sync decisions are
//!   made per record, never per table
//! - A record in `Conflict` keeps both payloads: the local edit in the row,
//!   the server's timestamp in `conflict_server_version`
//! - Queue rows are drained in creation order and survive process restarts
//!   (`InProgress` rows are reset to `Pending` on startup)

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod error;
mod events;
mod memory;
mod meta;
mod queue;
mod records;
mod store;

pub use checkpoint::{CheckpointStore, MemoryCheckpointStore};
pub use error::{StoreError, StoreResult};
pub use events::QueueEvents;
pub use memory::{MemoryQueue, MemoryStore};
pub use meta::{EntityType, SyncMeta, SyncState};
pub use queue::{
    NewOperation, OperationKind, OperationQueue, OperationStatus, PendingOperation, QueueStats,
    DEFAULT_MAX_RETRIES,
};
pub use records::{
    ActiveSession, Book, Chapter, Contributor, ContributorRole, Genre, Lens, ListeningEvent,
    PlaybackProgress, ReadingSession, Series, Shelf, SyncRecord, Tag,
};
pub use store::{BookRelations, EventStore, LibraryStore, RecordStore, SnapshotStore};
