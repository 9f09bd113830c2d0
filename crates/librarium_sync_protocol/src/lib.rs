//! # Librarium Sync Protocol
//!
//! Wire types exchanged between the Librarium client and its server.
//!
//! This crate provides:
//! - Paginated entity pages with deletion lists and opaque cursors
//! - The per-pull sync manifest (progress totals, self-heal reference)
//! - Entity payloads and their conversion into local records
//! - Live server events applied between pulls
//!
//! The transport itself (HTTP, websocket) lives with the client shell;
//! this crate only fixes the shapes both sides agree on. All payloads
//! serialize with camelCase field names.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod event;
mod manifest;
mod page;
mod payloads;

pub use event::ServerEvent;
pub use manifest::SyncManifest;
pub use page::{EntityPage, PageQuery};
pub use payloads::{
    ActiveSessionPayload, BookContributorPayload, BookPayload, ChapterPayload, ContributorPayload,
    GenrePayload, LensPayload, ListeningEventPayload, ProgressPayload, ReadingSessionPayload,
    SeriesPayload, ServerRecord, ShelfPayload, TagPayload,
};
