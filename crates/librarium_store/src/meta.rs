//! Sync bookkeeping carried by every syncable record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The entity types known to the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    /// A book in the library.
    Book,
    /// A series grouping books.
    Series,
    /// An author, narrator or translator.
    Contributor,
    /// A user-defined tag.
    Tag,
    /// A genre.
    Genre,
    /// A shelf (user-curated collection of books).
    Shelf,
    /// A lens (saved filter over the library).
    Lens,
    /// A listening event (playback history entry).
    ListeningEvent,
    /// A reading session.
    ReadingSession,
    /// A playback session currently open on some device.
    ActiveSession,
    /// Per-book playback progress.
    Progress,
}

impl EntityType {
    /// Stable identifier used in operation payload routing.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Book => "book",
            EntityType::Series => "series",
            EntityType::Contributor => "contributor",
            EntityType::Tag => "tag",
            EntityType::Genre => "genre",
            EntityType::Shelf => "shelf",
            EntityType::Lens => "lens",
            EntityType::ListeningEvent => "listening_event",
            EntityType::ReadingSession => "reading_session",
            EntityType::ActiveSession => "active_session",
            EntityType::Progress => "progress",
        }
    }

    /// Plural display name used in progress messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            EntityType::Book => "books",
            EntityType::Series => "series",
            EntityType::Contributor => "contributors",
            EntityType::Tag => "tags",
            EntityType::Genre => "genres",
            EntityType::Shelf => "shelves",
            EntityType::Lens => "lenses",
            EntityType::ListeningEvent => "listening events",
            EntityType::ReadingSession => "reading sessions",
            EntityType::ActiveSession => "active sessions",
            EntityType::Progress => "progress",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a record stands relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    /// The record matches the last known server state.
    Synced,
    /// The record has a local edit not yet pushed to the server.
    PendingLocalEdit,
    /// The record has a local edit that collided with a newer-looking
    /// server write. Requires explicit resolution; pulls must not
    /// overwrite it.
    Conflict,
}

impl SyncState {
    /// Returns true if the record carries local changes the server
    /// does not know about yet.
    pub fn has_local_changes(&self) -> bool {
        matches!(self, SyncState::PendingLocalEdit | SyncState::Conflict)
    }
}

/// Sync bookkeeping attached to every syncable record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Current sync state.
    pub sync_state: SyncState,
    /// Timestamp of the last local edit.
    pub last_modified: DateTime<Utc>,
    /// Server modification timestamp echoed back on the last pull.
    pub server_version: Option<DateTime<Utc>>,
    /// Server version that collided with a local edit. Set when the
    /// record entered [`SyncState::Conflict`]; kept for manual
    /// reconciliation.
    pub conflict_server_version: Option<DateTime<Utc>>,
}

impl SyncMeta {
    /// Bookkeeping for a record freshly pulled from the server.
    pub fn synced(server_version: DateTime<Utc>) -> Self {
        Self {
            sync_state: SyncState::Synced,
            last_modified: server_version,
            server_version: Some(server_version),
            conflict_server_version: None,
        }
    }

    /// Bookkeeping for a record edited locally at the given time.
    pub fn locally_edited(at: DateTime<Utc>) -> Self {
        Self {
            sync_state: SyncState::PendingLocalEdit,
            last_modified: at,
            server_version: None,
            conflict_server_version: None,
        }
    }

    /// Marks this record as conflicted with the given server version.
    pub fn mark_conflict(&mut self, server_version: DateTime<Utc>) {
        self.sync_state = SyncState::Conflict;
        self.conflict_server_version = Some(server_version);
    }

    /// Returns true if the record is in conflict.
    pub fn is_conflicted(&self) -> bool {
        self.sync_state == SyncState::Conflict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn synced_meta_mirrors_server_version() {
        let meta = SyncMeta::synced(at(100));
        assert_eq!(meta.sync_state, SyncState::Synced);
        assert_eq!(meta.last_modified, at(100));
        assert_eq!(meta.server_version, Some(at(100)));
        assert!(!meta.is_conflicted());
    }

    #[test]
    fn conflict_marking_preserves_local_timestamp() {
        let mut meta = SyncMeta::locally_edited(at(200));
        meta.mark_conflict(at(150));

        assert_eq!(meta.sync_state, SyncState::Conflict);
        assert_eq!(meta.last_modified, at(200));
        assert_eq!(meta.conflict_server_version, Some(at(150)));
        assert!(meta.is_conflicted());
    }

    #[test]
    fn local_change_states() {
        assert!(!SyncState::Synced.has_local_changes());
        assert!(SyncState::PendingLocalEdit.has_local_changes());
        assert!(SyncState::Conflict.has_local_changes());
    }

    #[test]
    fn entity_type_names() {
        assert_eq!(EntityType::Book.as_str(), "book");
        assert_eq!(EntityType::Book.display_name(), "books");
        assert_eq!(EntityType::ActiveSession.display_name(), "active sessions");
        assert_eq!(EntityType::Shelf.to_string(), "shelf");
    }
}
