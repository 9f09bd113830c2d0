//! Conflict detection between local edits and incoming server records.

use chrono::{DateTime, Utc};
use librarium_store::{SyncMeta, SyncState};
use librarium_sync_protocol::ServerRecord;
use std::collections::HashMap;

/// Decides, record by record, whether an incoming server version may
/// overwrite local state.
///
/// A conflict exists when an unsynced local edit is newer than the
/// incoming server version: the server does not know about the edit
/// yet, so overwriting would silently lose it. Conflicted records keep
/// the local payload and retain the server's timestamp as metadata for
/// later manual resolution. Everywhere else the server wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    /// Creates a detector.
    pub fn new() -> Self {
        Self
    }

    /// Whether the local row must be kept instead of overwritten.
    ///
    /// True for rows already in conflict (never silently overwritten by
    /// a later pull) and for unsynced local edits newer than
    /// `incoming_version`.
    pub fn should_preserve_local(
        &self,
        meta: Option<&SyncMeta>,
        incoming_version: DateTime<Utc>,
    ) -> bool {
        match meta {
            Some(meta) => match meta.sync_state {
                SyncState::Conflict => true,
                SyncState::PendingLocalEdit => meta.last_modified > incoming_version,
                SyncState::Synced => false,
            },
            None => false,
        }
    }

    /// Finds fresh conflicts in a page of incoming records.
    ///
    /// Returns entity ID to incoming server version for every row whose
    /// state must flip to conflict. Rows already in conflict are not
    /// reported again; their state and retained server version stand.
    pub fn detect<P: ServerRecord>(
        &self,
        local: &HashMap<String, SyncMeta>,
        incoming: &[P],
    ) -> HashMap<String, DateTime<Utc>> {
        let mut conflicts = HashMap::new();
        for record in incoming {
            if let Some(meta) = local.get(record.id()) {
                if meta.sync_state == SyncState::PendingLocalEdit
                    && meta.last_modified > record.updated_at()
                {
                    conflicts.insert(record.id().to_owned(), record.updated_at());
                }
            }
        }
        conflicts
    }
}
