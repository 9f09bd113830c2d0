//! Live events pushed by the server between pulls.

use crate::payloads::{ActiveSessionPayload, BookPayload, ProgressPayload};
use serde::{Deserialize, Serialize};

/// One change notification from the server's live event stream.
///
/// Applying a batch of these to local storage must hold the sync mutex,
/// so live updates never interleave with a push flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A book was created or modified on the server.
    BookChanged(BookPayload),
    /// A book was deleted on the server.
    BookRemoved {
        /// The deleted book's ID.
        id: String,
    },
    /// Playback progress changed on another device.
    ProgressChanged(ProgressPayload),
    /// The set of live playback sessions changed.
    ActiveSessionsChanged(Vec<ActiveSessionPayload>),
}

impl ServerEvent {
    /// Short event name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::BookChanged(_) => "book_changed",
            ServerEvent::BookRemoved { .. } => "book_removed",
            ServerEvent::ProgressChanged(_) => "progress_changed",
            ServerEvent::ActiveSessionsChanged(_) => "active_sessions_changed",
        }
    }
}
