//! The per-pull sync manifest.

use chrono::{DateTime, Utc};
use librarium_store::EntityType;
use serde::{Deserialize, Serialize};

/// Server-reported record counts, fetched once at the start of a pull.
///
/// Counts size progress bars and drive self-healing (a local count below
/// the manifest count after a delta pull triggers a full re-pull). The
/// manifest is never authoritative for correctness: a missing or stale
/// manifest degrades progress fidelity and nothing else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncManifest {
    /// Number of books on the server.
    pub books: u64,
    /// Number of series on the server.
    pub series: u64,
    /// Number of contributors on the server.
    pub contributors: u64,
    /// Number of tags on the server.
    pub tags: u64,
    /// Number of genres on the server.
    pub genres: u64,
    /// Number of shelves on the server.
    pub shelves: u64,
    /// Number of lenses on the server.
    pub lenses: u64,
    /// Number of listening events on the server.
    pub listening_events: u64,
    /// Number of reading sessions on the server.
    pub reading_sessions: u64,
    /// When the server generated these counts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
}

impl SyncManifest {
    /// The manifest count for one entity type, where the server reports one.
    ///
    /// Playback progress and active sessions have no manifest entry:
    /// progress rows track books one-to-one and active sessions are a
    /// small live snapshot.
    pub fn count_for(&self, entity: EntityType) -> Option<u64> {
        match entity {
            EntityType::Book => Some(self.books),
            EntityType::Series => Some(self.series),
            EntityType::Contributor => Some(self.contributors),
            EntityType::Tag => Some(self.tags),
            EntityType::Genre => Some(self.genres),
            EntityType::Shelf => Some(self.shelves),
            EntityType::Lens => Some(self.lenses),
            EntityType::ListeningEvent => Some(self.listening_events),
            EntityType::ReadingSession => Some(self.reading_sessions),
            EntityType::ActiveSession | EntityType::Progress => None,
        }
    }

    /// Sum of all reported counts, used for the aggregate progress total.
    pub fn total(&self) -> u64 {
        self.books
            + self.series
            + self.contributors
            + self.tags
            + self.genres
            + self.shelves
            + self.lenses
            + self.listening_events
            + self.reading_sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_for_each_entity() {
        let manifest = SyncManifest {
            books: 100,
            series: 10,
            contributors: 25,
            ..Default::default()
        };

        assert_eq!(manifest.count_for(EntityType::Book), Some(100));
        assert_eq!(manifest.count_for(EntityType::Series), Some(10));
        assert_eq!(manifest.count_for(EntityType::Contributor), Some(25));
        assert_eq!(manifest.count_for(EntityType::Tag), Some(0));
        assert_eq!(manifest.count_for(EntityType::Progress), None);
        assert_eq!(manifest.count_for(EntityType::ActiveSession), None);
    }

    #[test]
    fn total_sums_reported_counts() {
        let manifest = SyncManifest {
            books: 100,
            series: 10,
            contributors: 25,
            tags: 5,
            genres: 3,
            shelves: 2,
            lenses: 1,
            listening_events: 200,
            reading_sessions: 4,
            generated_at: None,
        };
        assert_eq!(manifest.total(), 350);
    }

    #[test]
    fn serializes_camel_case() {
        let manifest = SyncManifest {
            listening_events: 7,
            ..Default::default()
        };
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["listeningEvents"], 7);
        assert_eq!(json["readingSessions"], 0);
    }
}
