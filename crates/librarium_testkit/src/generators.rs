//! Property-based test generators using proptest.
//!
//! Strategies producing sync-domain values that hold the domain's
//! invariants, e.g. conflicted metadata always carries the colliding
//! server version.

use chrono::{DateTime, TimeZone, Utc};
use librarium_store::{EntityType, NewOperation, OperationKind, SyncMeta, SyncState};
use librarium_sync_protocol::{BookPayload, ProgressPayload};
use proptest::prelude::*;

/// Strategy for server-style record IDs.
pub fn record_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9-]{7,15}").expect("Invalid regex")
}

/// Strategy for display titles.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{2,12}( [a-z]{2,12}){0,3}").expect("Invalid regex")
}

/// Strategy for server timestamps, second precision.
pub fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (1_000_000_000i64..1_900_000_000i64).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
}

/// Strategy for sync states, weighted toward the common clean state.
pub fn sync_state_strategy() -> impl Strategy<Value = SyncState> {
    prop_oneof![
        4 => Just(SyncState::Synced),
        2 => Just(SyncState::PendingLocalEdit),
        1 => Just(SyncState::Conflict),
    ]
}

/// Strategy for record sync metadata.
///
/// Generated metadata holds the store's invariant that conflicted rows
/// retain the server version they collided with.
pub fn sync_meta_strategy() -> impl Strategy<Value = SyncMeta> {
    (
        sync_state_strategy(),
        timestamp_strategy(),
        prop::option::of(timestamp_strategy()),
    )
        .prop_map(|(sync_state, last_modified, server_version)| SyncMeta {
            sync_state,
            last_modified,
            server_version,
            conflict_server_version: match sync_state {
                SyncState::Conflict => server_version.or(Some(last_modified)),
                _ => None,
            },
        })
}

/// Strategy for book payloads without relations.
pub fn book_payload_strategy() -> impl Strategy<Value = BookPayload> {
    (
        record_id_strategy(),
        title_strategy(),
        timestamp_strategy(),
        prop::option::of(0u64..200_000_000),
    )
        .prop_map(|(id, title, updated_at, duration_ms)| {
            let mut payload = BookPayload::new(id, title, updated_at);
            payload.duration_ms = duration_ms;
            payload
        })
}

/// Strategy for playback progress payloads.
pub fn progress_payload_strategy() -> impl Strategy<Value = ProgressPayload> {
    (
        record_id_strategy(),
        0u64..500_000_000,
        any::<bool>(),
        timestamp_strategy(),
    )
        .prop_map(|(book_id, position_ms, finished, updated_at)| {
            let mut payload = ProgressPayload::new(book_id, position_ms, updated_at);
            payload.finished = finished;
            payload
        })
}

/// Strategy for queue operation kinds.
pub fn operation_kind_strategy() -> impl Strategy<Value = OperationKind> {
    prop_oneof![
        2 => Just(OperationKind::Create),
        4 => Just(OperationKind::Update),
        1 => Just(OperationKind::Delete),
    ]
}

/// Strategy for entity types.
pub fn entity_type_strategy() -> impl Strategy<Value = EntityType> {
    prop::sample::select(vec![
        EntityType::Book,
        EntityType::Series,
        EntityType::Contributor,
        EntityType::Tag,
        EntityType::Genre,
        EntityType::Shelf,
        EntityType::Lens,
        EntityType::Progress,
        EntityType::ListeningEvent,
        EntityType::ReadingSession,
        EntityType::ActiveSession,
    ])
}

/// Strategy for new queue entries with a JSON body.
pub fn new_operation_strategy() -> impl Strategy<Value = NewOperation> {
    (
        operation_kind_strategy(),
        entity_type_strategy(),
        record_id_strategy(),
        0u64..500_000_000,
    )
        .prop_map(|(kind, entity_type, entity_id, position_ms)| {
            NewOperation::new(kind)
                .with_entity(entity_type, entity_id)
                .with_payload(serde_json::json!({ "positionMs": position_ms }))
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
