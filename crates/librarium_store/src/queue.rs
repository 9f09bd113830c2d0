//! The pending operation queue contract.
//!
//! Every local mutation enqueues a [`PendingOperation`]; the push
//! orchestrator drains them in creation order. Success removes the
//! row; failure keeps it with an incremented attempt count until the
//! retry cap parks it in [`OperationStatus::Failed`] for manual retry.

use crate::error::StoreResult;
use crate::meta::EntityType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Attempts after which an operation is parked as failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// What a pending operation does on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    /// Create a new entity.
    Create,
    /// Update an existing entity.
    Update,
    /// Delete an entity.
    Delete,
}

impl OperationKind {
    /// Stable identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

/// Queue lifecycle state of a pending operation. Success is terminal
/// and removes the row, so it has no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationStatus {
    /// Waiting to be pushed.
    Pending,
    /// Currently part of an executing batch.
    InProgress,
    /// Exceeded the retry cap; waiting for manual retry or dismissal.
    Failed,
}

impl OperationStatus {
    /// Stable identifier, e.g. for a database column.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::InProgress => "in_progress",
            OperationStatus::Failed => "failed",
        }
    }

    /// Parses a stable identifier back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OperationStatus::Pending),
            "in_progress" => Some(OperationStatus::InProgress),
            "failed" => Some(OperationStatus::Failed),
            _ => None,
        }
    }
}

/// A locally-originated mutation waiting to reach the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Queue-assigned identifier.
    pub id: Uuid,
    /// What the operation does.
    pub kind: OperationKind,
    /// Entity type the operation targets, if it targets one.
    pub entity_type: Option<EntityType>,
    /// Entity ID the operation targets, if it targets one.
    pub entity_id: Option<String>,
    /// Request body, opaque to the queue.
    pub payload: serde_json::Value,
    /// Groups operations that must travel in the same request.
    pub batch_key: Option<String>,
    /// Queue lifecycle state.
    pub status: OperationStatus,
    /// When the operation was enqueued. Drives drain order.
    pub created_at: DateTime<Utc>,
    /// Last time the queue row changed.
    pub updated_at: DateTime<Utc>,
    /// Failed push attempts so far.
    pub attempt_count: u32,
    /// Error from the most recent failed attempt.
    pub last_error: Option<String>,
}

/// The caller-supplied part of a new queue entry. The queue assigns
/// identity, timestamps and status on enqueue.
#[derive(Debug, Clone)]
pub struct NewOperation {
    /// What the operation does.
    pub kind: OperationKind,
    /// Entity type the operation targets.
    pub entity_type: Option<EntityType>,
    /// Entity ID the operation targets.
    pub entity_id: Option<String>,
    /// Request body.
    pub payload: serde_json::Value,
    /// Batch grouping key.
    pub batch_key: Option<String>,
}

impl NewOperation {
    /// Creates a new operation of the given kind.
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            entity_type: None,
            entity_id: None,
            payload: serde_json::Value::Null,
            batch_key: None,
        }
    }

    /// Sets the target entity.
    pub fn with_entity(mut self, entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type);
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Sets the request body.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Sets the batch grouping key.
    pub fn with_batch_key(mut self, key: impl Into<String>) -> Self {
        self.batch_key = Some(key.into());
        self
    }
}

/// Counts per queue state, for surfacing in a sync status screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Operations waiting to be pushed.
    pub pending: u64,
    /// Operations in an executing batch.
    pub in_progress: u64,
    /// Operations parked after exceeding the retry cap.
    pub failed: u64,
}

impl QueueStats {
    /// Total queued operations in any state.
    pub fn total(&self) -> u64 {
        self.pending + self.in_progress + self.failed
    }
}

/// The durable, ordered queue of not-yet-acknowledged local mutations.
#[async_trait]
pub trait OperationQueue: Send + Sync {
    /// Appends an operation and notifies subscribers. Returns the
    /// stored row.
    async fn enqueue(&self, op: NewOperation) -> StoreResult<PendingOperation>;

    /// Returns up to `limit` pending operations in creation order.
    async fn next_batch(&self, limit: usize) -> StoreResult<Vec<PendingOperation>>;

    /// Marks the given operations as part of an executing batch.
    async fn mark_in_progress(&self, ids: &[Uuid]) -> StoreResult<()>;

    /// Removes the given operations. Success is terminal.
    async fn mark_completed(&self, ids: &[Uuid]) -> StoreResult<()>;

    /// Records a failed attempt. Below the retry cap the operation
    /// returns to pending with the raw error; at the cap it is parked
    /// as failed and the message is prefixed with
    /// `"Max retries exceeded: "`.
    async fn mark_failed(&self, id: Uuid, error: &str) -> StoreResult<()>;

    /// Returns operations stranded in-progress (e.g. by a crash
    /// mid-flush) to pending. Returns how many were reset.
    async fn reset_stuck_operations(&self) -> StoreResult<u64>;

    /// Returns a failed operation to pending with a fresh attempt
    /// budget, and notifies subscribers so a flush can pick it up.
    /// A no-op when the operation is not in the failed state.
    async fn retry_failed(&self, id: Uuid) -> StoreResult<()>;

    /// Counts operations per state.
    async fn stats(&self) -> StoreResult<QueueStats>;

    /// Subscribes to enqueue notifications. Each message carries the
    /// new operation's ID.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Uuid>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_roundtrip() {
        for status in [
            OperationStatus::Pending,
            OperationStatus::InProgress,
            OperationStatus::Failed,
        ] {
            assert_eq!(OperationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OperationStatus::parse("completed"), None);
    }

    #[test]
    fn new_operation_builder() {
        let op = NewOperation::new(OperationKind::Update)
            .with_entity(EntityType::Book, "book-1")
            .with_payload(serde_json::json!({"title": "Dune"}))
            .with_batch_key("book-1");

        assert_eq!(op.kind, OperationKind::Update);
        assert_eq!(op.entity_type, Some(EntityType::Book));
        assert_eq!(op.entity_id.as_deref(), Some("book-1"));
        assert_eq!(op.batch_key.as_deref(), Some("book-1"));
        assert_eq!(op.payload["title"], "Dune");
    }

    #[test]
    fn stats_total() {
        let stats = QueueStats {
            pending: 3,
            in_progress: 1,
            failed: 2,
        };
        assert_eq!(stats.total(), 6);
    }
}
