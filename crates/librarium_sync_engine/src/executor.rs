//! Delivery of queued local operations to the server.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use librarium_store::PendingOperation;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Per-operation outcomes of one delivered batch.
///
/// Operations absent from the map were applied. A batch endpoint
/// reports the rejects and stays silent about the rest.
pub type BatchOutcome = HashMap<Uuid, SyncResult<()>>;

/// Sends batches of pending operations to the server.
///
/// Delivery is last-write-wins: the server applies whatever the batch
/// carries, newest state replacing older state. Outcomes are
/// per-operation so one rejected edit does not sink its batch.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    /// Delivers one batch.
    ///
    /// An `Err` means the batch never landed (transport failure): the
    /// caller should stop flushing and not charge the operations an
    /// attempt. Individual server-side rejections come back as `Err`
    /// entries inside the outcome map and do count as attempts.
    async fn execute(&self, batch: &[PendingOperation]) -> SyncResult<BatchOutcome>;
}

/// Scriptable in-memory executor for tests.
///
/// Rejections are keyed by the operation's entity ID because queue IDs
/// are assigned at enqueue time, after a test script is written.
#[derive(Default)]
pub struct MockExecutor {
    rejections: Mutex<HashMap<String, String>>,
    transport_failures: Mutex<VecDeque<SyncError>>,
    batches: Mutex<Vec<Vec<Uuid>>>,
}

impl MockExecutor {
    /// Creates an executor that applies everything it is given.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every operation targeting the given entity ID.
    pub fn reject(&self, entity_id: impl Into<String>, message: impl Into<String>) {
        self.rejections
            .lock()
            .insert(entity_id.into(), message.into());
    }

    /// Stops rejecting the given entity ID.
    pub fn accept(&self, entity_id: &str) {
        self.rejections.lock().remove(entity_id);
    }

    /// Makes the next [`OperationExecutor::execute`] call fail
    /// wholesale with the given error.
    pub fn fail_next(&self, error: SyncError) {
        self.transport_failures.lock().push_back(error);
    }

    /// The operation IDs of every batch received, including batches
    /// that then failed in transport.
    pub fn batches(&self) -> Vec<Vec<Uuid>> {
        self.batches.lock().clone()
    }

    /// Total operations received across all batches.
    pub fn received_count(&self) -> usize {
        self.batches.lock().iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl OperationExecutor for MockExecutor {
    async fn execute(&self, batch: &[PendingOperation]) -> SyncResult<BatchOutcome> {
        self.batches
            .lock()
            .push(batch.iter().map(|op| op.id).collect());

        if let Some(error) = self.transport_failures.lock().pop_front() {
            return Err(error);
        }

        let rejections = self.rejections.lock();
        let mut outcome = BatchOutcome::new();
        for op in batch {
            let rejected = op
                .entity_id
                .as_deref()
                .and_then(|id| rejections.get(id));
            if let Some(message) = rejected {
                outcome.insert(op.id, Err(SyncError::server(422, message.clone())));
            }
        }
        Ok(outcome)
    }
}
