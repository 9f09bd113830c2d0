//! Persisted sync checkpoint.
//!
//! The checkpoint is the "last successful sync" timestamp. Its
//! presence selects delta sync; clearing it forces the next pull to
//! fetch everything.

use crate::error::StoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Storage for the delta-sync checkpoint.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns the last successful sync time, if any.
    async fn last_synced_at(&self) -> StoreResult<Option<DateTime<Utc>>>;

    /// Records a successful sync at the given time.
    async fn set_last_synced_at(&self, at: DateTime<Utc>) -> StoreResult<()>;

    /// Clears the checkpoint, forcing the next pull to be full.
    async fn clear(&self) -> StoreResult<()>;
}

/// In-memory checkpoint store for tests.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryCheckpointStore {
    /// Creates an empty checkpoint store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn last_synced_at(&self) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(*self.inner.lock())
    }

    async fn set_last_synced_at(&self, at: DateTime<Utc>) -> StoreResult<()> {
        *self.inner.lock() = Some(at);
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        *self.inner.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn checkpoint_lifecycle() {
        let store = MemoryCheckpointStore::new();
        assert_eq!(store.last_synced_at().await.unwrap(), None);

        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        store.set_last_synced_at(at).await.unwrap();
        assert_eq!(store.last_synced_at().await.unwrap(), Some(at));

        store.clear().await.unwrap();
        assert_eq!(store.last_synced_at().await.unwrap(), None);
    }
}
