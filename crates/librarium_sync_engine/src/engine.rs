//! The engine facade: one handle over pull, push and live events.

use crate::api::SyncApi;
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::executor::OperationExecutor;
use crate::live::{LiveApplyOutcome, LiveEventApplier, SyncMutex};
use crate::network::NetworkMonitor;
use crate::progress::ProgressObserver;
use crate::pull::{PullOrchestrator, PullReport, SyncPhase};
use crate::pullers::ArtworkFetcher;
use crate::push::{PushOrchestrator, PushReport};
use librarium_store::{CheckpointStore, LibraryStore, OperationQueue};
use librarium_sync_protocol::ServerEvent;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Result of one full sync cycle.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// What the pull half did.
    pub pull: PullReport,
    /// What the push half did.
    pub push: PushReport,
    /// Wall-clock duration of the whole cycle.
    pub duration: Duration,
}

/// One handle over the whole sync surface.
///
/// A cycle is pull-then-push: the server's changes land first, then
/// queued local operations go up. Between cycles, live server events
/// apply through [`SyncEngine::apply_events`] and enqueued operations
/// flush through the background triggers.
pub struct SyncEngine<S> {
    pull: PullOrchestrator<S>,
    push: Arc<PushOrchestrator>,
    live: LiveEventApplier<S>,
}

impl<S: LibraryStore> SyncEngine<S> {
    /// Wires an engine from its collaborators.
    pub fn new(
        api: Arc<dyn SyncApi>,
        store: Arc<S>,
        queue: Arc<dyn OperationQueue>,
        executor: Arc<dyn OperationExecutor>,
        checkpoints: Arc<dyn CheckpointStore>,
        network: Arc<dyn NetworkMonitor>,
        config: SyncConfig,
    ) -> Self {
        let mutex = Arc::new(SyncMutex::new());
        let pull = PullOrchestrator::new(api, Arc::clone(&store), checkpoints, config.clone());
        let push = Arc::new(PushOrchestrator::new(
            queue,
            executor,
            network,
            Arc::clone(&mutex),
            config,
        ));
        let live = LiveEventApplier::new(store, mutex);
        Self { pull, push, live }
    }

    /// Sets the progress observer for pulls.
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.pull = self.pull.with_observer(observer);
        self
    }

    /// Sets the artwork fetcher used after book upserts, on both the
    /// pull path and the live event path.
    pub fn with_artwork(mut self, artwork: Arc<dyn ArtworkFetcher>) -> Self {
        self.pull = self.pull.with_artwork(Arc::clone(&artwork));
        self.live = self.live.with_artwork(artwork);
        self
    }

    /// Runs one sync cycle: pull, then flush the operation queue.
    pub async fn sync(&self) -> SyncResult<SyncCycleResult> {
        let started = Instant::now();
        let pull = self.pull.run().await?;
        let push = self.push.flush().await?;
        Ok(SyncCycleResult {
            pull,
            push,
            duration: started.elapsed(),
        })
    }

    /// Pulls server state, delta when a checkpoint exists.
    pub async fn pull(&self) -> SyncResult<PullReport> {
        self.pull.run().await
    }

    /// Pulls everything, ignoring the checkpoint.
    pub async fn pull_full(&self) -> SyncResult<PullReport> {
        self.pull.run_full().await
    }

    /// Flushes the pending operation queue.
    pub async fn flush(&self) -> SyncResult<PushReport> {
        self.push.flush().await
    }

    /// Applies a batch of live server events.
    pub async fn apply_events(&self, events: Vec<ServerEvent>) -> SyncResult<LiveApplyOutcome> {
        self.live.apply(events).await
    }

    /// Re-fetches the complete listening history.
    pub async fn refresh_listening_history(&self) -> SyncResult<u64> {
        self.pull.refresh_listening_history().await
    }

    /// Clears the delta checkpoint so the next pull is full.
    pub async fn clear_checkpoint(&self) -> SyncResult<()> {
        self.pull.clear_checkpoint().await
    }

    /// The pull state machine's current phase.
    pub fn phase(&self) -> SyncPhase {
        self.pull.phase()
    }

    /// Requests cancellation of the running pull.
    pub fn cancel(&self) {
        self.pull.cancel();
    }

    /// Spawns the background flush triggers (reconnect, enqueue).
    pub fn spawn_push_triggers(&self) -> JoinHandle<()> {
        self.push.spawn_triggers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockApi;
    use crate::executor::MockExecutor;
    use crate::network::MockNetwork;
    use chrono::{TimeZone, Utc};
    use librarium_store::{
        Book, EntityType, MemoryCheckpointStore, MemoryQueue, MemoryStore, NewOperation,
        OperationKind, RecordStore,
    };
    use librarium_sync_protocol::BookPayload;

    struct Fixture {
        api: Arc<MockApi>,
        store: Arc<MemoryStore>,
        queue: Arc<MemoryQueue>,
        engine: SyncEngine<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let api = Arc::new(MockApi::new());
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let engine = SyncEngine::new(
            api.clone() as Arc<dyn SyncApi>,
            store.clone(),
            queue.clone() as Arc<dyn OperationQueue>,
            Arc::new(MockExecutor::new()) as Arc<dyn OperationExecutor>,
            Arc::new(MemoryCheckpointStore::new()) as Arc<dyn CheckpointStore>,
            Arc::new(MockNetwork::online()) as Arc<dyn NetworkMonitor>,
            SyncConfig::new(),
        );
        Fixture {
            api,
            store,
            queue,
            engine,
        }
    }

    #[tokio::test]
    async fn cycle_pulls_then_drains_queue() {
        let fx = fixture();
        fx.api.books.script_pages(
            vec![BookPayload::new(
                "b1",
                "Excession",
                Utc.timestamp_opt(100, 0).unwrap(),
            )],
            100,
        );
        fx.queue
            .enqueue(NewOperation::new(OperationKind::Update).with_entity(EntityType::Book, "b2"))
            .await
            .unwrap();

        let cycle = fx.engine.sync().await.unwrap();

        assert_eq!(cycle.pull.items_synced, 1);
        assert_eq!(cycle.push.succeeded, 1);
        assert_eq!(RecordStore::<Book>::count(&*fx.store).await.unwrap(), 1);
        assert_eq!(fx.queue.stats().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn live_events_flow_through_facade() {
        let fx = fixture();

        let outcome = fx
            .engine
            .apply_events(vec![ServerEvent::BookChanged(BookPayload::new(
                "b1",
                "Inversions",
                Utc.timestamp_opt(10, 0).unwrap(),
            ))])
            .await
            .unwrap();

        assert_eq!(outcome.applied, 1);
        assert_eq!(RecordStore::<Book>::count(&*fx.store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn idle_engine_reports_idle_phase() {
        let fx = fixture();
        assert_eq!(fx.engine.phase(), SyncPhase::Idle);
        assert!(!fx.engine.phase().is_active());
    }
}
