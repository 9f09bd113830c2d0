//! The push orchestrator: drains pending local operations.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::executor::OperationExecutor;
use crate::live::SyncMutex;
use crate::network::NetworkMonitor;
use librarium_store::{OperationQueue, PendingOperation};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Summary of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Operations delivered to the executor.
    pub attempted: u64,
    /// Operations acknowledged and removed from the queue.
    pub succeeded: u64,
    /// Operations rejected by the server and charged an attempt.
    pub failed: u64,
    /// Batches delivered without transport failure.
    pub batches: u32,
    /// True when another flush was already running and this call did
    /// nothing.
    pub skipped: bool,
    /// True when the flush stopped before the queue drained, because
    /// the device was offline or a batch failed in transport.
    pub stopped: bool,
}

/// Pushes queued local mutations to the server.
///
/// A flush drains the queue in creation order, one batch at a time,
/// until a batch comes back empty. Exactly one flush runs at a time;
/// re-entrant calls return immediately as skipped. The whole drain
/// holds the [`SyncMutex`] so live event application cannot interleave
/// with it.
pub struct PushOrchestrator {
    queue: Arc<dyn OperationQueue>,
    executor: Arc<dyn OperationExecutor>,
    network: Arc<dyn NetworkMonitor>,
    mutex: Arc<SyncMutex>,
    batch_size: usize,
    is_flushing: AtomicBool,
    recovered: AtomicBool,
}

impl PushOrchestrator {
    /// Creates a push orchestrator around its collaborators.
    pub fn new(
        queue: Arc<dyn OperationQueue>,
        executor: Arc<dyn OperationExecutor>,
        network: Arc<dyn NetworkMonitor>,
        mutex: Arc<SyncMutex>,
        config: SyncConfig,
    ) -> Self {
        Self {
            queue,
            executor,
            network,
            mutex,
            batch_size: config.push_batch_size,
            is_flushing: AtomicBool::new(false),
            recovered: AtomicBool::new(false),
        }
    }

    /// Whether a flush is currently running.
    pub fn is_flushing(&self) -> bool {
        self.is_flushing.load(Ordering::SeqCst)
    }

    /// Flushes the queue.
    pub async fn flush(&self) -> SyncResult<PushReport> {
        if self.is_flushing.swap(true, Ordering::SeqCst) {
            debug!("flush already running, skipping");
            return Ok(PushReport {
                skipped: true,
                ..Default::default()
            });
        }
        let result = self.flush_inner().await;
        self.is_flushing.store(false, Ordering::SeqCst);
        result
    }

    /// Spawns the background task that flushes whenever connectivity
    /// returns or a new operation is enqueued while online.
    ///
    /// The task ends when the network monitor or the queue goes away.
    pub fn spawn_triggers(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut online = this.network.watch();
            let mut enqueued = this.queue.subscribe();
            let mut was_online = *online.borrow();

            loop {
                tokio::select! {
                    changed = online.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let now_online = *online.borrow_and_update();
                        if now_online && !was_online {
                            debug!("connectivity restored, flushing");
                            if let Err(error) = this.flush().await {
                                warn!(%error, "reconnect flush failed");
                            }
                        }
                        was_online = now_online;
                    }
                    id = enqueued.recv() => {
                        match id {
                            Some(_) if this.network.is_online() => {
                                if let Err(error) = this.flush().await {
                                    warn!(%error, "enqueue flush failed");
                                }
                            }
                            // Offline: the reconnect branch will flush.
                            Some(_) => {}
                            None => break,
                        }
                    }
                }
            }
        })
    }

    async fn flush_inner(&self) -> SyncResult<PushReport> {
        let mut report = PushReport::default();

        if !self.network.is_online() {
            debug!("offline, not flushing");
            report.stopped = true;
            return Ok(report);
        }

        // One-time recovery: operations stranded in-progress by a
        // previous process return to pending before the first drain.
        if !self.recovered.swap(true, Ordering::SeqCst) {
            let reset = self.queue.reset_stuck_operations().await?;
            if reset > 0 {
                info!(reset, "returned stranded operations to pending");
            }
        }

        let _guard = self.mutex.lock().await;
        let mut attempted: HashSet<Uuid> = HashSet::new();

        loop {
            if !self.network.is_online() {
                debug!("connection dropped, stopping flush");
                report.stopped = true;
                break;
            }

            // Over-fetch to skim past operations already attempted in
            // this flush; a failure below the retry cap puts its
            // operation back at the front of the pending order.
            let batch: Vec<PendingOperation> = self
                .queue
                .next_batch(self.batch_size + attempted.len())
                .await?
                .into_iter()
                .filter(|op| !attempted.contains(&op.id))
                .take(self.batch_size)
                .collect();
            if batch.is_empty() {
                break;
            }

            let ids: Vec<Uuid> = batch.iter().map(|op| op.id).collect();
            attempted.extend(ids.iter().copied());
            self.queue.mark_in_progress(&ids).await?;

            match self.executor.execute(&batch).await {
                Ok(outcomes) => {
                    report.batches += 1;
                    report.attempted += batch.len() as u64;

                    let mut completed = Vec::new();
                    for op in &batch {
                        match outcomes.get(&op.id) {
                            Some(Err(error)) => {
                                report.failed += 1;
                                self.queue.mark_failed(op.id, &error.to_string()).await?;
                            }
                            _ => completed.push(op.id),
                        }
                    }
                    report.succeeded += completed.len() as u64;
                    if !completed.is_empty() {
                        self.queue.mark_completed(&completed).await?;
                    }
                }
                Err(error) => {
                    // The batch never landed: put it back without
                    // charging an attempt and let the reconnect trigger
                    // resume later.
                    warn!(%error, "push batch failed in transport, stopping flush");
                    self.queue.reset_stuck_operations().await?;
                    report.stopped = true;
                    break;
                }
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                failed = report.failed,
                batches = report.batches,
                "flush complete"
            );
        }
        Ok(report)
    }
}
