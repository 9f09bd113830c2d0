//! The pull orchestrator: sequences, parallelizes, retries, and heals.

use crate::api::SyncApi;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::progress::{NullObserver, ProgressObserver, ProgressTracker};
use crate::pullers::{ArtworkFetcher, EntityPullers, NoopArtwork, PullOutcome};
use chrono::{DateTime, Utc};
use librarium_store::{
    Book, CheckpointStore, Contributor, EntityType, LibraryStore, RecordStore, Series,
};
use librarium_sync_protocol::SyncManifest;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where the orchestrator currently is in a pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    /// No pull running.
    #[default]
    Idle,
    /// Fetching the manifest.
    FetchingManifest,
    /// Pulling series and contributors, in parallel.
    PullingCatalog,
    /// Pulling books.
    PullingBooks,
    /// Pulling the remaining entity types, sequentially.
    PullingLibraryData,
    /// Re-pulling under-counted entity types.
    SelfHealing,
    /// Writing the checkpoint.
    Finalizing,
}

impl SyncPhase {
    /// Returns true while a pull is running.
    pub fn is_active(&self) -> bool {
        !matches!(self, SyncPhase::Idle)
    }
}

/// Summary of one completed pull.
#[derive(Debug, Clone, Default)]
pub struct PullReport {
    /// Items merged across all phases, excluding self-heal re-pulls.
    pub items_synced: u64,
    /// Items merged per entity type.
    pub items_by_entity: HashMap<EntityType, u64>,
    /// Fresh conflicts detected during this pull.
    pub conflicts_detected: u64,
    /// Entity types that needed a full re-pull after the main pass.
    pub self_heal_repulls: Vec<EntityType>,
    /// Whether the manifest was available for totals and self-heal.
    pub manifest_available: bool,
    /// Non-critical phases that failed, with their error messages.
    pub phase_errors: Vec<(EntityType, String)>,
    /// Wall-clock duration of the pull.
    pub duration: Duration,
}

impl PullReport {
    fn record(&mut self, entity: EntityType, outcome: PullOutcome) {
        *self.items_by_entity.entry(entity).or_insert(0) += outcome.items;
        self.conflicts_detected += outcome.conflicts;
    }
}

/// Pulls server state into local storage.
///
/// One pull moves through `Idle -> FetchingManifest -> PullingCatalog
/// -> PullingBooks -> PullingLibraryData -> SelfHealing -> Finalizing
/// -> Idle`. Series and contributors load before books so book
/// relations never reference missing parents; books load before the
/// independent remainder. The catalog and book phases are critical:
/// they run under the retry policy and abort the pull when they fail.
/// Everything after them is contained: a failure is logged, recorded on
/// the report, and the pull moves on.
pub struct PullOrchestrator<S> {
    api: Arc<dyn SyncApi>,
    store: Arc<S>,
    checkpoints: Arc<dyn CheckpointStore>,
    observer: Arc<dyn ProgressObserver>,
    pullers: EntityPullers<S>,
    config: SyncConfig,
    phase: Mutex<SyncPhase>,
    cancelled: AtomicBool,
}

impl<S: LibraryStore> PullOrchestrator<S> {
    /// Creates an orchestrator with no progress observer and no artwork
    /// fetcher.
    pub fn new(
        api: Arc<dyn SyncApi>,
        store: Arc<S>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: SyncConfig,
    ) -> Self {
        let pullers = EntityPullers::new(
            Arc::clone(&api),
            Arc::clone(&store),
            Arc::new(NoopArtwork),
            config.page_limit,
        );
        Self {
            api,
            store,
            checkpoints,
            observer: Arc::new(NullObserver),
            pullers,
            config,
            phase: Mutex::new(SyncPhase::Idle),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Sets the progress observer.
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Sets the artwork fetcher run after book upserts.
    pub fn with_artwork(mut self, artwork: Arc<dyn ArtworkFetcher>) -> Self {
        self.pullers = EntityPullers::new(
            Arc::clone(&self.api),
            Arc::clone(&self.store),
            artwork,
            self.config.page_limit,
        );
        self
    }

    /// The current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock()
    }

    /// Requests cancellation of the running pull.
    ///
    /// The pull stops at the next phase boundary; the page in flight is
    /// allowed to complete.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Runs a pull, delta when a checkpoint exists, full otherwise.
    pub async fn run(&self) -> SyncResult<PullReport> {
        self.run_inner(false).await
    }

    /// Runs a full pull, ignoring any checkpoint.
    pub async fn run_full(&self) -> SyncResult<PullReport> {
        self.run_inner(true).await
    }

    /// Clears the checkpoint so the next [`PullOrchestrator::run`] syncs
    /// in full.
    pub async fn clear_checkpoint(&self) -> SyncResult<()> {
        self.checkpoints.clear().await?;
        Ok(())
    }

    /// Re-fetches the complete listening history, ignoring the delta
    /// cursor.
    ///
    /// Used after bulk historical imports, whose old timestamps a delta
    /// pull would skip. Independent of the pull state machine. Returns
    /// the number of events received.
    pub async fn refresh_listening_history(&self) -> SyncResult<u64> {
        let tracker = ProgressTracker::new(Arc::clone(&self.observer));
        let phase = tracker.phase(EntityType::ListeningEvent, None);
        let outcome = self.pullers.pull_listening_events(None, &phase).await?;
        info!(events = outcome.items, "listening history refreshed");
        Ok(outcome.items)
    }

    async fn run_inner(&self, force_full: bool) -> SyncResult<PullReport> {
        self.begin()?;
        let result = self.execute(force_full).await;
        self.set_phase(SyncPhase::Idle);
        result
    }

    fn begin(&self) -> SyncResult<()> {
        let mut phase = self.phase.lock();
        if phase.is_active() {
            return Err(SyncError::AlreadyRunning);
        }
        *phase = SyncPhase::FetchingManifest;
        Ok(())
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.lock() = phase;
    }

    fn ensure_not_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn execute(&self, force_full: bool) -> SyncResult<PullReport> {
        let started = Instant::now();
        let pull_started_at = Utc::now();
        self.cancelled.store(false, Ordering::SeqCst);

        let tracker = ProgressTracker::new(Arc::clone(&self.observer));
        let mut report = PullReport::default();

        // Manifest is best-effort: without it, totals and self-heal are
        // skipped but the pull proceeds.
        tracker.manifest();
        let manifest = match self.api.manifest().await {
            Ok(manifest) => {
                tracker.set_total_items(Some(manifest.total()));
                Some(manifest)
            }
            Err(error) => {
                warn!(%error, "manifest unavailable, progress degrades to approximate");
                None
            }
        };
        report.manifest_available = manifest.is_some();

        let updated_after = if force_full {
            None
        } else {
            self.checkpoints.last_synced_at().await?
        };
        debug!(
            delta = updated_after.is_some(),
            "pull strategy determined"
        );

        self.pull_critical_with_retry(&tracker, manifest.as_ref(), updated_after, &mut report)
            .await?;

        self.set_phase(SyncPhase::PullingLibraryData);
        self.pull_library_data(&tracker, manifest.as_ref(), updated_after, &mut report)
            .await?;

        self.set_phase(SyncPhase::SelfHealing);
        if let Some(manifest) = manifest.as_ref() {
            self.self_heal(manifest, &tracker, &mut report).await?;
        }

        self.set_phase(SyncPhase::Finalizing);
        self.ensure_not_cancelled()?;
        tracker.finalizing();
        // The checkpoint is the pull's start time: anything that changed
        // while this pull ran is picked up by the next delta.
        self.checkpoints.set_last_synced_at(pull_started_at).await?;

        report.items_synced = tracker.total_synced();
        report.duration = started.elapsed();
        info!(
            items = report.items_synced,
            conflicts = report.conflicts_detected,
            phase_errors = report.phase_errors.len(),
            "pull complete"
        );
        Ok(report)
    }

    /// Runs the catalog and book phases under the retry policy.
    ///
    /// A transient failure retries the whole sub-sequence rather than
    /// resuming mid-way; upserts are idempotent so replayed pages are
    /// harmless.
    async fn pull_critical_with_retry(
        &self,
        tracker: &ProgressTracker,
        manifest: Option<&SyncManifest>,
        updated_after: Option<DateTime<Utc>>,
        report: &mut PullReport,
    ) -> SyncResult<()> {
        let retry = &self.config.retry;
        let mut last_error: Option<SyncError> = None;

        for attempt in 0..retry.max_attempts {
            if attempt > 0 {
                tracker.retrying(attempt + 1, retry.max_attempts);
                tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
            }
            self.ensure_not_cancelled()?;

            let counter_mark = tracker.checkpoint_counter();
            match self.pull_critical(tracker, manifest, updated_after).await {
                Ok((series, contributors, books)) => {
                    report.record(EntityType::Series, series);
                    report.record(EntityType::Contributor, contributors);
                    report.record(EntityType::Book, books);
                    return Ok(());
                }
                Err(error) if error.is_retryable() && attempt + 1 < retry.max_attempts => {
                    warn!(%error, attempt, "critical pull phase failed, will retry");
                    tracker.restore_counter(counter_mark);
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        Err(last_error
            .unwrap_or_else(|| SyncError::Protocol("no pull attempts were made".into())))
    }

    async fn pull_critical(
        &self,
        tracker: &ProgressTracker,
        manifest: Option<&SyncManifest>,
        updated_after: Option<DateTime<Utc>>,
    ) -> SyncResult<(PullOutcome, PullOutcome, PullOutcome)> {
        self.set_phase(SyncPhase::PullingCatalog);
        let series_phase = tracker.phase(
            EntityType::Series,
            manifest.and_then(|m| m.count_for(EntityType::Series)),
        );
        let contributor_phase = tracker.phase(
            EntityType::Contributor,
            manifest.and_then(|m| m.count_for(EntityType::Contributor)),
        );
        // try_join drops the sibling when either side fails.
        let (series, contributors) = tokio::try_join!(
            self.pullers.pull_series(updated_after, &series_phase),
            self.pullers.pull_contributors(updated_after, &contributor_phase),
        )?;

        self.ensure_not_cancelled()?;
        self.set_phase(SyncPhase::PullingBooks);
        let book_phase = tracker.phase(
            EntityType::Book,
            manifest.and_then(|m| m.count_for(EntityType::Book)),
        );
        let books = self.pullers.pull_books(updated_after, &book_phase).await?;

        Ok((series, contributors, books))
    }

    /// Pulls the non-critical entity types, each failure contained.
    async fn pull_library_data(
        &self,
        tracker: &ProgressTracker,
        manifest: Option<&SyncManifest>,
        updated_after: Option<DateTime<Utc>>,
        report: &mut PullReport,
    ) -> SyncResult<()> {
        self.ensure_not_cancelled()?;
        let phase = tracker.phase(
            EntityType::Tag,
            manifest.and_then(|m| m.count_for(EntityType::Tag)),
        );
        let result = self.pullers.pull_tags(updated_after, &phase).await;
        Self::contain(report, EntityType::Tag, result);

        self.ensure_not_cancelled()?;
        let phase = tracker.phase(
            EntityType::Genre,
            manifest.and_then(|m| m.count_for(EntityType::Genre)),
        );
        let result = self.pullers.pull_genres(updated_after, &phase).await;
        Self::contain(report, EntityType::Genre, result);

        self.ensure_not_cancelled()?;
        let phase = tracker.phase(
            EntityType::Shelf,
            manifest.and_then(|m| m.count_for(EntityType::Shelf)),
        );
        let result = self.pullers.pull_shelves(&phase).await;
        Self::contain(report, EntityType::Shelf, result);

        self.ensure_not_cancelled()?;
        let phase = tracker.phase(
            EntityType::Lens,
            manifest.and_then(|m| m.count_for(EntityType::Lens)),
        );
        let result = self.pullers.pull_lenses(&phase).await;
        Self::contain(report, EntityType::Lens, result);

        self.ensure_not_cancelled()?;
        let phase = tracker.phase(EntityType::Progress, None);
        let result = self.pullers.pull_progress(updated_after, &phase).await;
        Self::contain(report, EntityType::Progress, result);

        self.ensure_not_cancelled()?;
        let phase = tracker.phase(
            EntityType::ListeningEvent,
            manifest.and_then(|m| m.count_for(EntityType::ListeningEvent)),
        );
        let result = self
            .pullers
            .pull_listening_events(updated_after, &phase)
            .await;
        Self::contain(report, EntityType::ListeningEvent, result);

        self.ensure_not_cancelled()?;
        let phase = tracker.phase(EntityType::ActiveSession, None);
        let result = self.pullers.pull_active_sessions(&phase).await;
        Self::contain(report, EntityType::ActiveSession, result);

        self.ensure_not_cancelled()?;
        let phase = tracker.phase(
            EntityType::ReadingSession,
            manifest.and_then(|m| m.count_for(EntityType::ReadingSession)),
        );
        let result = self.pullers.pull_reading_sessions(&phase).await;
        Self::contain(report, EntityType::ReadingSession, result);

        Ok(())
    }

    /// Containment policy for a non-critical phase: log, record, move on.
    fn contain(report: &mut PullReport, entity: EntityType, result: SyncResult<PullOutcome>) {
        match result {
            Ok(outcome) => report.record(entity, outcome),
            Err(error) => {
                warn!(%entity, %error, "non-critical pull phase failed");
                report.phase_errors.push((entity, error.to_string()));
            }
        }
    }

    /// Re-pulls entity types whose local count fell below the manifest.
    ///
    /// Delta pulls cannot see rows whose `updatedAt` predates the
    /// checkpoint, which happens after restores from backup or bulk
    /// server-side rewrites that keep timestamps. A full re-pull closes
    /// the gap.
    async fn self_heal(
        &self,
        manifest: &SyncManifest,
        tracker: &ProgressTracker,
        report: &mut PullReport,
    ) -> SyncResult<()> {
        self.ensure_not_cancelled()?;
        let books = <S as RecordStore<Book>>::count(&self.store).await?;
        if books < manifest.books {
            warn!(
                local = books,
                expected = manifest.books,
                "book count below manifest, re-pulling in full"
            );
            let phase = tracker.self_heal_phase(EntityType::Book);
            let outcome = self.pullers.pull_books(None, &phase).await?;
            report.conflicts_detected += outcome.conflicts;
            report.self_heal_repulls.push(EntityType::Book);
        }

        self.ensure_not_cancelled()?;
        let series = <S as RecordStore<Series>>::count(&self.store).await?;
        if series < manifest.series {
            warn!(
                local = series,
                expected = manifest.series,
                "series count below manifest, re-pulling in full"
            );
            let phase = tracker.self_heal_phase(EntityType::Series);
            let outcome = self.pullers.pull_series(None, &phase).await?;
            report.conflicts_detected += outcome.conflicts;
            report.self_heal_repulls.push(EntityType::Series);
        }

        self.ensure_not_cancelled()?;
        let contributors = <S as RecordStore<Contributor>>::count(&self.store).await?;
        if contributors < manifest.contributors {
            warn!(
                local = contributors,
                expected = manifest.contributors,
                "contributor count below manifest, re-pulling in full"
            );
            let phase = tracker.self_heal_phase(EntityType::Contributor);
            let outcome = self.pullers.pull_contributors(None, &phase).await?;
            report.conflicts_detected += outcome.conflicts;
            report.self_heal_repulls.push(EntityType::Contributor);
        }

        Ok(())
    }
}
