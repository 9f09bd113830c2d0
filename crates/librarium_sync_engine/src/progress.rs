//! Structured progress events surfaced while a pull runs.
//!
//! Each event carries both the current phase's counts and the run-wide
//! aggregate, so a UI can render "Syncing books: 50 of 131" and
//! "Syncing: 180 of 350 items" from the same stream. Totals come from
//! the manifest and are absent when the manifest fetch failed.

use librarium_store::EntityType;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What the engine is doing when a progress event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    /// Fetching the sync manifest.
    Manifest,
    /// Pulling one entity type.
    Pulling(EntityType),
    /// Re-pulling an under-counted entity type in full.
    SelfHeal(EntityType),
    /// Waiting out a backoff delay before retrying the critical phases.
    Retrying {
        /// The attempt about to run, 1-indexed.
        attempt: u32,
        /// Total attempts allowed.
        max_attempts: u32,
    },
    /// Writing the checkpoint and wrapping up.
    Finalizing,
}

/// One progress event.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncProgress {
    /// Current phase.
    pub phase: ProgressPhase,
    /// Items merged so far within this phase.
    pub phase_items_synced: u64,
    /// Manifest-reported total for this phase, when known.
    pub phase_total_items: Option<u64>,
    /// Items merged so far across the whole run.
    pub total_items_synced: u64,
    /// Manifest-reported total across all entity types, when known.
    pub total_items: Option<u64>,
    /// Human-readable progress message.
    pub message: String,
}

/// Receives progress events during a pull.
pub trait ProgressObserver: Send + Sync {
    /// Called for every progress event, in order.
    fn on_progress(&self, progress: &SyncProgress);
}

/// Observer that discards every event.
pub struct NullObserver;

impl ProgressObserver for NullObserver {
    fn on_progress(&self, _progress: &SyncProgress) {}
}

/// Observer that records every event, for tests.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<SyncProgress>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All events received so far.
    pub fn events(&self) -> Vec<SyncProgress> {
        self.events.lock().clone()
    }

    /// The messages of all events received so far.
    pub fn messages(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.message.clone()).collect()
    }

    /// The last event received, if any.
    pub fn last(&self) -> Option<SyncProgress> {
        self.events.lock().last().cloned()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_progress(&self, progress: &SyncProgress) {
        self.events.lock().push(progress.clone());
    }
}

/// Accumulates the run-wide item count and fans events out to the observer.
///
/// Phase handles update the shared counter atomically, which keeps the
/// aggregate correct when the series and contributors phases run in
/// parallel.
pub struct ProgressTracker {
    observer: Arc<dyn ProgressObserver>,
    total_synced: AtomicU64,
    total_items: Mutex<Option<u64>>,
}

impl ProgressTracker {
    /// Creates a tracker reporting to `observer`.
    pub fn new(observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            observer,
            total_synced: AtomicU64::new(0),
            total_items: Mutex::new(None),
        }
    }

    /// Sets the run-wide total once the manifest is in.
    pub fn set_total_items(&self, total: Option<u64>) {
        *self.total_items.lock() = total;
    }

    /// Items merged so far across the whole run.
    pub fn total_synced(&self) -> u64 {
        self.total_synced.load(Ordering::SeqCst)
    }

    /// Captures the aggregate counter, so a retry can roll it back.
    pub fn checkpoint_counter(&self) -> u64 {
        self.total_synced.load(Ordering::SeqCst)
    }

    /// Rolls the aggregate counter back to a captured value.
    pub fn restore_counter(&self, value: u64) {
        self.total_synced.store(value, Ordering::SeqCst);
    }

    /// Emits the manifest-fetch event.
    pub fn manifest(&self) {
        self.emit(
            ProgressPhase::Manifest,
            0,
            None,
            "Checking library contents...".to_owned(),
        );
    }

    /// Emits a retry notification for the critical phases.
    pub fn retrying(&self, attempt: u32, max_attempts: u32) {
        self.emit(
            ProgressPhase::Retrying {
                attempt,
                max_attempts,
            },
            0,
            None,
            format!("Retrying, attempt {attempt} of {max_attempts}"),
        );
    }

    /// Emits the finalizing event.
    pub fn finalizing(&self) {
        self.emit(
            ProgressPhase::Finalizing,
            0,
            None,
            "Finishing up...".to_owned(),
        );
    }

    /// Opens a counted phase for one entity type.
    pub fn phase(&self, entity: EntityType, phase_total: Option<u64>) -> PhaseProgress<'_> {
        PhaseProgress {
            tracker: self,
            entity,
            phase_total,
            phase_synced: AtomicU64::new(0),
            healing: false,
        }
    }

    /// Opens a self-heal phase.
    ///
    /// Self-heal re-fetches rows the run already counted, so its items
    /// do not feed the aggregate counter.
    pub fn self_heal_phase(&self, entity: EntityType) -> PhaseProgress<'_> {
        PhaseProgress {
            tracker: self,
            entity,
            phase_total: None,
            phase_synced: AtomicU64::new(0),
            healing: true,
        }
    }

    fn emit(
        &self,
        phase: ProgressPhase,
        phase_synced: u64,
        phase_total: Option<u64>,
        message: String,
    ) {
        let progress = SyncProgress {
            phase,
            phase_items_synced: phase_synced,
            phase_total_items: phase_total,
            total_items_synced: self.total_synced.load(Ordering::SeqCst),
            total_items: *self.total_items.lock(),
            message,
        };
        self.observer.on_progress(&progress);
    }
}

/// Progress handle scoped to one entity phase.
pub struct PhaseProgress<'a> {
    tracker: &'a ProgressTracker,
    entity: EntityType,
    phase_total: Option<u64>,
    phase_synced: AtomicU64,
    healing: bool,
}

impl PhaseProgress<'_> {
    /// The entity type this phase is pulling.
    pub fn entity(&self) -> EntityType {
        self.entity
    }

    /// Items merged within this phase so far.
    pub fn items(&self) -> u64 {
        self.phase_synced.load(Ordering::SeqCst)
    }

    /// Announces that page `page` (1-indexed) is being fetched.
    pub fn page(&self, page: u32) {
        let message = format!("Syncing {} (page {page})...", self.entity.display_name());
        self.emit(message);
    }

    /// Records `count` merged items and emits an updated event.
    pub fn add(&self, count: u64) {
        self.phase_synced.fetch_add(count, Ordering::SeqCst);
        if !self.healing {
            self.tracker.total_synced.fetch_add(count, Ordering::SeqCst);
        }

        let synced = self.items();
        let message = match self.phase_total {
            Some(total) => format!(
                "Syncing {}: {synced} of {total}",
                self.entity.display_name()
            ),
            None => {
                let total_synced = self.tracker.total_synced();
                match *self.tracker.total_items.lock() {
                    Some(total) => format!("Syncing: {total_synced} of {total} items"),
                    None => format!("Syncing {}: {synced}", self.entity.display_name()),
                }
            }
        };
        self.emit(message);
    }

    fn emit(&self, message: String) {
        let phase = if self.healing {
            ProgressPhase::SelfHeal(self.entity)
        } else {
            ProgressPhase::Pulling(self.entity)
        };
        self.tracker.emit(phase, self.items(), self.phase_total, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with_recorder() -> (Arc<RecordingObserver>, ProgressTracker) {
        let observer = Arc::new(RecordingObserver::new());
        let tracker = ProgressTracker::new(observer.clone() as Arc<dyn ProgressObserver>);
        (observer, tracker)
    }

    #[test]
    fn phase_counts_feed_aggregate() {
        let (observer, tracker) = tracker_with_recorder();
        tracker.set_total_items(Some(350));

        let books = tracker.phase(EntityType::Book, Some(131));
        books.add(50);

        let last = observer.last().unwrap();
        assert_eq!(last.phase, ProgressPhase::Pulling(EntityType::Book));
        assert_eq!(last.phase_items_synced, 50);
        assert_eq!(last.phase_total_items, Some(131));
        assert_eq!(last.total_items_synced, 50);
        assert_eq!(last.total_items, Some(350));
        assert_eq!(last.message, "Syncing books: 50 of 131");

        let series = tracker.phase(EntityType::Series, Some(10));
        series.add(10);
        assert_eq!(observer.last().unwrap().total_items_synced, 60);
    }

    #[test]
    fn page_message_format() {
        let (observer, tracker) = tracker_with_recorder();
        let books = tracker.phase(EntityType::Book, None);
        books.page(2);
        assert_eq!(observer.last().unwrap().message, "Syncing books (page 2)...");
    }

    #[test]
    fn aggregate_message_without_phase_total() {
        let (observer, tracker) = tracker_with_recorder();
        tracker.set_total_items(Some(350));

        let events = tracker.phase(EntityType::ListeningEvent, None);
        events.add(180);
        assert_eq!(
            observer.last().unwrap().message,
            "Syncing: 180 of 350 items"
        );
    }

    #[test]
    fn message_degrades_without_manifest() {
        let (observer, tracker) = tracker_with_recorder();

        let tags = tracker.phase(EntityType::Tag, None);
        tags.add(3);
        assert_eq!(observer.last().unwrap().message, "Syncing tags: 3");
    }

    #[test]
    fn self_heal_does_not_inflate_aggregate() {
        let (_observer, tracker) = tracker_with_recorder();

        let books = tracker.phase(EntityType::Book, Some(100));
        books.add(100);
        assert_eq!(tracker.total_synced(), 100);

        let heal = tracker.self_heal_phase(EntityType::Book);
        heal.add(100);
        assert_eq!(tracker.total_synced(), 100);
        assert_eq!(heal.items(), 100);
    }

    #[test]
    fn retrying_event() {
        let (observer, tracker) = tracker_with_recorder();
        tracker.retrying(2, 3);

        let last = observer.last().unwrap();
        assert_eq!(
            last.phase,
            ProgressPhase::Retrying {
                attempt: 2,
                max_attempts: 3
            }
        );
        assert_eq!(last.message, "Retrying, attempt 2 of 3");
    }

    #[test]
    fn counter_checkpoint_restore() {
        let (_observer, tracker) = tracker_with_recorder();
        let books = tracker.phase(EntityType::Book, None);
        books.add(40);

        let mark = tracker.checkpoint_counter();
        books.add(20);
        assert_eq!(tracker.total_synced(), 60);

        tracker.restore_counter(mark);
        assert_eq!(tracker.total_synced(), 40);
    }
}
