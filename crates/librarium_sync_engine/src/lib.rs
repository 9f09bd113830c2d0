//! # Librarium Sync Engine
//!
//! Offline-first bidirectional sync for a personal media library.
//!
//! This crate provides:
//! - Pull orchestration (manifest, parallel catalog phase, paged
//!   deltas, self-healing full re-pulls)
//! - Push orchestration (batched queue drain with a retry cap and
//!   reconnect triggers)
//! - Conflict detection (local edits are preserved, never merged away)
//! - Live server event application
//! - Progress observation for a sync status UI
//!
//! ## Architecture
//!
//! The engine implements a **pull-then-push** synchronization model:
//! 1. Pull remote changes first (the server's records are the baseline)
//! 2. Conflict-check and merge them into local storage
//! 3. Push queued local operations to the server
//!
//! Pulls walk a fixed phase sequence so referential parents always land
//! before their dependents: series and contributors (in parallel), then
//! books, then the independent library data. Between full cycles, live
//! server events apply immediately and enqueued local operations flush
//! in the background.
//!
//! ## Key Invariants
//!
//! - A pull never overwrites a record with unsynced local edits; a
//!   colliding server write parks the record as a conflict instead
//! - Server deletions apply regardless of conflict state
//! - The delta checkpoint advances only after a fully successful pull,
//!   and is set to the pull's start time
//! - At most one pull and one flush run at a time, and a flush never
//!   interleaves with live event application
//! - The manifest is advisory: totals and self-healing use it, but
//!   record existence always comes from the entity endpoints

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod config;
mod conflict;
mod engine;
mod error;
mod executor;
mod live;
mod network;
mod progress;
mod pull;
mod pullers;
mod push;

pub use api::{MockApi, ScriptedEvents, ScriptedPages, ScriptedSnapshot, SyncApi};
pub use config::{RetryConfig, SyncConfig};
pub use conflict::ConflictDetector;
pub use engine::{SyncCycleResult, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use executor::{BatchOutcome, MockExecutor, OperationExecutor};
pub use live::{LiveApplyOutcome, LiveEventApplier, SyncGuard, SyncMutex};
pub use network::{MockNetwork, NetworkMonitor};
pub use progress::{
    NullObserver, PhaseProgress, ProgressObserver, ProgressPhase, ProgressTracker,
    RecordingObserver, SyncProgress,
};
pub use pull::{PullOrchestrator, PullReport, SyncPhase};
pub use pullers::{ArtworkFetcher, EntityPullers, MockArtwork, NoopArtwork, PullOutcome};
pub use push::{PushOrchestrator, PushReport};
