//! Connectivity observation.

use tokio::sync::watch;

/// Reports device connectivity and broadcasts transitions.
///
/// The push orchestrator watches for offline-to-online transitions to
/// trigger a flush, and polls [`NetworkMonitor::is_online`] between
/// drain batches to stop early when the connection drops.
pub trait NetworkMonitor: Send + Sync {
    /// Whether the device is online right now.
    fn is_online(&self) -> bool;

    /// Subscribes to connectivity transitions.
    fn watch(&self) -> watch::Receiver<bool>;
}

/// Scriptable connectivity for tests.
pub struct MockNetwork {
    sender: watch::Sender<bool>,
}

impl MockNetwork {
    /// Creates a monitor that starts online.
    pub fn online() -> Self {
        Self::with_state(true)
    }

    /// Creates a monitor that starts offline.
    pub fn offline() -> Self {
        Self::with_state(false)
    }

    /// Creates a monitor with an explicit initial state.
    pub fn with_state(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self { sender }
    }

    /// Flips the connectivity state, waking watchers.
    pub fn set_online(&self, online: bool) {
        self.sender.send_replace(online);
    }
}

impl NetworkMonitor for MockNetwork {
    fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}
