//! Idle events and player callbacks
//!
//! The core raises single-bit wakeups on a shared bus; clients re-read
//! state on receipt. The bus is a thin wrapper over a broadcast channel so
//! any number of protocol connections can subscribe.
//!
//! The [`PlayerListener`] capability is the narrow back-edge from the
//! player thread to whoever owns the song queue; it must outlive the
//! player.

use serde::Serialize;
use tokio::sync::broadcast;

/// Single-bit wakeups for protocol clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleEvent {
    /// Player state, current song or song tags changed.
    Player,

    /// Cross-fade parameters changed.
    Options,
}

/// One-to-many event broadcasting for idle wakeups.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IdleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IdleEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Emit an event; `Err` when there are no subscribers.
    pub fn emit(&self, event: IdleEvent) -> Result<usize, broadcast::error::SendError<IdleEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case. Safe to call from
    /// worker threads; never blocks.
    pub fn emit_lossy(&self, event: IdleEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(64)
    }
}

/// Callbacks from the player thread to the queue owner.
///
/// All methods are invoked from the player thread with no core lock held;
/// implementations may call back into the player.
pub trait PlayerListener: Send + Sync {
    /// Playback finished a song or stopped; the queue should synchronize
    /// (e.g. advance and enqueue the next song).
    fn on_sync(&self) {}

    /// The decoder updated the current song's tags; the queue can fetch
    /// the copy with `read_tagged_song`.
    fn on_tag_modified(&self) {}

    /// The player auto-paused at a song border.
    fn on_border_pause(&self) {}
}

/// A listener that ignores every callback.
pub struct NullListener;

impl PlayerListener for NullListener {}

impl<T: PlayerListener + ?Sized> PlayerListener for std::sync::Arc<T> {
    fn on_sync(&self) {
        self.as_ref().on_sync();
    }

    fn on_tag_modified(&self) {
        self.as_ref().on_tag_modified();
    }

    fn on_border_pause(&self) {
        self.as_ref().on_border_pause();
    }
}
