//! # Event bus for broadcasting scheduler events.
//!
//! ```text
//! Publishers:                       Receivers:
//!   controller ──┐
//!   runner     ──┼──► Bus ──┬──► subscriber listener ──► SubscriberSet
//!                │  (broadcast)└──► Scheduler::subscribe() callers
//! ```
//!
//! ## Rules
//! - `publish()` never blocks; events sent with no receiver are dropped.
//! - A single ring buffer of `capacity` events is shared by all receivers;
//!   slow receivers observe `RecvError::Lagged(n)` and skip `n` events.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for scheduler events. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus; capacity is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all current receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
