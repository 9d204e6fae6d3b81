//! # Event subscriber trait.
//!
//! Each subscriber gets a dedicated worker task fed by a bounded queue, so a
//! slow subscriber only delays itself and never the controller.
//! Panics inside `on_event` are caught and logged.

use async_trait::async_trait;

use crate::events::Event;

/// Observer of scheduler events.
///
/// Handle errors internally and avoid blocking the executor.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes one event. Events arrive in FIFO order per subscriber.
    async fn on_event(&self, event: &Event);

    /// Name used in logs when events are dropped or a panic is caught.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Queue capacity for this subscriber (clamped to at least 1).
    ///
    /// When full, new events are dropped for this subscriber only.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
