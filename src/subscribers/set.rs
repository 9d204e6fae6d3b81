//! # SubscriberSet: delivers scheduler events to every subscriber
//!
//! ```text
//!   listener ─► emit(&Event)
//!                  ├──► [outbox S1] ─► worker S1 ─► on_event()
//!                  └──► [outbox SN] ─► worker SN ─► on_event()
//! ```
//!
//! - `emit` never waits: the controller's pace is never set by a subscriber.
//! - A full or closed outbox drops the event for that subscriber only; the log
//!   line names the channel and run the lost event was about.
//! - A panicking `on_event` is logged and the worker moves on to the next event.

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;

use crate::events::Event;

use super::Subscribe;

/// Sending half of one subscriber's queue.
struct Outbox {
    subscriber: &'static str,
    tx: mpsc::Sender<Arc<Event>>,
}

/// Per-subscriber bounded queues, each drained by its own worker task.
pub struct SubscriberSet {
    outboxes: Vec<Outbox>,
    workers: JoinSet<()>,
}

impl SubscriberSet {
    /// Spawns one worker per subscriber.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>) -> Self {
        let mut workers = JoinSet::new();
        let outboxes = subs
            .into_iter()
            .map(|sub| {
                let (tx, rx) = mpsc::channel(sub.queue_capacity().max(1));
                let subscriber = sub.name();
                workers.spawn(drain(sub, rx));
                Outbox { subscriber, tx }
            })
            .collect();

        Self { outboxes, workers }
    }

    /// Queues `event` for every subscriber without waiting.
    pub fn emit(&self, event: &Event) {
        let ev = Arc::new(event.clone());
        for outbox in &self.outboxes {
            let cause = match outbox.tx.try_send(Arc::clone(&ev)) {
                Ok(()) => continue,
                Err(TrySendError::Full(_)) => "outbox full",
                Err(TrySendError::Closed(_)) => "worker gone",
            };
            tracing::warn!(
                subscriber = outbox.subscriber,
                kind = ?ev.kind,
                channel = ev.channel.as_deref(),
                run = ev.run.map(|r| r.get()),
                cause,
                "event not delivered"
            );
        }
    }

    /// Closes every outbox and waits until the workers have drained them.
    pub async fn shutdown(mut self) {
        self.outboxes.clear();
        while self.workers.join_next().await.is_some() {}
    }
}

async fn drain(sub: Arc<dyn Subscribe>, mut rx: mpsc::Receiver<Arc<Event>>) {
    while let Some(ev) = rx.recv().await {
        let delivered = std::panic::AssertUnwindSafe(sub.on_event(&ev))
            .catch_unwind()
            .await;
        if delivered.is_err() {
            tracing::error!(
                subscriber = sub.name(),
                seq = ev.seq,
                kind = ?ev.kind,
                channel = ev.channel.as_deref(),
                "subscriber panicked"
            );
        }
    }
}
