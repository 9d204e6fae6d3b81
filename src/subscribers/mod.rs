//! # Event subscribers.
//!
//! ```text
//! controller ── publish(Event) ──► Bus ──► listener ──► SubscriberSet::emit
//!                                                         ├──► [queue] ─► LogWriter
//!                                                         └──► [queue] ─► custom ...
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use async_trait::async_trait;
//! use chanvisor::{Event, EventKind, Subscribe};
//!
//! struct PreemptionCounter;
//!
//! #[async_trait]
//! impl Subscribe for PreemptionCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::JobPreempted {
//!             // bump a counter
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "preemptions"
//!     }
//! }
//! ```

mod log;
mod set;
mod subscriber;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
