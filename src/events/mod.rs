//! Scheduler events: types and broadcast bus.
//!
//! The controller publishes an [`Event`] for every decision it takes (start,
//! preempt, throttle, discard, completion, eviction, shutdown). Subscribers
//! attached through the builder receive them via
//! [`SubscriberSet`](crate::SubscriberSet); anyone holding a
//! [`Scheduler`](crate::Scheduler) can also [`subscribe`](crate::Scheduler::subscribe)
//! to the raw broadcast stream.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] classification and payload
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
