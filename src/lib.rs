//! # chanvisor
//!
//! **Chanvisor** is a channel-scoped preemptive job scheduler for tokio.
//!
//! Every conversation channel runs at most one job at a time and remembers at
//! most one job to run next. A fresher job preempts the running one by
//! cancelling its token, up to a bounded number of times in a row; after that
//! the running job is left to finish. Independently, a sliding-window
//! throttle caps how often each kind of job may start across all channels.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   enqueue("general", job)   enqueue("art", job)   enqueue("general", job)
//!            │                       │                       │
//!            ▼                       ▼                       ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Controller task (owns all scheduling state)                      │
//! │  - ChannelRegistry  (channel id → ChannelSchedule)                │
//! │  - ExecutionThrottle (task type → run timestamps in window)       │
//! │  - JoinSet<Completion> (in-flight job bodies)                     │
//! │  - retry wake-ups for throttled pendings                          │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               │
//!  ┌────────────┐     ┌────────────┐     ┌────────────┐        │
//!  │ job body   │     │ job body   │     │ job body   │        │
//!  │ (general)  │     │ (art)      │     │ (random)   │        │
//!  └────────────┘     └────────────┘     └────────────┘        │
//!                                                              │ publish
//!                                                              ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                    Bus (broadcast channel)                        │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │  subscriber listener   │
//!                       └───────────┬────────────┘
//!                                   ▼
//!                             SubscriberSet
//!                          ┌────────┼────────┐
//!                          ▼        ▼        ▼
//!                     LogWriter   sub2     subN
//! ```
//!
//! ### Channel lifecycle
//! ```text
//! enqueue ──► pending slot (last write wins)
//!
//! promote {
//!   ├─ nothing running               ─► throttle check ─► start
//!   ├─ running, budget > 0           ─► cancel running, budget -= 1 ─► throttle check ─► start
//!   ├─ running, budget == 0          ─► hold until completion
//!   └─ throttle refuses              ─► stay pending, arm retry wake-up
//! }
//!
//! completion {
//!   ├─ stale run id  ─► ignored
//!   └─ current run   ─► clear slot, budget = max, promote
//! }
//! ```
//!
//! ## Features
//! | Area              | Description                                                        | Key types / traits                        |
//! |-------------------|--------------------------------------------------------------------|-------------------------------------------|
//! | **Scheduling**    | Per-channel slots, bounded preemption, graceful shutdown.          | [`Scheduler`], [`SchedulerBuilder`]       |
//! | **Jobs**          | Cancellable units of work tagged with a task type.                 | [`Job`], [`JobFn`], [`JobRef`], [`TaskType`] |
//! | **Throttling**    | Sliding-window run limits per task type.                           | [`ExecutionThrottle`], [`ThrottleRule`]   |
//! | **Retry cadence** | Wake-ups for throttled pendings.                                   | [`BackoffPolicy`], [`JitterPolicy`]       |
//! | **Subscriber API**| Hook into scheduling events (logging, metrics, custom subscribers).| [`Subscribe`], [`LogWriter`]              |
//! | **Errors**        | Typed errors for jobs, runtime and configuration.                  | [`JobError`], [`RuntimeError`], [`ConfigError`] |
//! | **Configuration** | Centralized settings, loadable from TOML.                          | [`SchedulerConfig`]                       |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use chanvisor::{JobError, JobFn, JobRef, LogWriter, Scheduler, SchedulerConfig, Subscribe, ThrottleRule};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = SchedulerConfig::default()
//!         .with_throttle("image", ThrottleRule::per_four_weeks(100))
//!         .with_channel_budget("announcements", 0);
//!
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
//!     let scheduler = Scheduler::builder(cfg).with_subscribers(subs).build()?;
//!
//!     let draw: JobRef = JobFn::arc("image", |ctx: CancellationToken| async move {
//!         tokio::select! {
//!             _ = ctx.cancelled() => Err(JobError::Canceled),
//!             _ = tokio::time::sleep(Duration::from_millis(20)) => Ok(()),
//!         }
//!     });
//!     scheduler.enqueue("art", draw)?;
//!
//!     scheduler.shutdown().await?;
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod jobs;
mod policies;
mod subscribers;
mod throttle;

// ---- Public re-exports ----

pub use config::{ChannelOverride, DEFAULT_MAX_PREEMPTIONS, SchedulerConfig};
pub use crate::core::{ChannelSnapshot, ChannelState, RunId, RunningInfo, Scheduler, SchedulerBuilder};
pub use error::{ConfigError, EnqueueError, JobError, RuntimeError};
pub use events::{Bus, Event, EventKind};
pub use jobs::{BoxJobFuture, Job, JobFn, JobRef, TaskType};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use throttle::{ExecutionThrottle, ThrottleRule};
