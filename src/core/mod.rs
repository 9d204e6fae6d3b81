//! Runtime core: channel schedules and the scheduling loop.
//!
//! The only public entry points are [`Scheduler`] and [`SchedulerBuilder`];
//! everything else is owned by the controller task.
//!
//! Internal modules:
//! - [`channel`]: per-channel running/pending slots and preemption budget;
//! - [`registry`]: channel id → schedule map, idle eviction;
//! - [`runner`]: executes one job body and reports its completion;
//! - [`controller`]: promotion, preemption, completion, retries and shutdown;
//! - [`scheduler`]: public handle and builder.

mod channel;
mod controller;
mod registry;
mod runner;
mod scheduler;

pub use channel::{ChannelSnapshot, ChannelState, RunId, RunningInfo};
pub use scheduler::{Scheduler, SchedulerBuilder};
