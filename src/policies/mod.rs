//! Retry cadence for jobs held back by the throttle.
//!
//! When a pending job is refused by the [`ExecutionThrottle`](crate::ExecutionThrottle)
//! the controller arms a wake-up for its channel. These policies decide how long
//! that wake-up waits.
//!
//! ## Contents
//! - [`BackoffPolicy`] how the delay grows with consecutive refusals (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization so many throttled channels don't wake together
//!
//! ## Quick wiring
//! ```text
//! refusal #n for channel C
//!      └─► delay = min(backoff.next(n), throttle.retry_after(task_type))
//!           └─► sleep(delay) ─► Retry { channel: C } ─► promotion attempt
//! ```

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
