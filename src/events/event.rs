//! # Events emitted by the scheduler.
//!
//! [`EventKind`] falls into four groups:
//! - **Admission**: a job entered a channel or replaced a pending one
//! - **Execution**: a job started, was preempted, or was held back by the throttle
//! - **Completion**: a running job returned (success, failure, cancellation, stale)
//! - **Runtime**: eviction and shutdown
//!
//! Each event carries a process-wide monotonic `seq`.
//!
//! ## Example
//! ```rust
//! use chanvisor::{Event, EventKind, RunId};
//!
//! let ev = Event::new(EventKind::JobPreempted)
//!     .with_channel("general")
//!     .with_task_type("reply")
//!     .with_run(RunId::new(7))
//!     .with_budget(5);
//!
//! assert_eq!(ev.channel.as_deref(), Some("general"));
//! assert_eq!(ev.remaining_preemptions, Some(5));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::core::RunId;
use crate::jobs::TaskType;

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of scheduler events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Admission ===
    /// A job was placed in a channel's pending slot.
    ///
    /// Sets: `channel`, `task_type`
    JobEnqueued,

    /// A pending job was overwritten by a newer enqueue and will never run.
    ///
    /// Sets: `channel`, `task_type` (of the discarded job)
    PendingDiscarded,

    // === Execution ===
    /// A job was promoted to the running slot.
    ///
    /// Sets: `channel`, `task_type`, `run`, `remaining_preemptions`
    JobStarted,

    /// A running job's token was cancelled to make room for a pending one.
    ///
    /// Sets: `channel`, `task_type` (of the preempted job), `run`, `remaining_preemptions` (after decrement)
    JobPreempted,

    /// The throttle refused to start a pending job; it stays pending.
    ///
    /// Sets: `channel`, `task_type`
    JobThrottled,

    /// A wake-up was armed for a throttled channel.
    ///
    /// Sets: `channel`, `task_type`, `delay_ms`, `attempt` (consecutive refusals)
    RetryScheduled,

    // === Completion ===
    /// A running job returned `Ok(())`.
    ///
    /// Sets: `channel`, `task_type`, `run`
    JobCompleted,

    /// A running job returned an error or panicked.
    ///
    /// Sets: `channel`, `task_type`, `run`, `reason`
    JobFailed,

    /// A running job exited after observing cancellation.
    ///
    /// Sets: `channel`, `task_type`, `run`
    JobCanceled,

    /// A superseded run returned; slot bookkeeping was left untouched.
    ///
    /// Sets: `channel`, `task_type`, `run`
    StaleCompletion,

    /// A channel's preemption budget was restored after a natural completion.
    ///
    /// Sets: `channel`, `remaining_preemptions`
    BudgetReset,

    // === Runtime ===
    /// An idle channel was removed from the registry.
    ///
    /// Sets: `channel`
    ChannelEvicted,

    /// Shutdown was requested; pending jobs dropped and running jobs cancelled.
    ShutdownRequested,

    /// Every job body returned within the grace period.
    AllStoppedWithin,

    /// The grace period ran out with job bodies still running.
    ///
    /// Sets: `reason` (stuck channels)
    GraceExceeded,
}

/// Scheduler event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Process-wide, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Channel the event concerns.
    pub channel: Option<Arc<str>>,
    /// Task type of the job the event concerns.
    pub task_type: Option<TaskType>,
    /// Run identifier, for running/preempted/completed jobs.
    pub run: Option<RunId>,
    /// Channel budget at the time of the event.
    pub remaining_preemptions: Option<u32>,
    /// Retry delay in milliseconds (compact).
    pub delay_ms: Option<u64>,
    /// Consecutive throttle refusals.
    pub attempt: Option<u32>,
    /// Human-readable reason (errors, stuck channels).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates an event of the given kind with the current time and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            channel: None,
            task_type: None,
            run: None,
            remaining_preemptions: None,
            delay_ms: None,
            attempt: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_channel(mut self, channel: impl Into<Arc<str>>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    #[inline]
    pub fn with_task_type(mut self, task_type: impl Into<TaskType>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    #[inline]
    pub fn with_run(mut self, run: RunId) -> Self {
        self.run = Some(run);
        self
    }

    #[inline]
    pub fn with_budget(mut self, remaining: u32) -> Self {
        self.remaining_preemptions = Some(remaining);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
