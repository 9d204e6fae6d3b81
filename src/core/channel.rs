//! # Per-channel schedule.
//!
//! A [`ChannelSchedule`] holds at most one running job, at most one pending
//! job, and the channel's remaining preemption budget.
//!
//! ## State machine
//! ```text
//!   Idle ──enqueue──► Pending ──promote──► Running ──preempt──► Running (new run id)
//!    ▲                                      │
//!    └──────── completion, nothing pending ─┤
//!                                           └─ completion, job pending ─► Running
//! ```
//!
//! ## Invariants
//! - `0 <= remaining_preemptions <= max_preemptions`
//! - the running slot is cleared only by the completion of the *same* run
//! - enqueuing over an occupied pending slot discards the older job

use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::jobs::{JobRef, TaskType};

/// Identifier of one job execution, unique for the scheduler's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(u64);

impl RunId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run#{}", self.0)
    }
}

/// The job currently in flight for a channel.
pub(crate) struct RunningSlot {
    pub run: RunId,
    pub task_type: TaskType,
    pub token: CancellationToken,
}

/// The most recently enqueued job not yet promoted.
pub(crate) struct PendingSlot {
    pub job: JobRef,
}

/// What the promotion algorithm should do with a channel right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Nothing pending.
    Idle,
    /// No live running job: start the pending one (subject to the throttle).
    Start,
    /// A live job runs and budget remains: cancel it, then start the pending one.
    Preempt,
    /// Budget exhausted: keep the pending job until the running one completes.
    Hold,
}

/// Coarse channel state, as reported in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No running and no pending job.
    Idle,
    /// A job waits; nothing runs.
    Pending,
    /// A job runs (another may be pending).
    Running,
}

/// Scheduling state of one conversation channel.
pub(crate) struct ChannelSchedule {
    id: Arc<str>,
    pub running: Option<RunningSlot>,
    pending: Option<PendingSlot>,
    remaining_preemptions: u32,
    max_preemptions: u32,
    /// Consecutive throttle refusals since the last start.
    pub refusals: u32,
    /// A throttle wake-up is already scheduled.
    pub retry_armed: bool,
    last_active: Instant,
}

impl ChannelSchedule {
    pub fn new(id: Arc<str>, max_preemptions: u32, now: Instant) -> Self {
        Self {
            id,
            running: None,
            pending: None,
            remaining_preemptions: max_preemptions,
            max_preemptions,
            refusals: 0,
            retry_armed: false,
            last_active: now,
        }
    }

    pub fn id(&self) -> &Arc<str> {
        &self.id
    }

    pub fn remaining_preemptions(&self) -> u32 {
        self.remaining_preemptions
    }

    #[cfg(test)]
    pub fn max_preemptions(&self) -> u32 {
        self.max_preemptions
    }

    /// Places `job` in the pending slot; returns the job it displaced, if any.
    pub fn set_pending(&mut self, job: JobRef, now: Instant) -> Option<JobRef> {
        self.last_active = now;
        self.pending
            .replace(PendingSlot { job })
            .map(|slot| slot.job)
    }

    pub fn pending_job(&self) -> Option<&JobRef> {
        self.pending.as_ref().map(|slot| &slot.job)
    }

    pub fn take_pending(&mut self) -> Option<JobRef> {
        self.pending.take().map(|slot| slot.job)
    }

    /// Decides the next promotion step.
    ///
    /// A running job whose token is already cancelled was charged when it was
    /// preempted; it is replaced without spending budget again.
    pub fn next_step(&self) -> Step {
        if self.pending.is_none() {
            return Step::Idle;
        }
        match &self.running {
            None => Step::Start,
            Some(slot) if slot.token.is_cancelled() => Step::Start,
            Some(_) if self.remaining_preemptions > 0 => Step::Preempt,
            Some(_) => Step::Hold,
        }
    }

    /// Cancels the running job and spends one unit of budget.
    ///
    /// Returns the preempted run, or `None` when nothing could be preempted.
    pub fn preempt(&mut self) -> Option<RunId> {
        if self.remaining_preemptions == 0 {
            return None;
        }
        let slot = self.running.as_ref().filter(|s| !s.token.is_cancelled())?;
        slot.token.cancel();
        self.remaining_preemptions -= 1;
        Some(slot.run)
    }

    /// Installs a freshly started run, superseding any previous slot.
    pub fn start(&mut self, slot: RunningSlot, now: Instant) {
        self.running = Some(slot);
        self.refusals = 0;
        self.last_active = now;
    }

    /// Clears the running slot if it still belongs to `run`.
    ///
    /// Returns `false` for a completion of a superseded run.
    pub fn finish(&mut self, run: RunId, now: Instant) -> bool {
        match &self.running {
            Some(slot) if slot.run == run => {
                self.running = None;
                self.last_active = now;
                true
            }
            _ => false,
        }
    }

    pub fn reset_budget(&mut self) {
        self.remaining_preemptions = self.max_preemptions;
    }

    /// Changes the budget ceiling, clamping the remaining budget into range.
    pub fn set_max_preemptions(&mut self, max: u32) {
        self.max_preemptions = max;
        self.remaining_preemptions = self.remaining_preemptions.min(max);
    }

    pub fn state(&self) -> ChannelState {
        match (&self.running, &self.pending) {
            (Some(_), _) => ChannelState::Running,
            (None, Some(_)) => ChannelState::Pending,
            (None, None) => ChannelState::Idle,
        }
    }

    /// Idle for at least `ttl` as of `now`.
    pub fn is_expired(&self, now: Instant, ttl: std::time::Duration) -> bool {
        self.state() == ChannelState::Idle && now.saturating_duration_since(self.last_active) >= ttl
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            channel: self.id.to_string(),
            state: self.state(),
            running: self.running.as_ref().map(|slot| RunningInfo {
                run: slot.run,
                task_type: slot.task_type.clone(),
                cancelled: slot.token.is_cancelled(),
            }),
            pending: self.pending_job().map(|job| job.task_type().clone()),
            remaining_preemptions: self.remaining_preemptions,
            max_preemptions: self.max_preemptions,
        }
    }
}

/// Running job as seen from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningInfo {
    pub run: RunId,
    pub task_type: TaskType,
    /// The job was preempted but has not been replaced or returned yet.
    pub cancelled: bool,
}

/// Point-in-time copy of a channel's schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub channel: String,
    pub state: ChannelState,
    pub running: Option<RunningInfo>,
    /// Task type of the pending job, if one waits.
    pub pending: Option<TaskType>,
    pub remaining_preemptions: u32,
    pub max_preemptions: u32,
}
