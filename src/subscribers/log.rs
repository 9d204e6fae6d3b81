//! # LogWriter: events to `tracing`
//!
//! Forwards every scheduler event to the `tracing` facade with structured
//! fields. Routine transitions go to `debug`, preemptions and evictions to
//! `info`, failures and grace overruns to `warn`.

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Subscriber that logs events through `tracing`.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let channel = e.channel.as_deref().unwrap_or("-");
        let task_type = e.task_type.as_ref().map(|t| t.as_str()).unwrap_or("-");
        let run = e.run.map(|r| r.get());

        match e.kind {
            EventKind::JobEnqueued => {
                tracing::debug!(seq = e.seq, channel, task_type, "[enqueued]");
            }
            EventKind::PendingDiscarded => {
                tracing::debug!(seq = e.seq, channel, task_type, "[pending-discarded]");
            }
            EventKind::JobStarted => {
                tracing::debug!(
                    seq = e.seq,
                    channel,
                    task_type,
                    run,
                    budget = e.remaining_preemptions,
                    "[started]"
                );
            }
            EventKind::JobPreempted => {
                tracing::info!(
                    seq = e.seq,
                    channel,
                    task_type,
                    run,
                    budget = e.remaining_preemptions,
                    "[preempted]"
                );
            }
            EventKind::JobThrottled => {
                tracing::debug!(seq = e.seq, channel, task_type, "[throttled]");
            }
            EventKind::RetryScheduled => {
                tracing::debug!(
                    seq = e.seq,
                    channel,
                    task_type,
                    delay_ms = e.delay_ms,
                    refusals = e.attempt,
                    "[retry-scheduled]"
                );
            }
            EventKind::JobCompleted => {
                tracing::debug!(seq = e.seq, channel, task_type, run, "[completed]");
            }
            EventKind::JobFailed => {
                tracing::warn!(
                    seq = e.seq,
                    channel,
                    task_type,
                    run,
                    reason = e.reason.as_deref(),
                    "[failed]"
                );
            }
            EventKind::JobCanceled => {
                tracing::debug!(seq = e.seq, channel, task_type, run, "[canceled]");
            }
            EventKind::StaleCompletion => {
                tracing::debug!(seq = e.seq, channel, task_type, run, "[stale-completion]");
            }
            EventKind::BudgetReset => {
                tracing::debug!(
                    seq = e.seq,
                    channel,
                    budget = e.remaining_preemptions,
                    "[budget-reset]"
                );
            }
            EventKind::ChannelEvicted => {
                tracing::info!(seq = e.seq, channel, "[evicted]");
            }
            EventKind::ShutdownRequested => {
                tracing::info!(seq = e.seq, "[shutdown-requested]");
            }
            EventKind::AllStoppedWithin => {
                tracing::info!(seq = e.seq, "[all-stopped-within-grace]");
            }
            EventKind::GraceExceeded => {
                tracing::warn!(seq = e.seq, stuck = e.reason.as_deref(), "[grace-exceeded]");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log_writer"
    }
}
