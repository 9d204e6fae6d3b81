//! # Controller: the scheduling loop.
//!
//! One controller task owns the [`ChannelRegistry`], the
//! [`ExecutionThrottle`] and the set of in-flight jobs. Everything that can
//! change a schedule arrives as a message, so each piece of bookkeeping runs
//! to completion before the next begins and no locks are needed.
//!
//! ## Architecture
//! ```text
//! Scheduler::enqueue ──► [command queue] ──┐
//! retry sleepers     ──► [retry queue]   ──┼──► Controller::run (select!)
//! JoinSet<Completion>  (job bodies)      ──┤        │
//! sweep interval                         ──┘        ├─► promote(channel)
//!                                                   └─► publish(Event) ──► Bus
//! ```
//!
//! ## Promotion
//! ```text
//! promote(channel):
//!   nothing pending            → return
//!   running, no budget left    → hold (pending waits for completion)
//!   running, budget left       → cancel running token, budget -= 1
//!   throttle refuses task type → keep pending, arm retry wake-up
//!   otherwise                  → record run, pending → running (new run id), spawn
//! ```
//!
//! ## Completion
//! ```text
//! completion(run):
//!   run is not the channel's current run → stale, bookkeeping untouched
//!   otherwise → clear slot, budget = max, promote(channel)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{ChannelOverride, SchedulerConfig};
use crate::error::{JobError, RuntimeError};
use crate::events::{Bus, Event, EventKind};
use crate::jobs::{JobRef, TaskType};
use crate::throttle::ExecutionThrottle;

use super::channel::{ChannelSnapshot, RunId, RunningSlot, Step};
use super::registry::ChannelRegistry;
use super::runner::{Completion, run_job};

/// Requests sent by [`Scheduler`](crate::Scheduler) handles.
pub(crate) enum Command {
    Enqueue {
        channel: String,
        job: JobRef,
    },
    SetBudget {
        channel: String,
        max_preemptions: u32,
    },
    Snapshot {
        channel: String,
        reply: oneshot::Sender<Option<ChannelSnapshot>>,
    },
    Channels {
        reply: oneshot::Sender<Vec<String>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

pub(crate) struct Controller {
    cfg: SchedulerConfig,
    bus: Bus,
    registry: ChannelRegistry,
    throttle: ExecutionThrottle,

    /// Parent of every job token; cancelled on shutdown.
    runtime_token: CancellationToken,
    jobs: JoinSet<Completion>,
    in_flight: HashMap<RunId, Arc<str>>,
    next_run: u64,

    retry_tx: mpsc::UnboundedSender<Arc<str>>,
    retry_rx: mpsc::UnboundedReceiver<Arc<str>>,
}

impl Controller {
    pub fn new(cfg: SchedulerConfig, bus: Bus) -> Self {
        let throttle = ExecutionThrottle::new(cfg.throttle_rules());
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();

        Self {
            cfg,
            bus,
            registry: ChannelRegistry::new(),
            throttle,
            runtime_token: CancellationToken::new(),
            jobs: JoinSet::new(),
            in_flight: HashMap::new(),
            next_run: 0,
            retry_tx,
            retry_rx,
        }
    }

    /// Runs until a `Shutdown` command arrives or every handle is dropped.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let mut sweep = self.cfg.sweep_every().map(|period| {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Shutdown { reply }) => {
                        rx.close();
                        let res = self.shutdown().await;
                        let _ = reply.send(res);
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        if let Err(e) = self.shutdown().await {
                            tracing::warn!(error = %e, "scheduler dropped with jobs still running");
                        }
                        break;
                    }
                },
                Some(channel) = self.retry_rx.recv() => {
                    self.on_retry(&channel);
                }
                Some(joined) = self.jobs.join_next(), if !self.jobs.is_empty() => {
                    self.on_joined(joined);
                }
                _ = next_tick(&mut sweep) => {
                    self.sweep();
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Enqueue { channel, job } => self.on_enqueue(&channel, job),
            Command::SetBudget {
                channel,
                max_preemptions,
            } => {
                let ch = self
                    .registry
                    .get_or_create(&channel, max_preemptions, Instant::now());
                ch.set_max_preemptions(max_preemptions);
                // Survives eviction and re-creation of the channel.
                self.cfg
                    .channels
                    .insert(channel, ChannelOverride { max_preemptions });
            }
            Command::Snapshot { channel, reply } => {
                let _ = reply.send(self.registry.get(&channel).map(|ch| ch.snapshot()));
            }
            Command::Channels { reply } => {
                let _ = reply.send(self.registry.ids());
            }
            // Handled by the run loop.
            Command::Shutdown { .. } => {}
        }
    }

    fn on_enqueue(&mut self, channel: &str, job: JobRef) {
        let now = Instant::now();
        let max = self.cfg.max_preemptions_for(channel);
        let task_type = job.task_type().clone();

        let ch = self.registry.get_or_create(channel, max, now);
        let id = Arc::clone(ch.id());
        let discarded = ch.set_pending(job, now);

        self.bus.publish(
            Event::new(EventKind::JobEnqueued)
                .with_channel(Arc::clone(&id))
                .with_task_type(task_type),
        );
        if let Some(old) = discarded {
            tracing::debug!(channel = %id, task_type = %old.task_type(), "pending job discarded");
            self.bus.publish(
                Event::new(EventKind::PendingDiscarded)
                    .with_channel(Arc::clone(&id))
                    .with_task_type(old.task_type().clone()),
            );
        }

        // The enqueued channel goes first and is evaluated once.
        self.promote(&id);
        self.promote_waiting(Some(&*id));
    }

    /// Re-evaluates every channel that still holds a pending job, except `skip`.
    fn promote_waiting(&mut self, skip: Option<&str>) {
        for id in self.registry.waiting() {
            if skip == Some(&*id) {
                continue;
            }
            self.promote(&id);
        }
    }

    /// Runs the promotion algorithm for one channel.
    fn promote(&mut self, channel: &str) {
        let now = Instant::now();
        let Some(ch) = self.registry.get_mut(channel) else {
            return;
        };

        match ch.next_step() {
            Step::Idle | Step::Hold => return,
            Step::Start => {}
            Step::Preempt => {
                let preempted_type = ch.running.as_ref().map(|slot| slot.task_type.clone());
                if let Some(run) = ch.preempt() {
                    let remaining = ch.remaining_preemptions();
                    tracing::info!(channel, %run, remaining, "preempted running job");
                    let mut ev = Event::new(EventKind::JobPreempted)
                        .with_channel(Arc::clone(ch.id()))
                        .with_run(run)
                        .with_budget(remaining);
                    if let Some(task_type) = preempted_type {
                        ev = ev.with_task_type(task_type);
                    }
                    self.bus.publish(ev);
                }
            }
        }

        let Some(task_type) = ch.pending_job().map(|job| job.task_type().clone()) else {
            return;
        };
        if !self.throttle.can_run_at(&task_type, now) {
            tracing::debug!(channel, %task_type, "throttled; job stays pending");
            self.bus.publish(
                Event::new(EventKind::JobThrottled)
                    .with_channel(Arc::clone(ch.id()))
                    .with_task_type(task_type.clone()),
            );
            self.arm_retry(channel, &task_type);
            return;
        }
        self.throttle.record_run_at(&task_type, now);

        let Some(job) = ch.take_pending() else {
            return;
        };
        self.next_run += 1;
        let run = RunId::new(self.next_run);
        let token = self.runtime_token.child_token();
        let id = Arc::clone(ch.id());

        ch.start(
            RunningSlot {
                run,
                task_type: task_type.clone(),
                token: token.clone(),
            },
            now,
        );
        let remaining = ch.remaining_preemptions();

        tracing::debug!(channel, %run, %task_type, "job started");
        self.bus.publish(
            Event::new(EventKind::JobStarted)
                .with_channel(Arc::clone(&id))
                .with_task_type(task_type)
                .with_run(run)
                .with_budget(remaining),
        );

        self.in_flight.insert(run, Arc::clone(&id));
        self.jobs.spawn(run_job(id, run, job, token));
    }

    /// Schedules a wake-up for a channel whose pending job was throttled.
    fn arm_retry(&mut self, channel: &str, task_type: &TaskType) {
        let Some(ch) = self.registry.get_mut(channel) else {
            return;
        };
        let refusals = ch.refusals;
        ch.refusals = ch.refusals.saturating_add(1);
        if ch.retry_armed {
            return;
        }
        ch.retry_armed = true;

        let mut delay = self.cfg.retry_backoff.next(refusals);
        if let Some(exact) = self.throttle.retry_after(task_type) {
            delay = delay.min(exact);
        }

        let id = Arc::clone(ch.id());
        self.bus.publish(
            Event::new(EventKind::RetryScheduled)
                .with_channel(Arc::clone(&id))
                .with_task_type(task_type.clone())
                .with_delay(delay)
                .with_attempt(refusals + 1),
        );

        let tx = self.retry_tx.clone();
        let stop = self.runtime_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(delay) => {
                    let _ = tx.send(id);
                }
                _ = stop.cancelled() => {}
            }
        });
    }

    fn on_retry(&mut self, channel: &str) {
        if let Some(ch) = self.registry.get_mut(channel) {
            ch.retry_armed = false;
        }
        self.promote(channel);
    }

    fn on_joined(&mut self, joined: Result<Completion, JoinError>) {
        match joined {
            Ok(done) => self.on_completion(done),
            // Job bodies are panic-isolated by the runner; this only happens
            // if the runtime itself is going away.
            Err(e) => tracing::error!(error = %e, "job task aborted"),
        }
    }

    /// Completion callback: exactly once per started run.
    fn on_completion(&mut self, done: Completion) {
        let Completion {
            channel,
            run,
            task_type,
            outcome,
        } = done;
        self.in_flight.remove(&run);

        let kind = match &outcome {
            Ok(()) => EventKind::JobCompleted,
            Err(JobError::Canceled) => EventKind::JobCanceled,
            Err(e) => {
                tracing::warn!(channel = %channel, %run, %task_type, error = %e, "job failed");
                EventKind::JobFailed
            }
        };
        let mut ev = Event::new(kind)
            .with_channel(Arc::clone(&channel))
            .with_task_type(task_type.clone())
            .with_run(run);
        if let Err(e) = &outcome {
            ev = ev.with_reason(e.to_string());
        }
        self.bus.publish(ev);

        let now = Instant::now();
        let finished = self
            .registry
            .get_mut(&channel)
            .is_some_and(|ch| ch.finish(run, now));
        if !finished {
            tracing::debug!(channel = %channel, %run, "stale completion ignored");
            self.bus.publish(
                Event::new(EventKind::StaleCompletion)
                    .with_channel(Arc::clone(&channel))
                    .with_task_type(task_type)
                    .with_run(run),
            );
            return;
        }

        if let Some(ch) = self.registry.get_mut(&channel) {
            ch.reset_budget();
            self.bus.publish(
                Event::new(EventKind::BudgetReset)
                    .with_channel(Arc::clone(&channel))
                    .with_budget(ch.remaining_preemptions()),
            );
        }
        self.promote(&channel);
    }

    /// Periodic pass: evict idle channels, then retry every pending job.
    fn sweep(&mut self) {
        if let Some(ttl) = self.cfg.idle_expiry() {
            for id in self.registry.evict_idle(Instant::now(), ttl) {
                tracing::debug!(channel = %id, "idle channel evicted");
                self.bus
                    .publish(Event::new(EventKind::ChannelEvicted).with_channel(id));
            }
        }
        self.promote_waiting(None);
    }

    /// Drops pending jobs, cancels running ones and waits up to `grace`.
    async fn shutdown(&mut self) -> Result<(), RuntimeError> {
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        let dropped = self.registry.clear_pending();
        self.runtime_token.cancel();
        tracing::info!(
            dropped,
            running = self.in_flight.len(),
            busy_channels = self.registry.busy().count(),
            "scheduler shutting down"
        );

        let grace = self.cfg.grace;
        let drained = time::timeout(grace, async {
            while let Some(joined) = self.jobs.join_next().await {
                self.on_joined(joined);
            }
        })
        .await;

        match drained {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_elapsed) => {
                let mut stuck: Vec<String> = self.in_flight.values().map(|c| c.to_string()).collect();
                stuck.sort_unstable();
                stuck.dedup();
                self.bus.publish(
                    Event::new(EventKind::GraceExceeded).with_reason(stuck.join(",")),
                );
                // Cancellation is cooperative: leave stragglers running.
                self.jobs.detach_all();
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }
}

async fn next_tick(sweep: &mut Option<Interval>) {
    match sweep {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
