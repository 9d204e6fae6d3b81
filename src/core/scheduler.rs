//! # Scheduler: the public handle.
//!
//! [`Scheduler`] is a cheap, cloneable handle onto the controller task. Every
//! method turns into one message on the controller's queue, so calls from any
//! task or thread are serialized with completions and retry wake-ups.
//!
//! ```text
//! SchedulerBuilder::build()
//!   ├─ cfg.validate()                         (fail fast)
//!   ├─ Bus::new(cfg.bus_capacity)
//!   ├─ subscriber listener: Bus ─► SubscriberSet::emit   (only if subscribers were given)
//!   └─ tokio::spawn(Controller::run(rx))
//!
//! Scheduler::enqueue(channel, job) ──► Command::Enqueue ──► controller
//! Scheduler::shutdown()            ──► Command::Shutdown ──► drop pendings, cancel, wait grace
//! ```
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use chanvisor::{JobError, JobFn, JobRef, Scheduler, SchedulerConfig, ThrottleRule};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = SchedulerConfig::default()
//!         .with_throttle("image", ThrottleRule::per_four_weeks(100));
//!     let scheduler = Scheduler::builder(cfg).build()?;
//!
//!     let reply: JobRef = JobFn::arc("reply", |ctx: CancellationToken| async move {
//!         tokio::select! {
//!             _ = ctx.cancelled() => Err(JobError::Canceled),
//!             _ = tokio::time::sleep(Duration::from_millis(10)) => Ok(()),
//!         }
//!     });
//!     scheduler.enqueue("general", reply)?;
//!
//!     scheduler.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::SchedulerConfig;
use crate::error::{ConfigError, EnqueueError, RuntimeError};
use crate::events::{Bus, Event};
use crate::jobs::JobRef;
use crate::subscribers::{Subscribe, SubscriberSet};

use super::channel::ChannelSnapshot;
use super::controller::{Command, Controller};

/// Builder for a [`Scheduler`].
pub struct SchedulerBuilder {
    cfg: SchedulerConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl SchedulerBuilder {
    pub fn new(cfg: SchedulerConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
        }
    }

    /// Sets event subscribers.
    ///
    /// Each subscriber gets its own worker and bounded queue; see [`SubscriberSet`].
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Validates the configuration and starts the controller task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Scheduler, ConfigError> {
        self.cfg.validate()?;

        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        if !self.subscribers.is_empty() {
            subscriber_listener(&bus, SubscriberSet::new(self.subscribers));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let controller = Controller::new(self.cfg, bus.clone());
        tokio::spawn(controller.run(rx));

        tracing::debug!("scheduler started");
        Ok(Scheduler { tx, bus })
    }
}

/// Forwards bus events to the subscriber set until the bus closes.
fn subscriber_listener(bus: &Bus, set: SubscriberSet) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => set.emit(&ev),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber listener lagged; events lost");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        set.shutdown().await;
    });
}

/// Handle to a running channel scheduler.
///
/// Dropping every handle shuts the scheduler down as if [`Scheduler::shutdown`]
/// had been called, without reporting the result.
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<Command>,
    bus: Bus,
}

impl Scheduler {
    /// Shorthand for [`SchedulerBuilder::new`].
    pub fn builder(cfg: SchedulerConfig) -> SchedulerBuilder {
        SchedulerBuilder::new(cfg)
    }

    /// Places `job` in the channel's pending slot, replacing any job already
    /// pending there, and triggers promotion.
    ///
    /// Never blocks and never rejects for capacity. Fails only after shutdown.
    pub fn enqueue(&self, channel: impl Into<String>, job: JobRef) -> Result<(), EnqueueError> {
        self.tx
            .send(Command::Enqueue {
                channel: channel.into(),
                job,
            })
            .map_err(|_| EnqueueError::Closed)
    }

    /// Changes the preemption budget ceiling of one channel.
    ///
    /// The remaining budget is clamped to the new ceiling; the override
    /// outlives eviction of the channel.
    pub fn set_channel_budget(
        &self,
        channel: impl Into<String>,
        max_preemptions: u32,
    ) -> Result<(), EnqueueError> {
        self.tx
            .send(Command::SetBudget {
                channel: channel.into(),
                max_preemptions,
            })
            .map_err(|_| EnqueueError::Closed)
    }

    /// Point-in-time state of one channel; `None` if unknown or closed.
    pub async fn snapshot(&self, channel: &str) -> Option<ChannelSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot {
                channel: channel.to_owned(),
                reply,
            })
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Sorted ids of every known channel.
    pub async fn channels(&self) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Channels { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Subscribes to scheduler events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Drops every pending job, cancels every running one and waits up to
    /// `grace` for job bodies to return.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown { reply })
            .map_err(|_| RuntimeError::Closed)?;
        rx.await.map_err(|_| RuntimeError::Closed)?
    }

    /// `true` once the scheduler stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{ChannelState, EventKind, JobError, JobFn, TaskType, ThrottleRule};

    type Log = Arc<Mutex<Vec<String>>>;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    /// No periodic sweep, so timing only depends on the test.
    fn quiet() -> SchedulerConfig {
        SchedulerConfig {
            sweep_interval: Duration::ZERO,
            ..SchedulerConfig::default()
        }
    }

    fn start(cfg: SchedulerConfig) -> Scheduler {
        Scheduler::builder(cfg).build().unwrap()
    }

    /// Sleeps for `dur` unless cancelled first.
    fn sleeper(task_type: &'static str, label: &'static str, dur: Duration, log: &Log) -> JobRef {
        let log = Arc::clone(log);
        JobFn::arc(task_type, move |ctx: CancellationToken| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(format!("start {label}"));
                tokio::select! {
                    _ = ctx.cancelled() => {
                        log.lock().unwrap().push(format!("cancel {label}"));
                        Err(JobError::Canceled)
                    }
                    _ = time::sleep(dur) => {
                        log.lock().unwrap().push(format!("done {label}"));
                        Ok(())
                    }
                }
            }
        })
    }

    /// Ignores its token.
    fn stubborn(task_type: &'static str, dur: Duration) -> JobRef {
        JobFn::arc(task_type, move |_ctx: CancellationToken| async move {
            time::sleep(dur).await;
            Ok::<(), JobError>(())
        })
    }

    fn flag_job(flag: &Arc<AtomicBool>) -> JobRef {
        let flag = Arc::clone(flag);
        JobFn::arc("reply", move |_ctx: CancellationToken| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<(), JobError>(())
            }
        })
    }

    fn has(log: &Log, entry: &str) -> bool {
        log.lock().unwrap().iter().any(|e| e == entry)
    }

    fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    async fn settle() {
        time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn pending_slot_is_last_write_wins() {
        let log = Log::default();
        let sched = start(quiet().with_channel_budget("general", 0));
        let mut events = sched.subscribe();

        sched
            .enqueue("general", sleeper("reply", "R", secs(5), &log))
            .unwrap();
        settle().await;

        let first_ran = Arc::new(AtomicBool::new(false));
        sched.enqueue("general", flag_job(&first_ran)).unwrap();
        sched
            .enqueue("general", sleeper("reply", "second", secs(1), &log))
            .unwrap();

        let snap = sched.snapshot("general").await.unwrap();
        assert_eq!(snap.state, ChannelState::Running);
        assert_eq!(snap.pending, Some(TaskType::from("reply")));
        assert!(!snap.running.unwrap().cancelled);

        time::sleep(secs(10)).await;
        assert!(!first_ran.load(Ordering::SeqCst));
        assert!(has(&log, "done R"));
        assert!(has(&log, "done second"));

        let discarded = drain(&mut events)
            .into_iter()
            .filter(|ev| ev.kind == EventKind::PendingDiscarded)
            .count();
        assert_eq!(discarded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn preemption_budget_is_bounded_and_resets() {
        let log = Log::default();
        let sched = start(SchedulerConfig {
            max_preemptions: 2,
            ..quiet()
        });

        sched
            .enqueue("general", sleeper("reply", "R", secs(60), &log))
            .unwrap();
        settle().await;
        sched
            .enqueue("general", sleeper("reply", "N1", secs(60), &log))
            .unwrap();
        settle().await;

        // R's cancelled completion is stale and must not refill the budget.
        assert!(has(&log, "cancel R"));
        let snap = sched.snapshot("general").await.unwrap();
        assert_eq!(snap.remaining_preemptions, 1);

        sched
            .enqueue("general", sleeper("reply", "N2", secs(10), &log))
            .unwrap();
        settle().await;
        sched
            .enqueue("general", sleeper("reply", "N3", secs(10), &log))
            .unwrap();
        settle().await;

        let snap = sched.snapshot("general").await.unwrap();
        assert_eq!(snap.remaining_preemptions, 0);
        assert!(snap.pending.is_some());
        assert!(!snap.running.unwrap().cancelled);
        assert!(has(&log, "cancel N1"));
        assert!(!has(&log, "start N3"));

        time::sleep(secs(10)).await;
        assert!(has(&log, "done N2"));
        assert!(has(&log, "start N3"));
        let snap = sched.snapshot("general").await.unwrap();
        assert_eq!(snap.remaining_preemptions, 2);
        assert_eq!(snap.pending, None);
        assert_eq!(snap.state, ChannelState::Running);

        time::sleep(secs(11)).await;
        let snap = sched.snapshot("general").await.unwrap();
        assert_eq!(snap.state, ChannelState::Idle);
        assert_eq!(snap.remaining_preemptions, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn channels_run_concurrently() {
        let log = Log::default();
        let sched = start(quiet());

        sched
            .enqueue("alpha", sleeper("reply", "a", secs(5), &log))
            .unwrap();
        sched
            .enqueue("beta", sleeper("reply", "b", secs(5), &log))
            .unwrap();

        time::sleep(secs(5) + Duration::from_millis(10)).await;
        assert!(has(&log, "done a"));
        assert!(has(&log, "done b"));
        assert_eq!(sched.channels().await, vec!["alpha", "beta"]);
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_job_waits_then_retries() {
        let log = Log::default();
        let sched = start(quiet().with_throttle("image", ThrottleRule::new(secs(10), 1)));
        let mut events = sched.subscribe();

        sched
            .enqueue("art", sleeper("image", "img1", Duration::from_millis(100), &log))
            .unwrap();
        sched
            .enqueue("memes", sleeper("image", "img2", Duration::from_millis(100), &log))
            .unwrap();

        let snap = sched.snapshot("memes").await.unwrap();
        assert_eq!(snap.state, ChannelState::Pending);
        assert_eq!(snap.pending, Some(TaskType::from("image")));

        time::sleep(secs(9)).await;
        assert!(has(&log, "done img1"));
        assert!(!has(&log, "start img2"));

        time::sleep(secs(3)).await;
        assert!(has(&log, "done img2"));

        let kinds: Vec<EventKind> = drain(&mut events).into_iter().map(|ev| ev.kind).collect();
        assert!(kinds.contains(&EventKind::JobThrottled));
        assert!(kinds.contains(&EventKind::RetryScheduled));
    }

    #[tokio::test(start_paused = true)]
    async fn one_enqueue_is_one_refusal() {
        let log = Log::default();
        let sched = start(quiet().with_throttle("image", ThrottleRule::new(secs(100), 1)));
        let mut events = sched.subscribe();

        sched
            .enqueue("art", sleeper("image", "a", secs(1), &log))
            .unwrap();
        sched
            .enqueue("memes", sleeper("image", "b", secs(1), &log))
            .unwrap();
        sched.snapshot("memes").await.unwrap();

        let seen = drain(&mut events);
        let throttled = seen
            .iter()
            .filter(|ev| ev.kind == EventKind::JobThrottled)
            .count();
        let retries: Vec<(Option<u32>, Option<u64>)> = seen
            .iter()
            .filter(|ev| ev.kind == EventKind::RetryScheduled)
            .map(|ev| (ev.attempt, ev.delay_ms))
            .collect();
        assert_eq!(throttled, 1);
        assert_eq!(retries, vec![(Some(1), Some(1_000))]);

        // The first wake-up is refused again and backs off one step.
        time::sleep(Duration::from_millis(1_500)).await;
        let retries: Vec<(Option<u32>, Option<u64>)> = drain(&mut events)
            .iter()
            .filter(|ev| ev.kind == EventKind::RetryScheduled)
            .map(|ev| (ev.attempt, ev.delay_ms))
            .collect();
        assert_eq!(retries, vec![(Some(2), Some(2_000))]);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_retries_throttled_pending() {
        let log = Log::default();
        let mut cfg = SchedulerConfig {
            sweep_interval: secs(1),
            ..SchedulerConfig::default()
        }
        .with_throttle("image", ThrottleRule::new(secs(3), 1));
        cfg.retry_backoff.first = secs(1_000);
        cfg.retry_backoff.max = secs(1_000);
        let sched = start(cfg);
        let mut events = sched.subscribe();

        sched
            .enqueue("art", sleeper("image", "a", Duration::from_millis(100), &log))
            .unwrap();
        sched
            .enqueue("memes", sleeper("image", "b", Duration::from_millis(100), &log))
            .unwrap();
        time::sleep(Duration::from_millis(2_500)).await;
        assert!(!has(&log, "start b"));

        time::sleep(secs(2)).await;
        assert!(has(&log, "done b"));

        // Sweeps before the window freed re-checked the job.
        let throttled = drain(&mut events)
            .iter()
            .filter(|ev| ev.kind == EventKind::JobThrottled)
            .count();
        assert!(throttled >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn preempted_slot_kept_while_throttled() {
        let log = Log::default();
        let sched = start(quiet().with_throttle("video", ThrottleRule::new(secs(600), 1)));

        sched.enqueue("studio", stubborn("video", secs(30))).unwrap();
        settle().await;
        sched
            .enqueue("studio", sleeper("video", "v2", secs(1), &log))
            .unwrap();

        let snap = sched.snapshot("studio").await.unwrap();
        assert!(snap.running.as_ref().unwrap().cancelled);
        assert_eq!(snap.remaining_preemptions, 5);
        assert!(snap.pending.is_some());

        // Replacing the pending job does not charge the cancelled slot again.
        sched
            .enqueue("studio", sleeper("video", "v3", secs(1), &log))
            .unwrap();
        let snap = sched.snapshot("studio").await.unwrap();
        assert_eq!(snap.remaining_preemptions, 5);

        // The cancelled job finishing on its own is a natural completion.
        time::sleep(secs(31)).await;
        let snap = sched.snapshot("studio").await.unwrap();
        assert_eq!(snap.state, ChannelState::Pending);
        assert_eq!(snap.remaining_preemptions, 6);
        assert!(!has(&log, "start v2"));
        assert!(!has(&log, "start v3"));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_swallowed() {
        let sched = start(quiet());
        let mut events = sched.subscribe();

        let failing: JobRef = JobFn::arc("reply", |_ctx: CancellationToken| async {
            Err::<(), _>(JobError::fail("upstream 500"))
        });
        let panicking: JobRef = JobFn::arc("reply", |_ctx: CancellationToken| async {
            if true {
                panic!("template missing");
            }
            Ok::<(), JobError>(())
        });

        sched.enqueue("general", failing).unwrap();
        settle().await;
        sched.enqueue("general", panicking).unwrap();
        settle().await;

        let snap = sched.snapshot("general").await.unwrap();
        assert_eq!(snap.state, ChannelState::Idle);
        assert_eq!(snap.remaining_preemptions, 6);

        let reasons: Vec<String> = drain(&mut events)
            .into_iter()
            .filter(|ev| ev.kind == EventKind::JobFailed)
            .filter_map(|ev| ev.reason.map(|r| r.to_string()))
            .collect();
        assert_eq!(reasons.len(), 2);
        assert!(reasons[0].contains("upstream 500"));
        assert!(reasons[1].contains("template missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn channel_budget_overrides() {
        let log = Log::default();
        let sched = start(quiet().with_channel_budget("strict", 0));

        sched
            .enqueue("strict", sleeper("reply", "R", secs(5), &log))
            .unwrap();
        settle().await;
        sched
            .enqueue("strict", sleeper("reply", "N", secs(1), &log))
            .unwrap();
        settle().await;
        assert!(!has(&log, "cancel R"));

        sched.set_channel_budget("relaxed", 1).unwrap();
        sched
            .enqueue("relaxed", sleeper("reply", "X", secs(5), &log))
            .unwrap();
        settle().await;
        sched
            .enqueue("relaxed", sleeper("reply", "Y", secs(5), &log))
            .unwrap();
        settle().await;
        assert!(has(&log, "cancel X"));

        let snap = sched.snapshot("relaxed").await.unwrap();
        assert_eq!(snap.max_preemptions, 1);
        assert_eq!(snap.remaining_preemptions, 0);
        assert!(sched.snapshot("unknown").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_channels_are_evicted() {
        let log = Log::default();
        let sched = start(SchedulerConfig {
            sweep_interval: secs(1),
            idle_ttl: secs(5),
            ..SchedulerConfig::default()
        });
        let mut events = sched.subscribe();

        sched
            .enqueue("ephemeral", sleeper("reply", "once", secs(1), &log))
            .unwrap();
        time::sleep(secs(3)).await;
        assert_eq!(sched.channels().await, vec!["ephemeral"]);

        time::sleep(secs(5)).await;
        assert!(sched.channels().await.is_empty());
        assert!(
            drain(&mut events)
                .iter()
                .any(|ev| ev.kind == EventKind::ChannelEvicted)
        );

        sched
            .enqueue("ephemeral", sleeper("reply", "again", secs(1), &log))
            .unwrap();
        let snap = sched.snapshot("ephemeral").await.unwrap();
        assert_eq!(snap.remaining_preemptions, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_and_drops_pending() {
        let log = Log::default();
        let sched = start(quiet().with_channel_budget("held", 0));
        let mut events = sched.subscribe();

        sched
            .enqueue("held", sleeper("reply", "R", secs(60), &log))
            .unwrap();
        settle().await;
        let pending_ran = Arc::new(AtomicBool::new(false));
        sched.enqueue("held", flag_job(&pending_ran)).unwrap();

        sched.shutdown().await.unwrap();
        assert!(has(&log, "cancel R"));
        assert!(!pending_ran.load(Ordering::SeqCst));
        assert!(sched.is_closed());
        assert!(matches!(
            sched.enqueue("held", flag_job(&pending_ran)),
            Err(EnqueueError::Closed)
        ));
        assert!(matches!(sched.shutdown().await, Err(RuntimeError::Closed)));

        let kinds: Vec<EventKind> = drain(&mut events).into_iter().map(|ev| ev.kind).collect();
        assert!(kinds.contains(&EventKind::ShutdownRequested));
        assert!(kinds.contains(&EventKind::AllStoppedWithin));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_reports_stuck_channels() {
        let log = Log::default();
        let sched = start(SchedulerConfig {
            grace: secs(2),
            ..quiet()
        });

        sched.enqueue("stubborn", stubborn("reply", secs(60))).unwrap();
        sched
            .enqueue("polite", sleeper("reply", "p", secs(60), &log))
            .unwrap();
        settle().await;

        match sched.shutdown().await {
            Err(RuntimeError::GraceExceeded { grace, stuck }) => {
                assert_eq!(grace, secs(2));
                assert_eq!(stuck, vec!["stubborn".to_string()]);
            }
            other => panic!("unexpected shutdown result: {other:?}"),
        }
        assert!(has(&log, "cancel p"));
    }

    #[tokio::test]
    async fn invalid_config_fails_fast() {
        let cfg = quiet().with_throttle("music", ThrottleRule::new(Duration::ZERO, 25));
        assert!(matches!(
            Scheduler::builder(cfg).build(),
            Err(ConfigError::ZeroWindow { .. })
        ));
    }

    struct Completions(AtomicUsize);

    #[async_trait]
    impl Subscribe for Completions {
        async fn on_event(&self, event: &Event) {
            if event.kind == EventKind::JobCompleted {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_receive_events() {
        let log = Log::default();
        let counter = Arc::new(Completions(AtomicUsize::new(0)));
        let sub: Arc<dyn Subscribe> = counter.clone();
        let sched = Scheduler::builder(quiet())
            .with_subscribers(vec![sub])
            .build()
            .unwrap();

        sched
            .enqueue("general", sleeper("reply", "one", secs(1), &log))
            .unwrap();
        time::sleep(secs(2)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
