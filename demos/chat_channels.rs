//! # Example: Chat channels
//!
//! Simulates a chat bot answering in three channels:
//! - `general` receives a burst of messages; each newer reply preempts the
//!   previous one until the budget (2 here) runs out.
//! - `art` and `memes` both ask for images; the throttle allows one image per
//!   5 seconds, so the second request waits for a retry wake-up.
//!
//! Run with `RUST_LOG=chanvisor=debug cargo run --example chat_channels`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use chanvisor::{
    EventKind, JobError, JobFn, JobRef, LogWriter, Scheduler, SchedulerConfig, Subscribe,
    ThrottleRule,
};

/// Reply job that "generates" for `work_ms` unless preempted.
fn reply(label: &'static str, task_type: &'static str, work_ms: u64) -> JobRef {
    JobFn::arc(task_type, move |ctx: CancellationToken| async move {
        println!("[{label}] generating ({work_ms}ms)");
        tokio::select! {
            _ = ctx.cancelled() => {
                println!("[{label}] preempted");
                Err(JobError::Canceled)
            }
            _ = tokio::time::sleep(Duration::from_millis(work_ms)) => {
                println!("[{label}] posted");
                Ok(())
            }
        }
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chanvisor=info")),
        )
        .init();

    let mut cfg = SchedulerConfig::default()
        .with_throttle("image", ThrottleRule::new(Duration::from_secs(5), 1))
        .with_channel_budget("general", 2);
    cfg.retry_backoff.first = Duration::from_millis(500);
    cfg.grace = Duration::from_secs(2);

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let scheduler = Scheduler::builder(cfg).with_subscribers(subs).build()?;

    let mut events = scheduler.subscribe();
    let watcher = tokio::spawn(async move {
        while let Ok(ev) = events.recv().await {
            if ev.kind == EventKind::JobPreempted {
                println!(
                    "  ↳ preempted in {:?}, budget left {:?}",
                    ev.channel.as_deref(),
                    ev.remaining_preemptions
                );
            }
        }
    });

    // A burst in `general`: m1 and m2 get preempted, m3 is allowed to finish
    // because the budget is spent, m4 waits and runs afterwards.
    for (i, label) in ["m1", "m2", "m3", "m4"].into_iter().enumerate() {
        scheduler.enqueue("general", reply(label, "reply", 1_500))?;
        tokio::time::sleep(Duration::from_millis(200 * (i as u64 + 1))).await;
    }

    scheduler.enqueue("art", reply("sunset", "image", 300))?;
    scheduler.enqueue("memes", reply("cat", "image", 300))?;

    tokio::time::sleep(Duration::from_secs(7)).await;
    for channel in scheduler.channels().await {
        if let Some(snap) = scheduler.snapshot(&channel).await {
            println!(
                "{channel}: {:?}, budget {}/{}",
                snap.state, snap.remaining_preemptions, snap.max_preemptions
            );
        }
    }

    scheduler.shutdown().await?;
    watcher.abort();
    Ok(())
}
