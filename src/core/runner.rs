//! # Run a single job body.
//!
//! Executes one [`Job`](crate::Job) with its cancellation token and reports
//! the outcome as a [`Completion`] that the controller folds back into the
//! channel's schedule.
//!
//! ## Rules
//! - Produces **exactly one** [`Completion`] per started run.
//! - A panic in the job body (or while creating its future) becomes a
//!   [`JobError::Fail`], so the completion still arrives.
//! - The runner never inspects the token itself; stopping is the job's business.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::error::JobError;
use crate::jobs::{JobRef, TaskType};

use super::channel::RunId;

/// Outcome of one run, delivered back to the controller.
pub(crate) struct Completion {
    pub channel: Arc<str>,
    pub run: RunId,
    pub task_type: TaskType,
    pub outcome: Result<(), JobError>,
}

/// Runs `job` to its end and wraps the result.
pub(crate) async fn run_job(
    channel: Arc<str>,
    run: RunId,
    job: JobRef,
    token: CancellationToken,
) -> Completion {
    let task_type = job.task_type().clone();

    let outcome = match AssertUnwindSafe(async move { job.run(token).await })
        .catch_unwind()
        .await
    {
        Ok(res) => res,
        Err(panic) => Err(JobError::fail(format!(
            "job panicked: {}",
            panic_message(panic.as_ref())
        ))),
    };

    Completion {
        channel,
        run,
        task_type,
        outcome,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}
