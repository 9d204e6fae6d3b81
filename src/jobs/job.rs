//! # Job abstraction.
//!
//! A [`Job`] is supplied by a collaborator and is opaque to the scheduler: the
//! scheduler only reads its [`TaskType`] and calls [`Job::run`] once, handing
//! it a [`CancellationToken`].
//!
//! Jobs should check the token at their suspension points and return
//! [`JobError::Canceled`] once it fires. Cancellation is cooperative: nothing
//! forces a job body to stop.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio_util::sync::CancellationToken;

use crate::error::JobError;
use crate::jobs::TaskType;

/// Boxed future returned by [`Job::run`].
pub type BoxJobFuture = Pin<Box<dyn Future<Output = Result<(), JobError>> + Send + 'static>>;

/// Shared handle to a job.
pub type JobRef = Arc<dyn Job>;

/// # Asynchronous, cancellable unit of work.
///
/// # Example
/// ```
/// use chanvisor::{BoxJobFuture, Job, JobError, TaskType};
/// use tokio_util::sync::CancellationToken;
///
/// struct Reply {
///     kind: TaskType,
/// }
///
/// impl Job for Reply {
///     fn task_type(&self) -> &TaskType {
///         &self.kind
///     }
///
///     fn run(&self, ctx: CancellationToken) -> BoxJobFuture {
///         Box::pin(async move {
///             if ctx.is_cancelled() {
///                 return Err(JobError::Canceled);
///             }
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Job: Send + Sync + 'static {
    /// Kind of work, used only for throttling.
    fn task_type(&self) -> &TaskType;

    /// Creates the future performing the work.
    ///
    /// Called at most once per enqueue; a job discarded while pending is never run.
    fn run(&self, ctx: CancellationToken) -> BoxJobFuture;
}
