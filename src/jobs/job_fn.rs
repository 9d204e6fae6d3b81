//! # Closure-backed job (`JobFn`)
//!
//! [`JobFn`] wraps a closure `F: Fn(CancellationToken) -> Fut` so that callers
//! can submit plain `async move` blocks without a dedicated type.
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use chanvisor::{JobError, JobFn, JobRef};
//!
//! let job: JobRef = JobFn::arc("reply", |ctx: CancellationToken| async move {
//!     if ctx.is_cancelled() {
//!         return Err(JobError::Canceled);
//!     }
//!     // talk to the generation service...
//!     Ok(())
//! });
//!
//! assert_eq!(job.task_type().as_str(), "reply");
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::JobError;
use crate::jobs::job::{BoxJobFuture, Job};
use crate::jobs::TaskType;

/// Function-backed job implementation.
pub struct JobFn<F> {
    task_type: TaskType,
    f: F,
}

impl<F> JobFn<F> {
    /// Creates a new function-backed job.
    ///
    /// Prefer [`JobFn::arc`] when you immediately need a [`JobRef`](crate::JobRef).
    pub fn new(task_type: impl Into<TaskType>, f: F) -> Self {
        Self {
            task_type: task_type.into(),
            f,
        }
    }

    /// Creates the job and returns it as a shared handle.
    pub fn arc(task_type: impl Into<TaskType>, f: F) -> Arc<Self> {
        Arc::new(Self::new(task_type, f))
    }
}

impl<F, Fut> Job for JobFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    fn run(&self, ctx: CancellationToken) -> BoxJobFuture {
        Box::pin((self.f)(ctx))
    }
}

impl<F> std::fmt::Debug for JobFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobFn")
            .field("task_type", &self.task_type)
            .finish_non_exhaustive()
    }
}
