//! # Job abstractions.
//!
//! - [`Job`] trait for opaque, cancellable units of work
//! - [`JobFn`] closure-backed job implementation
//! - [`JobRef`] shared reference to a job (`Arc<dyn Job>`)
//! - [`TaskType`] throttling classification attached to every job

mod job;
mod job_fn;
mod task_type;

pub use job::{BoxJobFuture, Job, JobRef};
pub use job_fn::JobFn;
pub use task_type::TaskType;
