//! Error types used by the chanvisor scheduler and by job bodies.
//!
//! - [`JobError`] errors returned by individual job executions.
//! - [`RuntimeError`] errors raised by the scheduler runtime itself (shutdown).
//! - [`ConfigError`] invalid or unreadable configuration, raised at startup.
//! - [`EnqueueError`] the scheduler is no longer accepting jobs.
//!
//! All enums provide `as_label` for logs/metrics.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// # Errors produced by job execution.
///
/// The scheduler never propagates these to the enqueuer; they are observed at
/// the completion boundary, logged and published as events.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Job body failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Job observed its cancellation token and exited early.
    #[error("job cancelled")]
    Canceled,
}

impl JobError {
    /// Shorthand for [`JobError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        JobError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use chanvisor::JobError;
    ///
    /// assert_eq!(JobError::fail("boom").as_label(), "job_failed");
    /// assert_eq!(JobError::Canceled.as_label(), "job_canceled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            JobError::Fail { .. } => "job_failed",
            JobError::Canceled => "job_canceled",
        }
    }
}

/// # Errors produced by the scheduler runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some job bodies had not returned.
    #[error("shutdown timeout {grace:?} exceeded; stuck channels: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Channels whose running job had not returned in time.
        stuck: Vec<String>,
    },

    /// The controller task is gone (already shut down).
    #[error("scheduler is closed")]
    Closed,
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Closed => "runtime_closed",
        }
    }
}

/// # Configuration errors.
///
/// Raised while loading or validating a [`SchedulerConfig`](crate::SchedulerConfig);
/// never at runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A throttle rule has a zero-length window.
    #[error("throttle rule for task type '{task_type}' has a zero window")]
    ZeroWindow {
        /// Offending task type.
        task_type: String,
    },

    /// A throttle rule allows zero runs per window.
    #[error("throttle rule for task type '{task_type}' allows zero runs per window")]
    ZeroRunLimit {
        /// Offending task type.
        task_type: String,
    },

    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config text is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::ZeroWindow { .. } => "config_zero_window",
            ConfigError::ZeroRunLimit { .. } => "config_zero_run_limit",
            ConfigError::Read { .. } => "config_read",
            ConfigError::Parse(_) => "config_parse",
        }
    }
}

/// Error returned by [`Scheduler::enqueue`](crate::Scheduler::enqueue).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The scheduler has shut down; the job was dropped.
    #[error("scheduler closed")]
    Closed,
}
