//! Throttling classification for jobs.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Kind of work a job performs (e.g. `"reply"`, `"image"`).
///
/// Independent of the channel a job runs in; the throttle keys its windows by it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskType(Arc<str>);

impl TaskType {
    /// Creates a task type from any string-like value.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Returns the task type as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskType {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl Borrow<str> for TaskType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TaskType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
