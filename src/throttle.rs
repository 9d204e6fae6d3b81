//! # Execution throttle: sliding-window run limits per task type.
//!
//! For every [`TaskType`] with a [`ThrottleRule`] the throttle keeps the
//! instants of past runs, oldest first. A query prunes entries that have left
//! the trailing window and compares the remainder against the limit.
//!
//! ```text
//!            window (e.g. 4 weeks)
//!   ◄──────────────────────────────────►
//!   ──┬────┬──────┬───────────┬─────────┤ now
//!     │ pruned    │ counted   │ counted │
//! ```
//!
//! ## Rules
//! - Task types without a rule are never throttled and their runs are not stored.
//! - An entry recorded at `t` counts while `t + window > now`.
//! - [`record_run`](ExecutionThrottle::record_run) never checks the limit;
//!   use [`try_run`](ExecutionThrottle::try_run) for check-then-record.
//! - Every operation is synchronous; the scheduler owns the throttle and
//!   serializes access to it.
//!
//! Each operation has an `_at` variant taking an explicit instant.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use crate::jobs::TaskType;

const FOUR_WEEKS: Duration = Duration::from_secs(4 * 7 * 24 * 60 * 60);

/// Run limit for one task type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct ThrottleRule {
    /// Length of the trailing window.
    #[serde(rename = "window_ms", deserialize_with = "crate::config::duration_ms")]
    pub window: Duration,
    /// Runs allowed inside one window.
    pub max_runs: usize,
}

impl ThrottleRule {
    /// Creates a rule allowing `max_runs` per `window`.
    pub fn new(window: Duration, max_runs: usize) -> Self {
        Self { window, max_runs }
    }

    /// `max_runs` per trailing four weeks (the media generation limits use this window).
    pub fn per_four_weeks(max_runs: usize) -> Self {
        Self::new(FOUR_WEEKS, max_runs)
    }
}

/// Sliding-window rate limiter keyed by [`TaskType`].
#[derive(Debug, Default)]
pub struct ExecutionThrottle {
    rules: HashMap<TaskType, ThrottleRule>,
    history: HashMap<TaskType, VecDeque<Instant>>,
}

impl ExecutionThrottle {
    /// Creates a throttle with the given per-type rules.
    pub fn new(rules: impl IntoIterator<Item = (TaskType, ThrottleRule)>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
            history: HashMap::new(),
        }
    }

    /// May a job of this type run right now?
    pub fn can_run(&mut self, task_type: &TaskType) -> bool {
        self.can_run_at(task_type, Instant::now())
    }

    pub fn can_run_at(&mut self, task_type: &TaskType, now: Instant) -> bool {
        let Some(rule) = self.rules.get(task_type).copied() else {
            return true;
        };
        self.prune(task_type, rule.window, now) < rule.max_runs
    }

    /// Records that a job of this type just started.
    pub fn record_run(&mut self, task_type: &TaskType) {
        self.record_run_at(task_type, Instant::now());
    }

    pub fn record_run_at(&mut self, task_type: &TaskType, now: Instant) {
        if !self.rules.contains_key(task_type) {
            return;
        }
        self.history
            .entry(task_type.clone())
            .or_default()
            .push_back(now);
    }

    /// Check and, if allowed, record in one step. Returns the decision.
    pub fn try_run(&mut self, task_type: &TaskType) -> bool {
        self.try_run_at(task_type, Instant::now())
    }

    pub fn try_run_at(&mut self, task_type: &TaskType, now: Instant) -> bool {
        if !self.can_run_at(task_type, now) {
            return false;
        }
        self.record_run_at(task_type, now);
        true
    }

    /// Time until a job of this type becomes runnable again.
    ///
    /// `None` when it can run now.
    pub fn retry_after(&mut self, task_type: &TaskType) -> Option<Duration> {
        self.retry_after_at(task_type, Instant::now())
    }

    pub fn retry_after_at(&mut self, task_type: &TaskType, now: Instant) -> Option<Duration> {
        let rule = self.rules.get(task_type).copied()?;
        let count = self.prune(task_type, rule.window, now);
        if count < rule.max_runs {
            return None;
        }

        // The entry whose expiry brings the count back under the limit.
        let history = self.history.get(task_type)?;
        let oldest = history.get(count - rule.max_runs)?;
        Some((*oldest + rule.window).saturating_duration_since(now))
    }

    /// Number of recorded runs still inside the window.
    pub fn runs_in_window(&mut self, task_type: &TaskType) -> usize {
        self.runs_in_window_at(task_type, Instant::now())
    }

    pub fn runs_in_window_at(&mut self, task_type: &TaskType, now: Instant) -> usize {
        match self.rules.get(task_type).copied() {
            Some(rule) => self.prune(task_type, rule.window, now),
            None => 0,
        }
    }

    /// Drops entries that left the window and returns how many remain.
    fn prune(&mut self, task_type: &TaskType, window: Duration, now: Instant) -> usize {
        let Some(history) = self.history.get_mut(task_type) else {
            return 0;
        };
        while let Some(&oldest) = history.front() {
            if oldest + window > now {
                break;
            }
            history.pop_front();
        }
        history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> TaskType {
        TaskType::from("image")
    }

    fn throttle(rule: ThrottleRule) -> ExecutionThrottle {
        ExecutionThrottle::new([(image(), rule)])
    }

    #[test]
    fn unknown_type_is_never_throttled() {
        let mut t = throttle(ThrottleRule::per_four_weeks(1));
        let reply = TaskType::from("reply");
        let now = Instant::now();

        for _ in 0..1000 {
            assert!(t.try_run_at(&reply, now));
        }
        assert_eq!(t.runs_in_window_at(&reply, now), 0);
        assert_eq!(t.retry_after_at(&reply, now), None);
    }

    #[test]
    fn four_week_window_refuses_then_ages_out() {
        let mut t = throttle(ThrottleRule::per_four_weeks(100));
        let start = Instant::now();

        for _ in 0..100 {
            t.record_run_at(&image(), start);
        }

        assert!(!t.can_run_at(&image(), start + Duration::from_secs(1)));
        assert!(t.can_run_at(&image(), start + FOUR_WEEKS + Duration::from_secs(1)));
        assert_eq!(
            t.runs_in_window_at(&image(), start + FOUR_WEEKS + Duration::from_secs(1)),
            0
        );
    }

    #[test]
    fn entries_on_the_boundary_are_pruned() {
        let mut t = throttle(ThrottleRule::new(Duration::from_secs(10), 1));
        let start = Instant::now();

        assert!(t.try_run_at(&image(), start));
        assert!(!t.can_run_at(&image(), start + Duration::from_secs(9)));
        assert!(t.can_run_at(&image(), start + Duration::from_secs(10)));
    }

    #[test]
    fn try_run_records_only_when_allowed() {
        let mut t = throttle(ThrottleRule::new(Duration::from_secs(60), 2));
        let now = Instant::now();

        assert!(t.try_run_at(&image(), now));
        assert!(t.try_run_at(&image(), now));
        assert!(!t.try_run_at(&image(), now));
        assert_eq!(t.runs_in_window_at(&image(), now), 2);
    }

    #[test]
    fn window_slides_one_entry_at_a_time() {
        let mut t = throttle(ThrottleRule::new(Duration::from_secs(60), 2));
        let start = Instant::now();

        t.record_run_at(&image(), start);
        t.record_run_at(&image(), start + Duration::from_secs(30));

        let before = start + Duration::from_secs(59);
        assert!(!t.can_run_at(&image(), before));
        assert_eq!(t.retry_after_at(&image(), before), Some(Duration::from_secs(1)));

        let after = start + Duration::from_secs(61);
        assert!(t.can_run_at(&image(), after));
        assert_eq!(t.runs_in_window_at(&image(), after), 1);
    }

    #[test]
    fn retry_after_accounts_for_overrecording() {
        let mut t = throttle(ThrottleRule::new(Duration::from_secs(100), 1));
        let start = Instant::now();

        t.record_run_at(&image(), start);
        t.record_run_at(&image(), start + Duration::from_secs(20));

        // Both entries must expire before a third run fits.
        assert_eq!(
            t.retry_after_at(&image(), start + Duration::from_secs(50)),
            Some(Duration::from_secs(70))
        );
    }
}
