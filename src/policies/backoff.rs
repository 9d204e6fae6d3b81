//! # Backoff between promotion retries of a throttled job.
//!
//! A pending job refused by the throttle is retried after
//! `first × factor^refusals`, clamped to `max`, then jittered.
//! `refusals` counts consecutive refusals for the same channel and resets as
//! soon as a job of that channel starts.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use chanvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_secs(1),
//!     max: Duration::from_secs(60),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_secs(1));
//! assert_eq!(backoff.next(3), Duration::from_secs(8));
//! assert_eq!(backoff.next(10), Duration::from_secs(60));
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::policies::jitter::JitterPolicy;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay after the first refusal.
    #[serde(rename = "first_ms", deserialize_with = "crate::config::duration_ms")]
    pub first: Duration,
    /// Upper bound for any delay.
    #[serde(rename = "max_ms", deserialize_with = "crate::config::duration_ms")]
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Randomization applied after clamping.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 1s`, `factor = 2.0`, `max = 60s`, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay for the given number of prior refusals (0-indexed).
    ///
    /// The base is derived from `refusals` alone, so jitter never feeds back
    /// into later delays.
    pub fn next(&self, refusals: u32) -> Duration {
        let exp = refusals.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }
}
