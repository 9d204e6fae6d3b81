//! # Scheduler configuration.
//!
//! [`SchedulerConfig`] centralizes every knob of the scheduler. It is validated
//! once by [`SchedulerBuilder::build`](crate::SchedulerBuilder::build); a bad
//! window or limit is a startup error, never a runtime one.
//!
//! ## Sentinel values
//! - `sweep_interval = 0s` → no periodic sweep
//! - `idle_ttl = 0s` → channels are never evicted
//!
//! ## File form
//! Durations are written in milliseconds:
//! ```toml
//! max_preemptions = 6
//! sweep_interval_ms = 30000
//!
//! [retry_backoff]
//! first_ms = 1000
//! max_ms = 60000
//! factor = 2.0
//! jitter = "equal"
//!
//! [throttle.image]
//! window_ms = 2419200000
//! max_runs = 100
//!
//! [channels.general]
//! max_preemptions = 2
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;
use crate::jobs::TaskType;
use crate::policies::BackoffPolicy;
use crate::throttle::ThrottleRule;

/// Preemptions a channel may perform before a job must run to completion.
pub const DEFAULT_MAX_PREEMPTIONS: u32 = 6;

/// Per-channel settings that override the global defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct ChannelOverride {
    /// Preemption budget for this channel.
    pub max_preemptions: u32,
}

/// Global configuration for the scheduler.
///
/// ## Field semantics
/// - `max_preemptions`: default preemption budget for every channel
/// - `channels`: per-channel budget overrides, keyed by channel id
/// - `throttle`: run limits keyed by task type (types without a rule are unlimited)
/// - `retry_backoff`: wake-up cadence for jobs refused by the throttle
/// - `sweep_interval`: periodic re-evaluation of all channels (`0s` = off)
/// - `idle_ttl`: evict channels idle for longer than this (`0s` = never)
/// - `grace`: how long `shutdown` waits for job bodies to return
/// - `bus_capacity`: event bus ring buffer size (min 1)
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_preemptions: u32,

    pub channels: HashMap<String, ChannelOverride>,

    pub throttle: HashMap<String, ThrottleRule>,

    pub retry_backoff: BackoffPolicy,

    #[serde(rename = "sweep_interval_ms", deserialize_with = "duration_ms")]
    pub sweep_interval: Duration,

    #[serde(rename = "idle_ttl_ms", deserialize_with = "duration_ms")]
    pub idle_ttl: Duration,

    #[serde(rename = "grace_ms", deserialize_with = "duration_ms")]
    pub grace: Duration,

    pub bus_capacity: usize,
}

impl Default for SchedulerConfig {
    /// - `max_preemptions = 6`
    /// - no throttle rules, no channel overrides
    /// - `retry_backoff = BackoffPolicy::default()` (1s doubling up to 60s)
    /// - `sweep_interval = 30s`, `idle_ttl = 0s`
    /// - `grace = 30s`, `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            max_preemptions: DEFAULT_MAX_PREEMPTIONS,
            channels: HashMap::new(),
            throttle: HashMap::new(),
            retry_backoff: BackoffPolicy::default(),
            sweep_interval: Duration::from_secs(30),
            idle_ttl: Duration::ZERO,
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
        }
    }
}

impl SchedulerConfig {
    /// Parses a config from TOML text and validates it.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: SchedulerConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads and parses a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Adds (or replaces) the throttle rule for a task type.
    pub fn with_throttle(mut self, task_type: impl Into<String>, rule: ThrottleRule) -> Self {
        self.throttle.insert(task_type.into(), rule);
        self
    }

    /// Overrides the preemption budget of one channel.
    pub fn with_channel_budget(mut self, channel: impl Into<String>, max_preemptions: u32) -> Self {
        self.channels
            .insert(channel.into(), ChannelOverride { max_preemptions });
        self
    }

    /// Rejects rules that could never admit a job or never expire.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (task_type, rule) in &self.throttle {
            if rule.window.is_zero() {
                return Err(ConfigError::ZeroWindow {
                    task_type: task_type.clone(),
                });
            }
            if rule.max_runs == 0 {
                return Err(ConfigError::ZeroRunLimit {
                    task_type: task_type.clone(),
                });
            }
        }
        Ok(())
    }

    /// Preemption budget for `channel`, honoring overrides.
    #[inline]
    pub fn max_preemptions_for(&self, channel: &str) -> u32 {
        self.channels
            .get(channel)
            .map_or(self.max_preemptions, |o| o.max_preemptions)
    }

    /// Periodic sweep cadence as an `Option` (`None` = disabled).
    #[inline]
    pub fn sweep_every(&self) -> Option<Duration> {
        (!self.sweep_interval.is_zero()).then_some(self.sweep_interval)
    }

    /// Idle eviction threshold as an `Option` (`None` = never evict).
    #[inline]
    pub fn idle_expiry(&self) -> Option<Duration> {
        (!self.idle_ttl.is_zero()).then_some(self.idle_ttl)
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Throttle rules keyed by [`TaskType`].
    pub fn throttle_rules(&self) -> impl Iterator<Item = (TaskType, ThrottleRule)> + '_ {
        self.throttle
            .iter()
            .map(|(k, rule)| (TaskType::from(k.as_str()), *rule))
    }
}

/// Reads a millisecond count into a [`Duration`].
pub(crate) fn duration_ms<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}
