//! # Channel registry.
//!
//! Maps channel ids to their [`ChannelSchedule`]. Entries are created on first
//! use with a full budget and live until evicted as idle (see
//! [`SchedulerConfig::idle_ttl`](crate::SchedulerConfig::idle_ttl)).
//!
//! The registry is owned by the controller task; it is never shared across
//! threads, so it needs no lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::channel::ChannelSchedule;

#[derive(Default)]
pub(crate) struct ChannelRegistry {
    channels: HashMap<Arc<str>, ChannelSchedule>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the channel's schedule, creating it with `max_preemptions` if absent.
    pub fn get_or_create(
        &mut self,
        channel: &str,
        max_preemptions: u32,
        now: Instant,
    ) -> &mut ChannelSchedule {
        self.channels
            .entry(Arc::from(channel))
            .or_insert_with_key(|id| ChannelSchedule::new(Arc::clone(id), max_preemptions, now))
    }

    pub fn get(&self, channel: &str) -> Option<&ChannelSchedule> {
        self.channels.get(channel)
    }

    pub fn get_mut(&mut self, channel: &str) -> Option<&mut ChannelSchedule> {
        self.channels.get_mut(channel)
    }

    /// Sorted channel ids.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.channels.keys().map(|k| k.to_string()).collect();
        ids.sort_unstable();
        ids
    }

    /// Ids of channels holding a pending job.
    pub fn waiting(&self) -> Vec<Arc<str>> {
        self.channels
            .values()
            .filter(|ch| ch.pending_job().is_some())
            .map(|ch| Arc::clone(ch.id()))
            .collect()
    }

    /// Channels with a running slot.
    pub fn busy(&self) -> impl Iterator<Item = &ChannelSchedule> {
        self.channels.values().filter(|ch| ch.running.is_some())
    }

    /// Removes channels idle for at least `ttl`; returns their ids.
    pub fn evict_idle(&mut self, now: Instant, ttl: Duration) -> Vec<Arc<str>> {
        let expired: Vec<Arc<str>> = self
            .channels
            .values()
            .filter(|ch| ch.is_expired(now, ttl))
            .map(|ch| Arc::clone(ch.id()))
            .collect();
        for id in &expired {
            self.channels.remove(id);
        }
        expired
    }

    /// Drops every pending job; used on shutdown.
    pub fn clear_pending(&mut self) -> usize {
        self.channels
            .values_mut()
            .filter_map(|ch| ch.take_pending())
            .count()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.channels.len()
    }
}
