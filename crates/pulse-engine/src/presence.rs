//! Presence tracking.
//!
//! Presence records which clients are currently active in a channel, along
//! with the metadata they announced. Entries expire once they have gone
//! `presence_timeout` without a refresh.

use crate::key::ChannelKey;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Presence state for a single uid.
#[derive(Debug, Clone)]
pub struct PresenceState {
    /// User-defined metadata.
    pub user_info: Value,
    /// When the uid first joined.
    pub joined_at: Instant,
    /// Last refresh.
    pub last_refresh: Instant,
}

impl PresenceState {
    /// Create a new presence state refreshed at `now`.
    #[must_use]
    pub fn new(user_info: Value, now: Instant) -> Self {
        Self {
            user_info,
            joined_at: now,
            last_refresh: now,
        }
    }

    /// Replace the metadata and restart the expiry window.
    pub fn refresh(&mut self, user_info: Value, now: Instant) {
        self.user_info = user_info;
        self.last_refresh = now;
    }

    /// Whether the entry has reached the timeout at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_refresh) >= timeout
    }
}

/// Presence members of one channel.
#[derive(Debug, Default)]
pub struct Presence {
    members: HashMap<String, PresenceState>,
}

impl Presence {
    /// Create an empty presence map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or refresh a member.
    ///
    /// Returns `true` if this is a new member, `false` if refreshing.
    pub fn join(&mut self, uid: &str, user_info: Value, now: Instant) -> bool {
        match self.members.get_mut(uid) {
            Some(state) => {
                state.refresh(user_info, now);
                false
            }
            None => {
                self.members
                    .insert(uid.to_string(), PresenceState::new(user_info, now));
                true
            }
        }
    }

    /// Remove a member, returning its state if it was present.
    pub fn leave(&mut self, uid: &str) -> Option<PresenceState> {
        self.members.remove(uid)
    }

    /// Get a member's state.
    #[must_use]
    pub fn get(&self, uid: &str) -> Option<&PresenceState> {
        self.members.get(uid)
    }

    /// Members that have not expired at `now`.
    #[must_use]
    pub fn live(&self, now: Instant, timeout: Duration) -> HashMap<String, Value> {
        self.members
            .iter()
            .filter(|(_, state)| !state.is_expired(now, timeout))
            .map(|(uid, state)| (uid.clone(), state.user_info.clone()))
            .collect()
    }

    /// Remove expired members, returning their uids.
    pub fn prune_stale(&mut self, now: Instant, timeout: Duration) -> Vec<String> {
        let stale: Vec<String> = self
            .members
            .iter()
            .filter(|(_, state)| state.is_expired(now, timeout))
            .map(|(uid, _)| uid.clone())
            .collect();

        for uid in &stale {
            self.members.remove(uid);
        }
        stale
    }

    /// Number of members, expired or not.
    #[must_use]
    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// Check if presence is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Presence maps indexed by channel key.
#[derive(Debug)]
pub struct PresenceStore {
    channels: DashMap<ChannelKey, Presence>,
    timeout: Duration,
}

impl PresenceStore {
    /// Create a store whose entries expire after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            channels: DashMap::new(),
            timeout,
        }
    }

    /// The configured presence timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create or refresh `uid` under `key`.
    pub fn add(&self, key: &ChannelKey, uid: &str, user_info: Value) {
        let now = Instant::now();
        let mut presence = self.channels.entry(key.clone()).or_default();
        if presence.join(uid, user_info, now) {
            debug!(key = %key, uid = %uid, "Presence: member joined");
        } else {
            trace!(key = %key, uid = %uid, "Presence: member refreshed");
        }
    }

    /// Remove `uid` from `key`. Absent members are ignored.
    pub fn remove(&self, key: &ChannelKey, uid: &str) {
        let removed = match self.channels.get_mut(key) {
            Some(mut presence) => presence.leave(uid).is_some(),
            None => false,
        };
        if removed {
            self.channels.remove_if(key, |_, presence| presence.is_empty());
            debug!(key = %key, uid = %uid, "Presence: member left");
        }
    }

    /// Live members under `key`.
    ///
    /// Expired members found on the way are evicted.
    #[must_use]
    pub fn get(&self, key: &ChannelKey) -> HashMap<String, Value> {
        let now = Instant::now();
        let Some(mut presence) = self.channels.get_mut(key) else {
            return HashMap::new();
        };
        let pruned = presence.prune_stale(now, self.timeout);
        let live = presence.live(now, self.timeout);
        drop(presence);

        if !pruned.is_empty() {
            trace!(key = %key, pruned = pruned.len(), "Presence: evicted on read");
            self.channels.remove_if(key, |_, presence| presence.is_empty());
        }
        live
    }

    /// Evict expired members across all channels.
    ///
    /// Returns the number of removed entries. Expiry is evaluated under each
    /// channel's lock, so a refresh that lands first is never discarded.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.channels.retain(|key, presence| {
            let stale = presence.prune_stale(now, self.timeout);
            for uid in &stale {
                debug!(key = %key, uid = %uid, "Presence: pruned stale member");
            }
            removed += stale.len();
            !presence.is_empty()
        });
        removed
    }

    /// Number of channels holding presence entries.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
