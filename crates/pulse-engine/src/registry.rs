//! In-process subscription registry.
//!
//! Tracks, per channel key, the set of subscribed client ids. Empty sets are
//! removed eagerly so an unsubscribed channel leaves no trace.

use crate::client::ClientId;
use crate::key::ChannelKey;
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;

/// Subscription sets indexed by channel key.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    channels: DashMap<ChannelKey, HashSet<ClientId>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client to a channel's set.
    ///
    /// Returns `true` if the client was not already subscribed.
    pub fn add(&self, key: &ChannelKey, client: &ClientId) -> bool {
        let added = self
            .channels
            .entry(key.clone())
            .or_default()
            .insert(client.clone());
        if added {
            debug!(key = %key, client = %client, "Subscription added");
        }
        added
    }

    /// Remove a client from a channel's set.
    ///
    /// Returns `true` if the client was subscribed.
    pub fn remove(&self, key: &ChannelKey, client: &ClientId) -> bool {
        let removed = match self.channels.get_mut(key) {
            Some(mut set) => set.remove(client),
            None => false,
        };

        if removed {
            self.channels.remove_if(key, |_, set| set.is_empty());
            debug!(key = %key, client = %client, "Subscription removed");
        }
        removed
    }

    /// Snapshot of a channel's subscribers.
    #[must_use]
    pub fn subscribers(&self, key: &ChannelKey) -> HashSet<ClientId> {
        self.channels
            .get(key)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    /// Whether any client is subscribed under this key.
    #[must_use]
    pub fn contains_key(&self, key: &ChannelKey) -> bool {
        self.channels.contains_key(key)
    }

    /// Number of channels with at least one subscriber.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Total number of (channel, client) pairs.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.channels.iter().map(|set| set.len()).sum()
    }
}
