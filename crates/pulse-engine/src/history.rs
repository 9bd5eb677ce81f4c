//! Bounded per-channel message history.

use crate::key::ChannelKey;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use tracing::trace;

/// Recent messages indexed by channel key, oldest first.
#[derive(Debug)]
pub struct HistoryStore {
    channels: DashMap<ChannelKey, VecDeque<Bytes>>,
    capacity: usize,
}

impl HistoryStore {
    /// Create a store retaining at most `capacity` messages per channel.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    /// Maximum retained messages per channel.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a message, evicting the oldest ones past capacity.
    pub fn push(&self, key: &ChannelKey, message: Bytes) {
        if self.capacity == 0 {
            return;
        }

        let mut entries = self
            .channels
            .entry(key.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        entries.push_back(message);

        let mut evicted = 0;
        while entries.len() > self.capacity {
            entries.pop_front();
            evicted += 1;
        }
        trace!(key = %key, len = entries.len(), evicted, "History: message appended");
    }

    /// Retained messages in insertion order.
    #[must_use]
    pub fn get(&self, key: &ChannelKey) -> Vec<Bytes> {
        self.channels
            .get(key)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of channels with retained history.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
