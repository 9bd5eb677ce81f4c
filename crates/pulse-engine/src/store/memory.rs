//! In-process shared store.
//!
//! Implements the [`SharedStore`] primitives with the same semantics a remote
//! store provides, including per-field expiry. It is meant for tests and
//! single-node development, and supports fault injection so callers can
//! exercise the backend-error path.

use super::{SharedStore, StoreError, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct ExpiringField {
    value: String,
    expires_at: Instant,
}

/// Store primitives backed by process memory.
#[derive(Debug)]
pub struct MemoryStore {
    sets: DashMap<String, HashSet<String>>,
    hashes: DashMap<String, HashMap<String, ExpiringField>>,
    lists: DashMap<String, VecDeque<Bytes>>,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryStore {
    /// Create an empty, reachable store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing or regaining connectivity.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every round trip by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    async fn round_trip(&self) -> StoreResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            sets: DashMap::new(),
            hashes: DashMap::new(),
            lists: DashMap::new(),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        self.round_trip().await?;
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        self.round_trip().await?;
        if let Some(mut set) = self.sets.get_mut(key) {
            set.remove(member);
        }
        self.sets.remove_if(key, |_, set| set.is_empty());
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.round_trip().await?;
        Ok(self
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn presence_refresh(
        &self,
        key: &str,
        uid: &str,
        user_info: &str,
        ttl: Duration,
    ) -> StoreResult<()> {
        self.round_trip().await?;
        let field = ExpiringField {
            value: user_info.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(uid.to_string(), field);
        Ok(())
    }

    async fn presence_remove(&self, key: &str, uid: &str) -> StoreResult<()> {
        self.round_trip().await?;
        if let Some(mut fields) = self.hashes.get_mut(key) {
            fields.remove(uid);
        }
        self.hashes.remove_if(key, |_, fields| fields.is_empty());
        Ok(())
    }

    async fn presence_live(&self, key: &str) -> StoreResult<Vec<(String, String)>> {
        self.round_trip().await?;
        let now = Instant::now();
        let Some(mut fields) = self.hashes.get_mut(key) else {
            return Ok(Vec::new());
        };
        fields.retain(|_, field| field.expires_at > now);
        let live: Vec<(String, String)> = fields
            .iter()
            .map(|(uid, field)| (uid.clone(), field.value.clone()))
            .collect();
        drop(fields);

        if live.is_empty() {
            self.hashes.remove_if(key, |_, fields| fields.is_empty());
        }
        Ok(live)
    }

    async fn list_push_trim(&self, key: &str, value: Bytes, cap: usize) -> StoreResult<()> {
        self.round_trip().await?;
        let mut list = self.lists.entry(key.to_string()).or_default();
        list.push_back(value);
        while list.len() > cap {
            list.pop_front();
        }
        Ok(())
    }

    async fn list_range(&self, key: &str) -> StoreResult<Vec<Bytes>> {
        self.round_trip().await?;
        Ok(self
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }
}
