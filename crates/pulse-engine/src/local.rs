//! Process-local engine.
//!
//! All state lives in [`DashMap`](dashmap::DashMap)s keyed by channel key.
//! Operations never suspend and never fail except on malformed input.

use crate::client::ClientId;
use crate::engine::{Engine, EngineConfig};
use crate::error::EngineResult;
use crate::history::HistoryStore;
use crate::key::{derive_key, derive_namespaced_key, validate_identifier, ChannelKey};
use crate::presence::PresenceStore;
use crate::registry::SubscriptionRegistry;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Engine keeping all state in process memory.
#[derive(Debug)]
pub struct LocalEngine {
    config: EngineConfig,
    subscriptions: SubscriptionRegistry,
    presence: PresenceStore,
    history: HistoryStore,
}

impl LocalEngine {
    /// Create a local engine with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create a local engine with custom configuration.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        info!("Creating local engine with config: {:?}", config);
        Self {
            subscriptions: SubscriptionRegistry::new(),
            presence: PresenceStore::new(config.presence_timeout),
            history: HistoryStore::new(config.history_size),
            config,
        }
    }

    /// Whether any client is subscribed under `key`.
    #[must_use]
    pub fn has_subscriptions(&self, key: &ChannelKey) -> bool {
        self.subscriptions.contains_key(key)
    }

    /// Get engine statistics.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            subscription_channels: self.subscriptions.channel_count(),
            total_subscriptions: self.subscriptions.subscription_count(),
            presence_channels: self.presence.channel_count(),
            history_channels: self.history.channel_count(),
        }
    }
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for LocalEngine {
    fn name(&self) -> &'static str {
        "local"
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn add_subscription(
        &self,
        project_id: &str,
        channel: &str,
        client: &ClientId,
    ) -> EngineResult<()> {
        let key = derive_key(project_id, channel)?;
        self.subscriptions.add(&key, client);
        Ok(())
    }

    async fn remove_subscription(
        &self,
        project_id: &str,
        channel: &str,
        client: &ClientId,
    ) -> EngineResult<()> {
        let key = derive_key(project_id, channel)?;
        self.subscriptions.remove(&key, client);
        Ok(())
    }

    async fn list_subscribers(
        &self,
        project_id: &str,
        channel: &str,
    ) -> EngineResult<HashSet<ClientId>> {
        let key = derive_key(project_id, channel)?;
        Ok(self.subscriptions.subscribers(&key))
    }

    async fn add_presence(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
        uid: &str,
        user_info: Value,
    ) -> EngineResult<()> {
        let key = derive_namespaced_key(project_id, namespace, channel)?;
        validate_identifier("uid", uid)?;
        self.presence.add(&key, uid, user_info);
        Ok(())
    }

    async fn get_presence(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
    ) -> EngineResult<HashMap<String, Value>> {
        let key = derive_namespaced_key(project_id, namespace, channel)?;
        Ok(self.presence.get(&key))
    }

    async fn remove_presence(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
        uid: &str,
    ) -> EngineResult<()> {
        let key = derive_namespaced_key(project_id, namespace, channel)?;
        validate_identifier("uid", uid)?;
        self.presence.remove(&key, uid);
        Ok(())
    }

    async fn add_history_message(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
        message: Bytes,
    ) -> EngineResult<()> {
        let key = derive_namespaced_key(project_id, namespace, channel)?;
        self.history.push(&key, message);
        Ok(())
    }

    async fn get_history(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
    ) -> EngineResult<Vec<Bytes>> {
        let key = derive_namespaced_key(project_id, namespace, channel)?;
        Ok(self.history.get(&key))
    }

    async fn sweep(&self) -> EngineResult<usize> {
        let removed = self.presence.sweep();
        if removed > 0 {
            debug!(removed, "Swept expired presence entries");
        }
        Ok(removed)
    }
}

/// Local engine statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Channels with at least one subscriber.
    pub subscription_channels: usize,
    /// Total number of subscriptions.
    pub total_subscriptions: usize,
    /// Channels holding presence entries.
    pub presence_channels: usize,
    /// Channels with retained history.
    pub history_channels: usize,
}
