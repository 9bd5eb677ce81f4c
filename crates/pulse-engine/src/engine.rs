//! The engine interface.
//!
//! An [`Engine`] bundles the subscription registry, the presence store and
//! the history store behind one async interface. [`LocalEngine`] keeps
//! everything in process memory; [`SharedEngine`] keeps it in a store that
//! several server processes can reach. Callers cannot tell them apart except
//! through [`EngineError::Backend`].
//!
//! [`LocalEngine`]: crate::local::LocalEngine
//! [`SharedEngine`]: crate::shared::SharedEngine
//! [`EngineError::Backend`]: crate::error::EngineError::Backend

use crate::client::ClientId;
use crate::error::EngineResult;
use crate::key::{derive_key, derive_namespaced_key, ChannelKey};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Default presence timeout.
pub const DEFAULT_PRESENCE_TIMEOUT: Duration = Duration::from_secs(25);

/// Default number of retained history messages per channel.
pub const DEFAULT_HISTORY_SIZE: usize = 20;

/// Default bound on a single shared-store round trip.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(1);

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a presence entry lives without a refresh.
    pub presence_timeout: Duration,
    /// Maximum retained messages per channel. Zero disables history.
    pub history_size: usize,
    /// Upper bound for each shared-store call.
    pub operation_timeout: Duration,
    /// Prefix for every key written to a shared store.
    pub key_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            presence_timeout: DEFAULT_PRESENCE_TIMEOUT,
            history_size: DEFAULT_HISTORY_SIZE,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            key_prefix: "pulse".to_string(),
        }
    }
}

/// Subscription, presence and history state behind one interface.
///
/// Every operation validates its identifiers before touching the backend and
/// reports failures as values. Removing something that is not there succeeds.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Backend name, for logs and the health endpoint.
    fn name(&self) -> &'static str;

    /// The configuration the engine was built with.
    fn config(&self) -> &EngineConfig;

    /// Key under which subscriptions for (project, channel) are stored.
    ///
    /// # Errors
    ///
    /// Returns an error if an identifier is malformed.
    fn get_subscription_key(&self, project_id: &str, channel: &str) -> EngineResult<ChannelKey> {
        derive_key(project_id, channel)
    }

    /// Subscribe `client` to (project, channel). Idempotent.
    async fn add_subscription(
        &self,
        project_id: &str,
        channel: &str,
        client: &ClientId,
    ) -> EngineResult<()>;

    /// Unsubscribe `client` from (project, channel). Idempotent.
    async fn remove_subscription(
        &self,
        project_id: &str,
        channel: &str,
        client: &ClientId,
    ) -> EngineResult<()>;

    /// Current subscribers of (project, channel).
    async fn list_subscribers(
        &self,
        project_id: &str,
        channel: &str,
    ) -> EngineResult<HashSet<ClientId>>;

    /// Create or refresh the presence entry for `uid`.
    async fn add_presence(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
        uid: &str,
        user_info: Value,
    ) -> EngineResult<()>;

    /// Live presence entries, uid to user info.
    async fn get_presence(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
    ) -> EngineResult<HashMap<String, Value>>;

    /// Remove the presence entry for `uid`. Idempotent.
    async fn remove_presence(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
        uid: &str,
    ) -> EngineResult<()>;

    /// Append a message to the channel's bounded history.
    async fn add_history_message(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
        message: Bytes,
    ) -> EngineResult<()>;

    /// Retained messages, oldest first.
    async fn get_history(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
    ) -> EngineResult<Vec<Bytes>>;

    /// Evict expired state proactively.
    ///
    /// Returns the number of removed presence entries. Backends with native
    /// expiry have nothing to do.
    async fn sweep(&self) -> EngineResult<usize> {
        Ok(0)
    }

    /// Resolve the fan-out set for a publication and record it in history.
    ///
    /// The message is appended to history only when `retain_history` is set.
    async fn publish(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
        message: Bytes,
        retain_history: bool,
    ) -> EngineResult<HashSet<ClientId>> {
        derive_key(project_id, channel)?;
        derive_namespaced_key(project_id, namespace, channel)?;

        let subscribers = self.list_subscribers(project_id, channel).await?;
        if retain_history {
            self.add_history_message(project_id, namespace, channel, message)
                .await?;
        }
        Ok(subscribers)
    }
}
