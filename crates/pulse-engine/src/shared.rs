//! Engine backed by a shared store.
//!
//! Every operation is one bounded round trip to a [`SharedStore`]. Expiry and
//! trimming are delegated to the store's native primitives, so several
//! server processes pointed at the same store observe the same state.

use crate::client::ClientId;
use crate::engine::{Engine, EngineConfig};
use crate::error::{BackendError, EngineError, EngineResult};
use crate::key::{derive_key, derive_namespaced_key, validate_identifier, ChannelKey};
use crate::store::{SharedStore, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use tracing::{info, trace, warn};

/// Engine keeping all state in a [`SharedStore`].
#[derive(Debug)]
pub struct SharedEngine<S> {
    store: S,
    config: EngineConfig,
}

impl<S: SharedStore> SharedEngine<S> {
    /// Create a shared engine over `store`.
    #[must_use]
    pub fn new(store: S, config: EngineConfig) -> Self {
        info!(store = store.name(), "Creating shared engine with config: {:?}", config);
        Self { store, config }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    fn store_key(&self, kind: &str, key: &ChannelKey) -> String {
        format!("{}:{}:{}", self.config.key_prefix, kind, key)
    }

    /// Run one store call under the operation timeout.
    async fn call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = StoreResult<T>> + Send,
    ) -> EngineResult<T> {
        let timeout = self.config.operation_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(op, store = self.store.name(), error = %e, "Shared store call failed");
                Err(e.into())
            }
            Err(_) => {
                warn!(op, store = self.store.name(), ?timeout, "Shared store call timed out");
                Err(EngineError::Backend(BackendError::Timeout(timeout)))
            }
        }
    }
}

#[async_trait]
impl<S: SharedStore> Engine for SharedEngine<S> {
    fn name(&self) -> &'static str {
        "shared"
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
        let key = self.store_key("subs", &derive_key(project_id, channel)?);
        self.call("add_subscription", self.store.set_add(&key, client.as_str()))
            .await
    }

    async fn remove_subscription(
        &self,
        project_id: &str,
        channel: &str,
        client: &ClientId,
    ) -> EngineResult<()> {
        let key = self.store_key("subs", &derive_key(project_id, channel)?);
        self.call(
            "remove_subscription",
            self.store.set_remove(&key, client.as_str()),
        )
        .await
    }

    async fn list_subscribers(
        &self,
        project_id: &str,
        channel: &str,
    ) -> EngineResult<HashSet<ClientId>> {
        let key = self.store_key("subs", &derive_key(project_id, channel)?);
        let members = self
            .call("list_subscribers", self.store.set_members(&key))
            .await?;
        Ok(members.into_iter().map(ClientId::from).collect())
    }

    async fn add_presence(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
        uid: &str,
        user_info: Value,
    ) -> EngineResult<()> {
        let key = self.store_key(
            "presence",
            &derive_namespaced_key(project_id, namespace, channel)?,
        );
        validate_identifier("uid", uid)?;
        let encoded = serde_json::to_string(&user_info)?;
        self.call(
            "add_presence",
            self.store
                .presence_refresh(&key, uid, &encoded, self.config.presence_timeout),
        )
        .await
    }

    async fn get_presence(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
    ) -> EngineResult<HashMap<String, Value>> {
        let key = self.store_key(
            "presence",
            &derive_namespaced_key(project_id, namespace, channel)?,
        );
        let entries = self
            .call("get_presence", self.store.presence_live(&key))
            .await?;
        trace!(key = %key, members = entries.len(), "Presence read");

        entries
            .into_iter()
            .map(|(uid, info)| -> EngineResult<(String, Value)> {
                Ok((uid, serde_json::from_str(&info)?))
            })
            .collect()
    }

    async fn remove_presence(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
        uid: &str,
    ) -> EngineResult<()> {
        let key = self.store_key(
            "presence",
            &derive_namespaced_key(project_id, namespace, channel)?,
        );
        validate_identifier("uid", uid)?;
        self.call("remove_presence", self.store.presence_remove(&key, uid))
            .await
    }

    async fn add_history_message(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
        message: Bytes,
    ) -> EngineResult<()> {
        let key = self.store_key(
            "history",
            &derive_namespaced_key(project_id, namespace, channel)?,
        );
        if self.config.history_size == 0 {
            return Ok(());
        }
        self.call(
            "add_history_message",
            self.store
                .list_push_trim(&key, message, self.config.history_size),
        )
        .await
    }

    async fn get_history(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
    ) -> EngineResult<Vec<Bytes>> {
        let key = self.store_key(
            "history",
            &derive_namespaced_key(project_id, namespace, channel)?,
        );
        self.call("get_history", self.store.list_range(&key)).await
    }
}
