//! The application layer.
//!
//! [`Application`] owns the process's single engine and turns transport
//! events into engine calls. It also remembers what each client created so a
//! disconnect can clean up after it.

use crate::config::NamespaceConfig;
use crate::message::Message;
use crate::metrics;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tenvis_pulse_engine::{ClientId, Engine, EngineError};
use thiserror::Error;
use tracing::{debug, warn};

/// Application errors.
#[derive(Debug, Error)]
pub enum AppError {
    /// Presence is switched off for the namespace.
    #[error("Presence disabled for namespace: {0:?}")]
    PresenceDisabled(String),

    /// The engine rejected or failed the operation.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Channel behavior configured per namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceOptions {
    /// Retain published messages.
    pub history: bool,
    /// Allow presence.
    pub presence: bool,
}

impl Default for NamespaceOptions {
    fn default() -> Self {
        Self {
            history: true,
            presence: true,
        }
    }
}

/// A (project, channel) subscription.
type SubscriptionScope = (String, String);
/// A (project, namespace, channel) presence scope.
type PresenceScope = (String, String, String);

/// What one client has created in the engine.
#[derive(Debug, Default)]
struct ClientState {
    subscriptions: HashSet<SubscriptionScope>,
    presence: HashSet<PresenceScope>,
}

impl ClientState {
    fn is_empty(&self) -> bool {
        self.subscriptions.is_empty() && self.presence.is_empty()
    }
}

/// The result of a publication.
#[derive(Debug, Clone)]
pub struct Publication {
    /// The message as stored in history.
    pub message: Message,
    /// Clients the transport should deliver to.
    pub recipients: HashSet<ClientId>,
}

/// Routes transport events into the engine.
pub struct Application {
    engine: Arc<dyn Engine>,
    namespaces: HashMap<String, NamespaceOptions>,
    clients: DashMap<ClientId, ClientState>,
}

impl Application {
    /// Create an application around `engine`.
    #[must_use]
    pub fn new(engine: Arc<dyn Engine>, namespaces: &[NamespaceConfig]) -> Self {
        let namespaces = namespaces
            .iter()
            .map(|ns| {
                (
                    ns.name.clone(),
                    NamespaceOptions {
                        history: ns.history,
                        presence: ns.presence,
                    },
                )
            })
            .collect();

        Self {
            engine,
            namespaces,
            clients: DashMap::new(),
        }
    }

    /// The engine this application runs on.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Options for `namespace`, falling back to defaults.
    #[must_use]
    pub fn namespace_options(&self, namespace: &str) -> NamespaceOptions {
        self.namespaces.get(namespace).copied().unwrap_or_default()
    }

    /// Number of clients with live state.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Subscribe a client to a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails.
    pub async fn subscribe(
        &self,
        project_id: &str,
        channel: &str,
        client: &ClientId,
    ) -> Result<(), AppError> {
        timed(
            "add_subscription",
            self.engine.add_subscription(project_id, channel, client),
        )
        .await?;

        self.clients
            .entry(client.clone())
            .or_default()
            .subscriptions
            .insert((project_id.to_string(), channel.to_string()));
        metrics::record_subscription();
        self.update_client_gauge();
        debug!(client = %client, project = %project_id, channel = %channel, "Subscribed");
        Ok(())
    }

    /// Unsubscribe a client from a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails.
    pub async fn unsubscribe(
        &self,
        project_id: &str,
        channel: &str,
        client: &ClientId,
    ) -> Result<(), AppError> {
        timed(
            "remove_subscription",
            self.engine.remove_subscription(project_id, channel, client),
        )
        .await?;

        self.forget(client, |state| {
            state
                .subscriptions
                .remove(&(project_id.to_string(), channel.to_string()));
        });
        debug!(client = %client, project = %project_id, channel = %channel, "Unsubscribed");
        Ok(())
    }

    /// Publish `data` to a channel.
    ///
    /// Returns the stored message and the subscribers to deliver it to.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded or the engine fails.
    pub async fn publish(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
        client: Option<&ClientId>,
        data: Value,
    ) -> Result<Publication, AppError> {
        let mut message = Message::new(namespace, channel, data);
        if let Some(client) = client {
            message = message.with_client(client.clone());
        }
        let encoded = message.encode().map_err(EngineError::from)?;
        let retain = self.namespace_options(namespace).history;

        let recipients = timed(
            "publish",
            self.engine
                .publish(project_id, namespace, channel, encoded, retain),
        )
        .await?;

        metrics::record_publication(recipients.len());
        debug!(
            project = %project_id,
            namespace = %namespace,
            channel = %channel,
            recipients = recipients.len(),
            "Published"
        );
        Ok(Publication {
            message,
            recipients,
        })
    }

    /// Announce or refresh `uid` in a channel's presence.
    ///
    /// # Errors
    ///
    /// Returns an error if presence is disabled for the namespace or the
    /// engine fails.
    pub async fn join_presence(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
        uid: &str,
        user_info: Value,
    ) -> Result<(), AppError> {
        if !self.namespace_options(namespace).presence {
            return Err(AppError::PresenceDisabled(namespace.to_string()));
        }

        timed(
            "add_presence",
            self.engine
                .add_presence(project_id, namespace, channel, uid, user_info),
        )
        .await?;

        self.clients
            .entry(ClientId::from(uid))
            .or_default()
            .presence
            .insert((
                project_id.to_string(),
                namespace.to_string(),
                channel.to_string(),
            ));
        metrics::record_presence_join();
        self.update_client_gauge();
        Ok(())
    }

    /// Remove `uid` from a channel's presence.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails.
    pub async fn leave_presence(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
        uid: &str,
    ) -> Result<(), AppError> {
        timed(
            "remove_presence",
            self.engine
                .remove_presence(project_id, namespace, channel, uid),
        )
        .await?;

        self.forget(&ClientId::from(uid), |state| {
            state.presence.remove(&(
                project_id.to_string(),
                namespace.to_string(),
                channel.to_string(),
            ));
        });
        Ok(())
    }

    /// Live presence of a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if presence is disabled for the namespace or the
    /// engine fails.
    pub async fn presence(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
    ) -> Result<HashMap<String, Value>, AppError> {
        if !self.namespace_options(namespace).presence {
            return Err(AppError::PresenceDisabled(namespace.to_string()));
        }
        Ok(timed(
            "get_presence",
            self.engine.get_presence(project_id, namespace, channel),
        )
        .await?)
    }

    /// Retained messages of a channel, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails or a stored message is corrupt.
    pub async fn history(
        &self,
        project_id: &str,
        namespace: &str,
        channel: &str,
    ) -> Result<Vec<Message>, AppError> {
        let entries = timed(
            "get_history",
            self.engine.get_history(project_id, namespace, channel),
        )
        .await?;

        entries
            .iter()
            .map(|bytes| Message::decode(bytes).map_err(|e| AppError::Engine(e.into())))
            .collect()
    }

    /// Drop everything `client` created.
    ///
    /// Every cleanup step is attempted even if an earlier one fails; scopes
    /// that could not be cleaned stay tracked so a later call can retry.
    ///
    /// # Errors
    ///
    /// Returns the first engine error encountered.
    pub async fn disconnect(&self, client: &ClientId) -> Result<(), AppError> {
        let Some((_, state)) = self.clients.remove(client) else {
            return Ok(());
        };

        let mut first_error = None;
        let mut leftover = ClientState::default();

        for (project_id, channel) in state.subscriptions {
            let result = timed(
                "remove_subscription",
                self.engine.remove_subscription(&project_id, &channel, client),
            )
            .await;
            if let Err(e) = result {
                warn!(client = %client, channel = %channel, error = %e, "Cleanup failed");
                leftover.subscriptions.insert((project_id, channel));
                first_error.get_or_insert(e);
            }
        }

        for (project_id, namespace, channel) in state.presence {
            let result = timed(
                "remove_presence",
                self.engine
                    .remove_presence(&project_id, &namespace, &channel, client.as_str()),
            )
            .await;
            if let Err(e) = result {
                warn!(client = %client, channel = %channel, error = %e, "Cleanup failed");
                leftover.presence.insert((project_id, namespace, channel));
                first_error.get_or_insert(e);
            }
        }

        if !leftover.is_empty() {
            let mut state = self.clients.entry(client.clone()).or_default();
            state.subscriptions.extend(leftover.subscriptions);
            state.presence.extend(leftover.presence);
        }
        self.update_client_gauge();
        debug!(client = %client, "Disconnected");

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn forget(&self, client: &ClientId, update: impl FnOnce(&mut ClientState)) {
        if let Some(mut state) = self.clients.get_mut(client) {
            update(&mut state);
        }
        self.clients.remove_if(client, |_, state| state.is_empty());
        self.update_client_gauge();
    }

    fn update_client_gauge(&self) {
        metrics::set_active_clients(self.clients.len());
    }
}

/// Run an engine call and record its outcome.
async fn timed<T>(
    op: &'static str,
    fut: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    let start = Instant::now();
    let result = fut.await;
    metrics::record_operation(op, start.elapsed().as_secs_f64(), result.as_ref().err());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tenvis_pulse_engine::{EngineConfig, LocalEngine, MemoryStore, SharedEngine};

    fn namespaces() -> Vec<NamespaceConfig> {
        vec![
            NamespaceConfig {
                name: "ephemeral".to_string(),
                history: false,
                presence: true,
            },
            NamespaceConfig {
                name: "quiet".to_string(),
                history: true,
                presence: false,
            },
        ]
    }

    fn local_app() -> Application {
        Application::new(Arc::new(LocalEngine::new()), &namespaces())
    }

    #[tokio::test]
    async fn test_publish_fans_out_and_retains() {
        let app = local_app();
        let alice = ClientId::new("alice");
        let bob = ClientId::new("bob");
        app.subscribe("demo", "room", &alice).await.unwrap();
        app.subscribe("demo", "room", &bob).await.unwrap();

        let publication = app
            .publish("demo", "", "room", Some(&alice), json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(publication.recipients.len(), 2);

        let history = app.history("demo", "", "room").await.unwrap();
        assert_eq!(history, vec![publication.message]);
    }

    #[tokio::test]
    async fn test_namespace_without_history() {
        let app = local_app();
        app.publish("demo", "ephemeral", "room", None, json!(1))
            .await
            .unwrap();
        assert!(app.history("demo", "ephemeral", "room").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_namespace_without_presence() {
        let app = local_app();
        let err = app
            .join_presence("demo", "quiet", "room", "alice", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PresenceDisabled(_)));
    }

    #[tokio::test]
    async fn test_disconnect_cleans_up() {
        let app = local_app();
        let alice = ClientId::new("alice");
        app.subscribe("demo", "a", &alice).await.unwrap();
        app.subscribe("demo", "b", &alice).await.unwrap();
        app.join_presence("demo", "", "a", "alice", json!({"name": "Alice"}))
            .await
            .unwrap();
        assert_eq!(app.client_count(), 1);

        app.disconnect(&alice).await.unwrap();

        assert_eq!(app.client_count(), 0);
        let engine = app.engine();
        assert!(engine.list_subscribers("demo", "a").await.unwrap().is_empty());
        assert!(engine.list_subscribers("demo", "b").await.unwrap().is_empty());
        assert!(app.presence("demo", "", "a").await.unwrap().is_empty());

        // Disconnecting twice is harmless.
        app.disconnect(&alice).await.unwrap();
    }

    #[tokio::test]
    async fn test_leave_presence_removes_only_that_member() {
        let app = local_app();
        app.join_presence("demo", "", "room", "alice", json!({"name": "Alice"}))
            .await
            .unwrap();
        app.join_presence("demo", "", "room", "bob", json!({"name": "Bob"}))
            .await
            .unwrap();
        assert_eq!(app.client_count(), 2);

        app.leave_presence("demo", "", "room", "alice").await.unwrap();

        let presence = app.presence("demo", "", "room").await.unwrap();
        assert!(!presence.contains_key("alice"));
        assert_eq!(presence.get("bob"), Some(&json!({"name": "Bob"})));
        assert_eq!(app.client_count(), 1);

        // Leaving twice is harmless.
        app.leave_presence("demo", "", "room", "alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe_forgets_client() {
        let app = local_app();
        let alice = ClientId::new("alice");
        app.subscribe("demo", "a", &alice).await.unwrap();
        app.unsubscribe("demo", "a", &alice).await.unwrap();
        assert_eq!(app.client_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_keeps_state_when_backend_down() {
        let engine = Arc::new(SharedEngine::new(
            MemoryStore::new(),
            EngineConfig {
                operation_timeout: Duration::from_millis(200),
                ..EngineConfig::default()
            },
        ));
        let app = Application::new(engine.clone(), &[]);
        let alice = ClientId::new("alice");
        app.subscribe("demo", "a", &alice).await.unwrap();

        engine.store().set_available(false);
        let err = app.disconnect(&alice).await.unwrap_err();
        assert!(matches!(err, AppError::Engine(ref e) if e.is_backend()));
        assert_eq!(app.client_count(), 1);

        engine.store().set_available(true);
        app.disconnect(&alice).await.unwrap();
        assert_eq!(app.client_count(), 0);
        assert!(engine.list_subscribers("demo", "a").await.unwrap().is_empty());
    }
}
