//! Behavioral suite every engine backend must pass.
//!
//! Each scenario is written once against `&dyn Engine` and instantiated for
//! [`LocalEngine`] and for [`SharedEngine`] over a [`MemoryStore`], both on
//! tokio's paused clock. With the `redis-tests` feature the suite also runs
//! against a live Redis on the real clock. Scenarios wait with `sleep`, which
//! the paused clock turns into an exact jump.

use crate::client::ClientId;
use crate::engine::{Engine, EngineConfig};
use crate::error::EngineError;
use crate::local::LocalEngine;
use crate::shared::SharedEngine;
use crate::store::MemoryStore;
use bytes::Bytes;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

const PROJECT: &str = "test";
const NAMESPACE: &str = "test";
const CHANNEL: &str = "test";

fn config() -> EngineConfig {
    EngineConfig {
        presence_timeout: Duration::from_secs(1),
        history_size: 2,
        operation_timeout: Duration::from_millis(500),
        key_prefix: "conformance".to_string(),
    }
}

async fn local(config: EngineConfig) -> Box<dyn Engine> {
    Box::new(LocalEngine::with_config(config))
}

async fn shared(config: EngineConfig) -> Box<dyn Engine> {
    Box::new(SharedEngine::new(MemoryStore::new(), config))
}

#[cfg(feature = "redis-tests")]
async fn live_redis(config: EngineConfig) -> Box<dyn Engine> {
    let url = crate::store::redis::live::url();
    let store = crate::store::RedisStore::connect(&url)
        .await
        .expect("redis reachable");
    // Every run gets its own keyspace.
    let key_prefix = format!("conformance:{}", ClientId::generate());
    Box::new(SharedEngine::new(store, EngineConfig { key_prefix, ..config }))
}

mod scenarios {
    use super::*;

    pub async fn subscription_lifecycle(engine: &dyn Engine) {
        let client = ClientId::new("conn-1");
        assert!(engine
            .list_subscribers(PROJECT, CHANNEL)
            .await
            .unwrap()
            .is_empty());

        engine
            .add_subscription(PROJECT, CHANNEL, &client)
            .await
            .unwrap();
        engine
            .add_subscription(PROJECT, CHANNEL, &client)
            .await
            .unwrap();
        let subscribers = engine.list_subscribers(PROJECT, CHANNEL).await.unwrap();
        assert_eq!(subscribers.len(), 1);
        assert!(subscribers.contains(&client));

        engine
            .remove_subscription(PROJECT, CHANNEL, &client)
            .await
            .unwrap();
        assert!(!engine
            .list_subscribers(PROJECT, CHANNEL)
            .await
            .unwrap()
            .contains(&client));

        // Removing again is a no-op.
        engine
            .remove_subscription(PROJECT, CHANNEL, &client)
            .await
            .unwrap();
    }

    pub async fn presence_lifecycle(engine: &dyn Engine) {
        let info = json!({});

        let result = engine.get_presence(PROJECT, NAMESPACE, CHANNEL).await.unwrap();
        assert!(result.is_empty());

        engine
            .add_presence(PROJECT, NAMESPACE, CHANNEL, "test-1", info.clone())
            .await
            .unwrap();
        let result = engine.get_presence(PROJECT, NAMESPACE, CHANNEL).await.unwrap();
        assert!(result.contains_key("test-1"));

        engine
            .add_presence(PROJECT, NAMESPACE, CHANNEL, "test-1", info.clone())
            .await
            .unwrap();
        let result = engine.get_presence(PROJECT, NAMESPACE, CHANNEL).await.unwrap();
        assert!(result.contains_key("test-1"));
        assert_eq!(result.len(), 1);

        engine
            .add_presence(PROJECT, NAMESPACE, CHANNEL, "test-2", info.clone())
            .await
            .unwrap();
        let result = engine.get_presence(PROJECT, NAMESPACE, CHANNEL).await.unwrap();
        assert!(result.contains_key("test-1"));
        assert!(result.contains_key("test-2"));
        assert_eq!(result.len(), 2);

        engine
            .remove_presence(PROJECT, NAMESPACE, CHANNEL, "test-2")
            .await
            .unwrap();
        let result = engine.get_presence(PROJECT, NAMESPACE, CHANNEL).await.unwrap();
        assert!(result.contains_key("test-1"));
        assert!(!result.contains_key("test-2"));
        assert_eq!(result.len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let result = engine.get_presence(PROJECT, NAMESPACE, CHANNEL).await.unwrap();
        assert!(result.is_empty());
    }

    pub async fn presence_remove_absent(engine: &dyn Engine) {
        engine
            .remove_presence(PROJECT, NAMESPACE, CHANNEL, "nobody")
            .await
            .unwrap();
        assert!(engine
            .get_presence(PROJECT, NAMESPACE, CHANNEL)
            .await
            .unwrap()
            .is_empty());
    }

    pub async fn presence_expiry_boundary(engine: &dyn Engine) {
        engine
            .add_presence(PROJECT, NAMESPACE, CHANNEL, "uid", json!({"name": "Alice"}))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(999)).await;
        let result = engine.get_presence(PROJECT, NAMESPACE, CHANNEL).await.unwrap();
        assert_eq!(result.get("uid"), Some(&json!({"name": "Alice"})));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(engine
            .get_presence(PROJECT, NAMESPACE, CHANNEL)
            .await
            .unwrap()
            .is_empty());
    }

    pub async fn presence_refresh_restarts_window(engine: &dyn Engine) {
        engine
            .add_presence(PROJECT, NAMESPACE, CHANNEL, "uid", json!(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        engine
            .add_presence(PROJECT, NAMESPACE, CHANNEL, "uid", json!(2))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        let result = engine.get_presence(PROJECT, NAMESPACE, CHANNEL).await.unwrap();
        assert_eq!(result.get("uid"), Some(&json!(2)));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(engine
            .get_presence(PROJECT, NAMESPACE, CHANNEL)
            .await
            .unwrap()
            .is_empty());
    }

    pub async fn presence_scoped_by_namespace(engine: &dyn Engine) {
        engine
            .add_presence(PROJECT, "a", CHANNEL, "uid", json!({}))
            .await
            .unwrap();
        assert!(engine
            .get_presence(PROJECT, "b", CHANNEL)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            engine.get_presence(PROJECT, "a", CHANNEL).await.unwrap().len(),
            1
        );
    }

    pub async fn history_cap(engine: &dyn Engine) {
        for (i, message) in ["m1", "m2", "m3"].into_iter().enumerate() {
            engine
                .add_history_message(PROJECT, NAMESPACE, CHANNEL, Bytes::from(message))
                .await
                .unwrap();
            let history = engine.get_history(PROJECT, NAMESPACE, CHANNEL).await.unwrap();
            assert_eq!(history.len(), (i + 1).min(2));
        }

        let history = engine.get_history(PROJECT, NAMESPACE, CHANNEL).await.unwrap();
        assert_eq!(history, vec![Bytes::from("m2"), Bytes::from("m3")]);
    }

    pub async fn history_empty(engine: &dyn Engine) {
        let history = engine.get_history(PROJECT, NAMESPACE, CHANNEL).await.unwrap();
        assert!(history.is_empty());
    }

    pub async fn publish_fan_out(engine: &dyn Engine) {
        let c1 = ClientId::new("conn-1");
        let c2 = ClientId::new("conn-2");
        engine.add_subscription(PROJECT, CHANNEL, &c1).await.unwrap();
        engine.add_subscription(PROJECT, CHANNEL, &c2).await.unwrap();

        let recipients = engine
            .publish(PROJECT, NAMESPACE, CHANNEL, Bytes::from("kept"), true)
            .await
            .unwrap();
        assert_eq!(recipients.len(), 2);

        let recipients = engine
            .publish(PROJECT, NAMESPACE, CHANNEL, Bytes::from("dropped"), false)
            .await
            .unwrap();
        assert!(recipients.contains(&c1) && recipients.contains(&c2));

        let history = engine.get_history(PROJECT, NAMESPACE, CHANNEL).await.unwrap();
        assert_eq!(history, vec![Bytes::from("kept")]);
    }

    pub async fn long_identifiers(engine: &dyn Engine) {
        let uid = "u".repeat(300);
        let channel = "c".repeat(300);
        engine
            .add_presence(PROJECT, NAMESPACE, &channel, &uid, json!({}))
            .await
            .unwrap();
        let presence = engine.get_presence(PROJECT, NAMESPACE, &channel).await.unwrap();
        assert!(presence.contains_key(&uid));

        engine
            .remove_presence(PROJECT, NAMESPACE, &channel, &uid)
            .await
            .unwrap();
        assert!(engine
            .get_presence(PROJECT, NAMESPACE, &channel)
            .await
            .unwrap()
            .is_empty());
    }

    pub async fn malformed_input(engine: &dyn Engine) {
        let client = ClientId::new("conn-1");
        assert!(matches!(
            engine.add_subscription("", CHANNEL, &client).await,
            Err(EngineError::InvalidInput { .. })
        ));
        assert!(matches!(
            engine.get_history(PROJECT, NAMESPACE, "").await,
            Err(EngineError::InvalidInput { .. })
        ));
        assert!(matches!(
            engine
                .publish(PROJECT, NAMESPACE, "", Bytes::new(), true)
                .await,
            Err(EngineError::InvalidInput { .. })
        ));
    }
}

macro_rules! conformance_suite {
    (#[$test:meta] $backend:ident => $ctor:path; [$($scenario:ident),* $(,)?]) => {
        mod $backend {
            use super::*;

            $(
                #[$test]
                async fn $scenario() {
                    let engine = $ctor(config()).await;
                    scenarios::$scenario(&*engine).await;
                }
            )*
        }
    };
}

conformance_suite! {
    #[tokio::test(start_paused = true)]
    local_backend => local;
    [
        subscription_lifecycle,
        presence_lifecycle,
        presence_remove_absent,
        presence_expiry_boundary,
        presence_refresh_restarts_window,
        presence_scoped_by_namespace,
        history_cap,
        history_empty,
        publish_fan_out,
        long_identifiers,
        malformed_input,
    ]
}

conformance_suite! {
    #[tokio::test(start_paused = true)]
    shared_backend => shared;
    [
        subscription_lifecycle,
        presence_lifecycle,
        presence_remove_absent,
        presence_expiry_boundary,
        presence_refresh_restarts_window,
        presence_scoped_by_namespace,
        history_cap,
        history_empty,
        publish_fan_out,
        long_identifiers,
        malformed_input,
    ]
}

// The millisecond boundary check needs the paused clock; the rest holds on
// a real one.
#[cfg(feature = "redis-tests")]
conformance_suite! {
    #[tokio::test]
    redis_backend => live_redis;
    [
        subscription_lifecycle,
        presence_lifecycle,
        presence_remove_absent,
        presence_refresh_restarts_window,
        presence_scoped_by_namespace,
        history_cap,
        history_empty,
        publish_fan_out,
        long_identifiers,
        malformed_input,
    ]
}

/// Run a fixed operation sequence and record everything observable.
async fn transcript(engine: &dyn Engine) -> Vec<String> {
    let mut out = Vec::new();
    let clients: Vec<ClientId> = (0..3).map(|i| ClientId::new(format!("conn-{i}"))).collect();

    for (i, client) in clients.iter().enumerate() {
        let channel = if i % 2 == 0 { "even" } else { "odd" };
        engine.add_subscription(PROJECT, channel, client).await.unwrap();
        engine
            .add_presence(PROJECT, NAMESPACE, channel, client.as_str(), json!({"i": i}))
            .await
            .unwrap();
    }
    engine
        .remove_subscription(PROJECT, "even", &clients[0])
        .await
        .unwrap();

    for n in 0..4 {
        let recipients = engine
            .publish(PROJECT, NAMESPACE, "even", Bytes::from(format!("msg-{n}")), true)
            .await
            .unwrap();
        let sorted: BTreeSet<String> = recipients.iter().map(ToString::to_string).collect();
        out.push(format!("publish {n} -> {sorted:?}"));
    }

    tokio::time::advance(Duration::from_millis(700)).await;
    engine
        .add_presence(PROJECT, NAMESPACE, "even", "conn-2", json!({"refreshed": true}))
        .await
        .unwrap();
    engine
        .remove_presence(PROJECT, NAMESPACE, "odd", "conn-1")
        .await
        .unwrap();
    tokio::time::advance(Duration::from_millis(500)).await;

    for channel in ["even", "odd"] {
        let subscribers: BTreeSet<String> = engine
            .list_subscribers(PROJECT, channel)
            .await
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        let presence: BTreeMap<String, String> = engine
            .get_presence(PROJECT, NAMESPACE, channel)
            .await
            .unwrap()
            .into_iter()
            .map(|(uid, info)| (uid, info.to_string()))
            .collect();
        let history: Vec<Bytes> = engine.get_history(PROJECT, NAMESPACE, channel).await.unwrap();
        out.push(format!("{channel} subscribers {subscribers:?}"));
        out.push(format!("{channel} presence {presence:?}"));
        out.push(format!("{channel} history {history:?}"));
    }
    out
}

#[tokio::test(start_paused = true)]
async fn backend_parity() {
    let local = transcript(&*local(config()).await).await;
    let shared = transcript(&*shared(config()).await).await;
    assert_eq!(local, shared);

    // Spot-check the transcript itself so parity cannot hide a shared bug.
    assert!(local.contains(&"even presence {\"conn-2\": \"{\\\"refreshed\\\":true}\"}".to_string()));
    assert!(local.contains(&"even history [b\"msg-2\", b\"msg-3\"]".to_string()));
}

#[tokio::test(start_paused = true)]
async fn backend_failure_isolation() {
    let engine = SharedEngine::new(MemoryStore::new(), config());
    let client = ClientId::new("conn-1");

    engine.add_subscription(PROJECT, CHANNEL, &client).await.unwrap();
    engine
        .add_history_message(PROJECT, NAMESPACE, CHANNEL, Bytes::from("before"))
        .await
        .unwrap();

    engine.store().set_available(false);
    let err = engine.get_presence(PROJECT, NAMESPACE, CHANNEL).await.unwrap_err();
    assert!(err.is_backend());
    let err = engine
        .add_history_message(PROJECT, NAMESPACE, CHANNEL, Bytes::from("lost"))
        .await
        .unwrap_err();
    assert!(err.is_backend());
    assert!(engine
        .list_subscribers(PROJECT, CHANNEL)
        .await
        .unwrap_err()
        .is_backend());

    engine.store().set_available(true);
    engine
        .add_history_message(PROJECT, NAMESPACE, CHANNEL, Bytes::from("after"))
        .await
        .unwrap();
    assert_eq!(
        engine.get_history(PROJECT, NAMESPACE, CHANNEL).await.unwrap(),
        vec![Bytes::from("before"), Bytes::from("after")]
    );
    assert!(engine
        .list_subscribers(PROJECT, CHANNEL)
        .await
        .unwrap()
        .contains(&client));
}
