//! Shared fixtures for the Pulse benchmarks.

use bytes::Bytes;
use serde_json::json;
use tenvis_pulse_engine::{ClientId, Engine, EngineConfig, LocalEngine, MemoryStore, SharedEngine};
use tokio::runtime::Runtime;

/// Project used by every benchmark.
pub const PROJECT: &str = "bench";

/// A multi-threaded runtime for async benchmarks.
///
/// # Panics
///
/// Panics if the runtime cannot be built.
#[must_use]
pub fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
}

/// A payload of `size` bytes.
#[must_use]
pub fn payload(size: usize) -> Bytes {
    Bytes::from(vec![0u8; size])
}

/// A local engine with the default configuration.
#[must_use]
pub fn local_engine() -> LocalEngine {
    LocalEngine::new()
}

/// A shared engine over the in-process store.
#[must_use]
pub fn shared_engine() -> SharedEngine<MemoryStore> {
    SharedEngine::new(MemoryStore::new(), EngineConfig::default())
}

/// Subscribe `count` clients to `channel`.
///
/// # Panics
///
/// Panics if the engine rejects a subscription.
pub async fn subscribe_many(engine: &dyn Engine, channel: &str, count: usize) {
    for i in 0..count {
        engine
            .add_subscription(PROJECT, channel, &ClientId::new(format!("conn-{i}")))
            .await
            .expect("subscription failed");
    }
}

/// Announce `count` users in `channel`.
///
/// # Panics
///
/// Panics if the engine rejects an entry.
pub async fn join_many(engine: &dyn Engine, channel: &str, count: usize) {
    for i in 0..count {
        engine
            .add_presence(
                PROJECT,
                "",
                channel,
                &format!("user-{i}"),
                json!({"name": format!("User {i}")}),
            )
            .await
            .expect("presence failed");
    }
}
