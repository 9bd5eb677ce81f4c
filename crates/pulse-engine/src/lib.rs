//! # pulse-engine
//!
//! Subscription, presence and history state for the Pulse realtime server.
//!
//! This crate provides the state-management core:
//!
//! - **Key** - Collision-free channel key derivation
//! - **Registry** - Which clients are subscribed to which channels
//! - **Presence** - Who is currently in a channel, with TTL expiry
//! - **History** - A bounded buffer of recent messages per channel
//! - **Engine** - One async interface over all three, with a local and a
//!   shared backend
//!
//! ## Architecture
//!
//! ```text
//!                     ┌──────────────────┐
//!                     │   dyn Engine     │
//!                     └──────────────────┘
//!                       │              │
//!                       ▼              ▼
//!             ┌─────────────┐    ┌──────────────┐     ┌──────────────┐
//!             │ LocalEngine │    │ SharedEngine │────▶│ SharedStore  │
//!             └─────────────┘    └──────────────┘     └──────────────┘
//!              │    │     │                            │           │
//!              ▼    ▼     ▼                            ▼           ▼
//!       Registry Presence History               MemoryStore   RedisStore
//! ```
//!
//! ## Example
//!
//! ```rust
//! use tenvis_pulse_engine::{ClientId, Engine, LocalEngine};
//!
//! # tokio_test_block_on(async {
//! let engine = LocalEngine::new();
//! let client = ClientId::new("conn-1");
//! engine.add_subscription("project", "news", &client).await?;
//! let subscribers = engine.list_subscribers("project", "news").await?;
//! assert!(subscribers.contains(&client));
//! # Ok::<(), tenvis_pulse_engine::EngineError>(())
//! # }).unwrap();
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

pub mod client;
pub mod engine;
pub mod error;
pub mod history;
pub mod key;
pub mod local;
pub mod presence;
pub mod registry;
pub mod shared;
pub mod store;

#[cfg(test)]
mod conformance;

pub use client::ClientId;
pub use engine::{Engine, EngineConfig};
pub use error::{BackendError, EngineError, EngineResult};
pub use key::{derive_key, derive_namespaced_key, ChannelKey};
pub use local::{EngineStats, LocalEngine};
pub use shared::SharedEngine;
pub use store::{MemoryStore, SharedStore, StoreError};

#[cfg(feature = "redis")]
pub use store::RedisStore;
