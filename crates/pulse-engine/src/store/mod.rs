//! Shared store abstraction.
//!
//! A [`SharedStore`] exposes the handful of data-structure primitives the
//! [`SharedEngine`](crate::shared::SharedEngine) needs. Each primitive must be
//! atomic as observed by every process talking to the same store.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use crate::error::{BackendError, EngineError};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Result alias for store primitives.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store-level failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store replied with something the client did not expect.
    #[error("unexpected reply: {0}")]
    Protocol(String),
}

impl From<StoreError> for BackendError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Self::Unavailable(msg),
            StoreError::Protocol(msg) => Self::Protocol(msg),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        Self::Backend(err.into())
    }
}

/// Data-structure primitives of a network-addressable store.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Store name, for logs.
    fn name(&self) -> &'static str;

    /// Add `member` to the set at `key`.
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()>;

    /// Remove `member` from the set at `key`.
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()>;

    /// All members of the set at `key`.
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Upsert `uid` with `user_info` and restart its expiry at `ttl`.
    async fn presence_refresh(
        &self,
        key: &str,
        uid: &str,
        user_info: &str,
        ttl: Duration,
    ) -> StoreResult<()>;

    /// Remove `uid` from the presence map at `key`.
    async fn presence_remove(&self, key: &str, uid: &str) -> StoreResult<()>;

    /// Unexpired (uid, user_info) pairs at `key`.
    async fn presence_live(&self, key: &str) -> StoreResult<Vec<(String, String)>>;

    /// Append `value` to the list at `key` and keep only the last `cap`.
    async fn list_push_trim(&self, key: &str, value: Bytes, cap: usize) -> StoreResult<()>;

    /// The whole list at `key`, oldest first.
    async fn list_range(&self, key: &str) -> StoreResult<Vec<Bytes>>;
}
