//! Publication envelope.
//!
//! The engine stores history entries as opaque bytes. The server wraps every
//! published payload in a [`Message`] and serializes it to JSON before it
//! reaches the engine.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tenvis_pulse_engine::ClientId;

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

/// Generate a unique message ID.
#[must_use]
pub fn generate_message_id() -> String {
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", unix_nanos(), counter)
}

/// A published message as retained in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub uid: String,
    /// Publishing client, if the message came from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientId>,
    /// Namespace the channel belongs to.
    pub namespace: String,
    /// Target channel.
    pub channel: String,
    /// Application payload.
    pub data: Value,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(namespace: impl Into<String>, channel: impl Into<String>, data: Value) -> Self {
        Self {
            uid: generate_message_id(),
            client: None,
            namespace: namespace.into(),
            channel: channel.into(),
            data,
            timestamp: u64::try_from(unix_nanos() / 1_000_000).unwrap_or(u64::MAX),
        }
    }

    /// Set the publishing client.
    #[must_use]
    pub fn with_client(mut self, client: ClientId) -> Self {
        self.client = Some(client);
        self
    }

    /// Serialize for storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// Deserialize a stored message.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid message.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
