//! Channel key derivation.
//!
//! Every map in the engine is indexed by a [`ChannelKey`]. Keys are built from
//! length-prefixed components so that identifiers containing the separator
//! characters can never collide with each other.

use crate::error::{EngineError, EngineResult};
use std::fmt;
use std::fmt::Write as _;

const SUBSCRIPTION_TAG: &str = "sub";
const NAMESPACED_TAG: &str = "ns";

/// A deterministic key for a (project, channel) or
/// (project, namespace, channel) tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey(String);

impl ChannelKey {
    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validate one identifier component.
///
/// Any non-empty string is accepted; the length-prefixed encoding keeps
/// arbitrary content collision-free.
///
/// # Errors
///
/// Returns [`EngineError::InvalidInput`] naming the empty component.
pub fn validate_identifier(component: &'static str, value: &str) -> EngineResult<()> {
    if value.is_empty() {
        return Err(EngineError::InvalidInput {
            component,
            reason: "cannot be empty",
        });
    }
    Ok(())
}

/// Derive the subscription key for a (project, channel) pair.
///
/// # Errors
///
/// Returns an error if either identifier is malformed.
pub fn derive_key(project_id: &str, channel: &str) -> EngineResult<ChannelKey> {
    validate_identifier("project", project_id)?;
    validate_identifier("channel", channel)?;
    Ok(encode(SUBSCRIPTION_TAG, &[project_id, channel]))
}

/// Derive the presence/history key for a (project, namespace, channel) tuple.
///
/// An empty namespace stands for the project's default namespace.
///
/// # Errors
///
/// Returns an error if any identifier is malformed.
pub fn derive_namespaced_key(
    project_id: &str,
    namespace: &str,
    channel: &str,
) -> EngineResult<ChannelKey> {
    validate_identifier("project", project_id)?;
    validate_identifier("channel", channel)?;
    Ok(encode(NAMESPACED_TAG, &[project_id, namespace, channel]))
}

fn encode(tag: &str, parts: &[&str]) -> ChannelKey {
    let capacity = tag.len() + 1 + parts.iter().map(|p| p.len() + 4).sum::<usize>();
    let mut key = String::with_capacity(capacity);
    key.push_str(tag);
    key.push('|');
    for part in parts {
        // Writing into a String cannot fail.
        let _ = write!(key, "{}:{}", part.len(), part);
    }
    ChannelKey(key)
}
