//! Redis key builders for cluster coordination.
//!
//! Centralising key construction prevents typos and makes it easy to
//! find every key the cluster uses. Instance and endpoint ids must not
//! contain `:`; channel ids occupy the final segment and may.

use wavehub_core::types::{ChannelId, EndpointId, InstanceId};

/// Pattern matching every instance heartbeat key.
pub const HEARTBEAT_PATTERN: &str = "heartbeat:*";

/// Heartbeat key for one instance. Expires when the instance stops
/// refreshing it.
pub fn heartbeat(instance_id: &InstanceId) -> String {
    format!("heartbeat:{instance_id}")
}

/// The instance id of a heartbeat key, if `key` is one.
pub fn heartbeat_instance(key: &str) -> Option<InstanceId> {
    key.strip_prefix("heartbeat:").map(InstanceId::from)
}

/// Which of the two per-instance state caches a key or message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// Presence entries.
    Presence,
    /// Assigns entries.
    Assigns,
}

impl StateKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Presence => "presence_cache",
            Self::Assigns => "assigns_cache",
        }
    }

    /// Cache hash for one (instance, endpoint, channel).
    pub fn cache_key(
        self,
        instance_id: &InstanceId,
        endpoint_id: &EndpointId,
        channel_id: &ChannelId,
    ) -> String {
        format!(
            "{}:{instance_id}:{endpoint_id}:{channel_id}",
            self.prefix()
        )
    }

    /// Pattern matching this cache across every instance, for one
    /// (endpoint, channel).
    pub fn channel_pattern(self, endpoint_id: &EndpointId, channel_id: &ChannelId) -> String {
        format!("{}:*:{endpoint_id}:{channel_id}", self.prefix())
    }

    /// Pattern matching every key of this cache owned by one instance.
    pub fn instance_pattern(self, instance_id: &InstanceId) -> String {
        format!("{}:{instance_id}:*", self.prefix())
    }

    /// Pattern matching every key of this cache, cluster-wide.
    pub fn all_pattern(self) -> String {
        format!("{}:*", self.prefix())
    }
}

/// Parsed parts of a cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyParts {
    /// Which cache the key belongs to.
    pub kind: StateKind,
    /// Owning instance.
    pub instance_id: InstanceId,
    /// Endpoint segment.
    pub endpoint_id: EndpointId,
    /// Channel segment (everything after the third `:`).
    pub channel_id: ChannelId,
}

/// Splits a cache key back into its parts. Returns `None` for keys that
/// are not presence/assigns cache keys.
pub fn parse_cache_key(key: &str) -> Option<CacheKeyParts> {
    let (prefix, rest) = key.split_once(':')?;
    let kind = match prefix {
        "presence_cache" => StateKind::Presence,
        "assigns_cache" => StateKind::Assigns,
        _ => return None,
    };
    let mut parts = rest.splitn(3, ':');
    let instance_id = parts.next()?;
    let endpoint_id = parts.next()?;
    let channel_id = parts.next()?;
    Some(CacheKeyParts {
        kind,
        instance_id: InstanceId::from(instance_id),
        endpoint_id: EndpointId::from(endpoint_id),
        channel_id: ChannelId::from(channel_id),
    })
}
