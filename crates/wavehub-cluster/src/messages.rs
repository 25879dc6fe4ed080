//! Wire format of the cluster pub/sub topics.
//!
//! Every instance subscribes to all four topics and filters on the
//! (endpoint, channel) pair carried in each message body.

use serde::{Deserialize, Serialize};

use wavehub_core::types::{ChannelId, EndpointId, StateMap, UserId};
use wavehub_engine::ChannelEvent;

use crate::keys::StateKind;

/// The shared pub/sub topic names.
pub mod topics {
    /// Presence writes and deletions.
    pub const PRESENCE_CHANGES: &str = "presence_changes";
    /// Assigns writes and deletions.
    pub const ASSIGNS_CHANGES: &str = "assigns_changes";
    /// Full event envelopes fanned out to every instance.
    pub const CHANNEL_MESSAGES: &str = "channel_messages";
    /// User-leave notifications.
    pub const USER_LEAVES: &str = "user_leaves";
}

/// The topic a state kind is published on.
pub fn state_topic(kind: StateKind) -> &'static str {
    match kind {
        StateKind::Presence => topics::PRESENCE_CHANGES,
        StateKind::Assigns => topics::ASSIGNS_CHANGES,
    }
}

/// One user's presence or assigns changed. `state: null` means the entry
/// was deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangeMessage {
    /// Affected user.
    pub user_id: UserId,
    /// Channel the state belongs to.
    pub channel_id: ChannelId,
    /// Endpoint the channel belongs to.
    pub endpoint_id: EndpointId,
    /// New state, or `None` on deletion.
    #[serde(default)]
    pub state: Option<StateMap>,
}

/// A full event envelope relayed to every instance of a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessageEnvelope {
    /// Endpoint the channel belongs to.
    pub endpoint_id: EndpointId,
    /// Channel the message belongs to.
    pub channel_id: ChannelId,
    /// The relayed envelope.
    pub message: ChannelEvent,
}

/// A user left a channel somewhere in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLeaveMessage {
    /// Endpoint the channel belongs to.
    pub endpoint_id: EndpointId,
    /// Channel the user left.
    pub channel_id: ChannelId,
    /// The departed user.
    pub user_id: UserId,
}
