//! The internal event envelope delivered to channel subscribers.

use serde::{Deserialize, Serialize};

use wavehub_core::types::{ChannelId, RequestId, UserId};

use crate::presence::PresenceDiff;

use super::types::{MessageAction, PresencePayload};

/// The wire envelope used internally for every channel event.
///
/// Recipients are resolved once, at publish time, not re-filtered by
/// topic: every subscriber receives every envelope and discards it locally
/// if its own id is absent from `recipients`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEvent {
    /// Event name (e.g. `"chat"`, `"presence_join"`, `"acknowledge"`).
    pub event: String,
    /// Envelope classification.
    pub action: MessageAction,
    /// Name of the channel this event belongs to.
    pub channel_name: ChannelId,
    /// Correlation id, if the originating request carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// Event payload.
    pub payload: serde_json::Value,
    /// Resolved, concrete list of user ids this envelope is for.
    pub recipients: Vec<UserId>,
}

impl ChannelEvent {
    /// Build a system envelope.
    pub fn system(
        channel: &ChannelId,
        event: &str,
        payload: serde_json::Value,
        recipients: Vec<UserId>,
    ) -> Self {
        Self {
            event: event.to_string(),
            action: MessageAction::System,
            channel_name: channel.clone(),
            request_id: None,
            payload,
            recipients,
        }
    }

    /// Build an error envelope.
    pub fn error(
        channel: &ChannelId,
        event: &str,
        payload: serde_json::Value,
        recipients: Vec<UserId>,
    ) -> Self {
        Self {
            event: event.to_string(),
            action: MessageAction::Error,
            channel_name: channel.clone(),
            request_id: None,
            payload,
            recipients,
        }
    }

    /// Build a presence envelope from a mutation diff.
    ///
    /// Recipients are the presence key set after the mutation, never the
    /// assigns set.
    pub fn presence(channel: &ChannelId, diff: &PresenceDiff) -> Self {
        let payload = PresencePayload {
            changed: diff.changed.clone(),
            presence: diff.snapshot.clone(),
        };
        Self {
            event: diff.kind.event_name().to_string(),
            action: MessageAction::Presence,
            channel_name: channel.clone(),
            request_id: None,
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
            recipients: diff.recipients.clone(),
        }
    }

    /// Whether this envelope should be delivered to `user_id`.
    pub fn is_for(&self, user_id: &UserId) -> bool {
        self.recipients.contains(user_id)
    }
}
