//! Channel-level request types.

use serde::{Deserialize, Serialize};

use wavehub_core::types::{RequestId, UserId};

/// Originator of a channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sender {
    /// A channel member.
    User(UserId),
    /// The channel system itself.
    System,
}

impl Sender {
    /// The member id, when the sender is a user.
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::User(user_id) => Some(user_id),
            Self::System => None,
        }
    }
}

/// Which members a message should be delivered to. Resolved to a concrete
/// id list before publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientSpec {
    /// Every channel member.
    All,
    /// Every member except the sender. Invalid for the system sender.
    AllExceptSender,
    /// An explicit member list. Invalid if any id is not a member.
    Users(Vec<UserId>),
}

/// An inbound message from a connected client, before it enters the
/// middleware chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage {
    /// Event name the client emitted.
    pub event: String,
    /// Client-supplied payload.
    pub payload: serde_json::Value,
    /// Correlation id, if the client supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}
