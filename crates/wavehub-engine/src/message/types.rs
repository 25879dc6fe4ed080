//! Message action and presence event type definitions.

use serde::{Deserialize, Serialize};

use wavehub_core::types::StateMap;

/// Well-known event names emitted by the engine itself.
pub mod events {
    /// Sent to a member right after a successful join.
    pub const ACKNOWLEDGE: &str = "acknowledge";
    /// Sent privately to a member being kicked.
    pub const KICKED_OUT: &str = "kicked_out";
    /// Broadcast to remaining members after a kick.
    pub const KICKED: &str = "kicked";
    /// Broadcast to all members when a channel is destroyed.
    pub const DESTROYED: &str = "destroyed";
    /// Sent to a sender whose broadcast no handler consumed.
    pub const HANDLER_NOT_FOUND: &str = "handler_not_found";
}

/// Classification of an event envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageAction {
    /// A user-originated message.
    Broadcast,
    /// A presence change notification.
    Presence,
    /// An engine-originated system message.
    System,
    /// An engine-originated error notification.
    Error,
}

/// The kind of presence transition a mutation produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceEventKind {
    /// A presence entry was created.
    Join,
    /// An existing presence entry changed.
    Update,
    /// A presence entry was removed.
    Leave,
}

impl PresenceEventKind {
    /// The envelope event name for this transition.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Join => "presence_join",
            Self::Update => "presence_update",
            Self::Leave => "presence_leave",
        }
    }
}

/// Payload carried by presence envelopes.
///
/// `changed` is the affected user's new value (or last-known value on
/// removal); `presence` is the full current snapshot in cache order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresencePayload {
    /// The single affected user's state.
    pub changed: StateMap,
    /// Full snapshot of every tracked presence value, in cache order.
    pub presence: Vec<StateMap>,
}
