//! Event envelope and message type definitions.

pub mod envelope;
pub mod types;

pub use envelope::ChannelEvent;
pub use types::{MessageAction, PresenceEventKind, PresencePayload};
