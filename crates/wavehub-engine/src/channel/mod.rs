//! Channel and lobby façades over the state managers.

pub mod engine;
pub mod lobby;
pub mod types;

pub use engine::ChannelEngine;
pub use lobby::{ChannelMembership, LobbyEngine};
pub use types::{ClientMessage, RecipientSpec, Sender};
