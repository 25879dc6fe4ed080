//! # wavehub-engine
//!
//! The channel state engine: per-channel user/assigns/presence
//! bookkeeping, message fan-out with recipient-set resolution, and the
//! pluggable local/distributed state-manager abstraction.
//!
//! The engine is transport-agnostic. The connection layer hands a join to
//! [`channel::LobbyEngine::join`] with a per-user delivery callback; every
//! envelope the user should see is pushed through that callback. In
//! distributed mode the managers delegate persistence and cross-instance
//! fan-out to a [`manager::ClusterClient`], implemented by the
//! `wavehub-cluster` crate.

pub mod channel;
pub mod manager;
pub mod message;
pub mod middleware;
pub mod presence;
pub mod pubsub;

pub use channel::engine::ChannelEngine;
pub use channel::lobby::LobbyEngine;
pub use manager::factory::ManagerFactory;
pub use message::envelope::ChannelEvent;
