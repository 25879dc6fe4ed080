//! In-process publish/subscribe primitives.

pub mod publisher;

pub use publisher::{ChannelPublisher, EventCallback, SubscriptionToken};
