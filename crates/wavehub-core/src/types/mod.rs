//! Shared domain types.

pub mod id;
pub mod state;

pub use id::{ChannelId, EndpointId, InstanceId, RequestId, UserId};
pub use state::{StateCache, StateMap};
