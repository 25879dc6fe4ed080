//! # wavehub-cluster
//!
//! Redis-backed coordination for multi-instance deployments. Each
//! instance registers a TTL'd heartbeat key, mirrors its channels'
//! presence/assigns caches into instance-scoped Redis hashes, and relays
//! state changes and channel messages over four shared pub/sub topics.
//!
//! The [`coordinator::ClusterCoordinator`] owns the connection, the
//! heartbeat and cleanup loops, and the pub/sub reader.
//! [`client::RedisChannelClient`] adapts it to the engine's
//! `ClusterClient` seam, one handle per (endpoint, channel).

pub mod client;
pub mod connection;
pub mod coordinator;
pub mod keys;
pub mod messages;
pub mod scripts;

pub use client::{RedisChannelClient, RedisClientFactory};
pub use coordinator::ClusterCoordinator;
