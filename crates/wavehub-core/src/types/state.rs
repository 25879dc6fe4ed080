//! Per-user key/value state types.
//!
//! Assigns and presence are both arbitrary JSON objects scoped to one
//! channel membership. Assigns are private bookkeeping state; presence is
//! broadcast to the channel on every change.

use indexmap::IndexMap;

use super::id::UserId;

/// Arbitrary per-user key/value state (assigns or presence value).
pub type StateMap = serde_json::Map<String, serde_json::Value>;

/// An insertion-ordered cache of per-user state.
///
/// Iteration order is observable: presence snapshots are emitted in cache
/// order, so the map must preserve insertion order.
pub type StateCache = IndexMap<UserId, StateMap>;
