//! Presence state tracking with JOIN/UPDATE/LEAVE semantics.

pub mod engine;

pub use engine::{PresenceDiff, PresenceEngine};
