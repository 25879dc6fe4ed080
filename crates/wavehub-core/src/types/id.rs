//! Newtype wrappers around strings for all domain identifiers.
//!
//! Using distinct types prevents accidentally passing a `UserId` where a
//! `ChannelId` is expected. Identifiers are caller-chosen strings rather
//! than UUIDs because they appear verbatim in the Redis key and topic
//! namespace shared with other implementations.
//!
//! `EndpointId` and `ChannelId` are embedded in `:`-separated cache key
//! names (`presence_cache:<instance>:<endpoint>:<channel>`); ids that
//! themselves contain `:` make those key names ambiguous and must be
//! avoided by callers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Macro to define a newtype ID wrapper around `String`.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create an identifier from any string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Return the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the wrapper and return the inner string.
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

define_id!(
    /// Identifier of a channel member.
    UserId
);

define_id!(
    /// Name of a channel.
    ChannelId
);

define_id!(
    /// Identifier of an endpoint (one path pattern's lobby).
    EndpointId
);

define_id!(
    /// Identifier of a running server process in the cluster.
    InstanceId
);

define_id!(
    /// Correlation identifier carried by an event envelope.
    RequestId
);

impl InstanceId {
    /// Generate a fresh random instance identifier.
    pub fn generate() -> Self {
        Self(format!("inst-{}", Uuid::new_v4()))
    }
}

impl RequestId {
    /// Generate a fresh random request identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}
