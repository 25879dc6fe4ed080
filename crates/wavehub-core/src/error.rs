//! Unified application error types for WaveHub.
//!
//! All crates map their internal errors into [`AppError`] for consistent
//! propagation through the ? operator. Each [`ErrorKind`] carries an
//! HTTP-style numeric code used purely as a severity/classification tag;
//! no actual HTTP is involved at this layer.

use std::fmt;
use thiserror::Error;

/// Top-level error kind categorization used across the entire application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Input validation failed (bad recipient list, null data, etc.).
    Validation,
    /// The requested resource was not found (unknown user, missing presence key).
    NotFound,
    /// A conflict occurred (duplicate member, duplicate presence key).
    Conflict,
    /// An internal error occurred.
    Internal,
    /// A cache/coordination (Redis) error occurred.
    Cache,
    /// A serialization/deserialization error occurred.
    Serialization,
    /// A configuration error occurred.
    Configuration,
}

impl ErrorKind {
    /// Numeric classification code for this kind.
    pub fn code(&self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Internal
            | Self::Cache
            | Self::Serialization
            | Self::Configuration => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "VALIDATION"),
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::Conflict => write!(f, "CONFLICT"),
            Self::Internal => write!(f, "INTERNAL"),
            Self::Cache => write!(f, "CACHE"),
            Self::Serialization => write!(f, "SERIALIZATION"),
            Self::Configuration => write!(f, "CONFIGURATION"),
        }
    }
}

/// Presence mutation being attempted when a presence-scoped error arose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PresenceAction {
    /// Create a new presence entry.
    Track,
    /// Replace an existing presence entry.
    Update,
    /// Delete a presence entry.
    Remove,
    /// Update if present, track otherwise.
    Upsert,
}

impl fmt::Display for PresenceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Track => write!(f, "track"),
            Self::Update => write!(f, "update"),
            Self::Remove => write!(f, "remove"),
            Self::Upsert => write!(f, "upsert"),
        }
    }
}

/// Where in the system an error originated.
///
/// Scope widens from a generic error (no scope) to endpoint, channel, and
/// presence-mutation granularity.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorScope {
    /// Error raised while handling an endpoint.
    Endpoint {
        /// Endpoint identifier.
        endpoint: String,
    },
    /// Error raised while handling a channel.
    Channel {
        /// Channel name.
        channel: String,
    },
    /// Error raised during a presence mutation on a channel.
    Presence {
        /// Channel name.
        channel: String,
        /// The presence action that failed.
        action: PresenceAction,
    },
}

/// The unified application error used throughout WaveHub.
///
/// All crate-specific errors are mapped into `AppError` using `From` impls
/// or explicit `.map_err()` calls.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    /// The category of error.
    pub kind: ErrorKind,
    /// A human-readable error message.
    pub message: String,
    /// Optional scope metadata (endpoint / channel / presence action).
    pub scope: Option<ErrorScope>,
    /// Optional underlying cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new application error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            scope: None,
            source: None,
        }
    }

    /// Create a new application error with an underlying cause.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            scope: None,
            source: Some(Box::new(source)),
        }
    }

    /// Create an endpoint-scoped error.
    pub fn endpoint(kind: ErrorKind, endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            scope: Some(ErrorScope::Endpoint {
                endpoint: endpoint.into(),
            }),
            source: None,
        }
    }

    /// Create a channel-scoped error.
    pub fn channel(kind: ErrorKind, channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            scope: Some(ErrorScope::Channel {
                channel: channel.into(),
            }),
            source: None,
        }
    }

    /// Create a presence-scoped error.
    pub fn presence(
        kind: ErrorKind,
        channel: impl Into<String>,
        action: PresenceAction,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            scope: Some(ErrorScope::Presence {
                channel: channel.into(),
                action,
            }),
            source: None,
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Create a cache/coordination error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cache, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// The numeric classification code of this error.
    pub fn code(&self) -> u16 {
        self.kind.code()
    }
}

impl Clone for AppError {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            scope: self.scope.clone(),
            source: None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(
            ErrorKind::Serialization,
            format!("JSON serialization error: {err}"),
            err,
        )
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_source(
            ErrorKind::Configuration,
            format!("Configuration error: {err}"),
            err,
        )
    }
}
