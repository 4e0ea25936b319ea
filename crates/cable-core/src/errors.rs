//! Error hierarchy for the cable gateway.
//!
//! - [`CableError`]: everything that can go wrong inside a connection, a
//!   channel or the worker pool
//! - [`BusError`]: failures reported by the pub/sub bus collaborator
//! - [`ErrorCategory`]: coarse classification used when logging

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// ErrorCategory
// ─────────────────────────────────────────────────────────────────────────────

/// How an error should be treated by the component that observes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed input from a client. Logged, connection stays open.
    Protocol,
    /// The `connect` hook refused the connection.
    Authorization,
    /// A channel refused a subscription.
    Rejection,
    /// A user callback failed.
    Callback,
    /// A lifecycle invariant was broken (double open, double close).
    Invariant,
    /// The bus or the socket failed underneath us.
    Transport,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Protocol => "protocol",
            Self::Authorization => "authorization",
            Self::Rejection => "rejection",
            Self::Callback => "callback",
            Self::Invariant => "invariant",
            Self::Transport => "transport",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BusError
// ─────────────────────────────────────────────────────────────────────────────

/// Errors reported by a pub/sub bus implementation.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus connection is gone.
    #[error("bus disconnected")]
    Disconnected,
    /// Publishing a payload failed.
    #[error("failed to publish to {topic}: {message}")]
    Publish {
        /// Target topic.
        topic: String,
        /// Failure detail.
        message: String,
    },
    /// Subscribing to a topic failed.
    #[error("failed to subscribe to {topic}: {message}")]
    Subscribe {
        /// Target topic.
        topic: String,
        /// Failure detail.
        message: String,
    },
    /// The handle passed to `unsubscribe` is not known to the bus.
    #[error("unknown subscription handle {0}")]
    UnknownHandle(u64),
}

// ─────────────────────────────────────────────────────────────────────────────
// CableError
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level error type for connections, channels and the worker pool.
#[derive(Debug, Error)]
pub enum CableError {
    /// Raised by a `connect` hook to refuse the connection.
    #[error("unauthorized connection")]
    Unauthorized,

    /// `on_open` ran twice for the same connection.
    #[error("connection already opened")]
    AlreadyOpened,

    /// `on_close` ran twice for the same connection.
    #[error("connection already closed")]
    AlreadyClosed,

    /// A client frame could not be understood.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The identifier named a channel type that is not registered.
    #[error("subscription class not found: {0}")]
    ChannelNotFound(String),

    /// Identifier names that the connection type never declared.
    #[error("invalid identifiers: {}", .0.join(", "))]
    InvalidIdentifiers(Vec<String>),

    /// Bus collaborator failure.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// The socket is no longer accepting frames.
    #[error("socket error: {0}")]
    Socket(String),

    /// A user callback returned an error.
    #[error("callback failed: {0}")]
    Callback(String),

    /// A user callback panicked.
    #[error("callback panicked: {0}")]
    Panicked(String),
}

impl CableError {
    /// Convenience constructor for callback failures.
    #[must_use]
    pub fn callback(message: impl Into<String>) -> Self {
        Self::Callback(message.into())
    }

    /// Classification of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidCommand(_) | Self::Json(_) | Self::ChannelNotFound(_) => {
                ErrorCategory::Protocol
            }
            Self::Unauthorized => ErrorCategory::Authorization,
            Self::InvalidIdentifiers(_) => ErrorCategory::Rejection,
            Self::Callback(_) | Self::Panicked(_) => ErrorCategory::Callback,
            Self::AlreadyOpened | Self::AlreadyClosed => ErrorCategory::Invariant,
            Self::Bus(_) | Self::Socket(_) => ErrorCategory::Transport,
        }
    }

    /// Whether this error is a broken lifecycle invariant.
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        self.category() == ErrorCategory::Invariant
    }
}

/// Result alias used across the cable crates.
pub type Result<T> = std::result::Result<T, CableError>;

/// Refuse the connection from inside a `connect` hook.
pub fn reject_unauthorized_connection<T>() -> Result<T> {
    Err(CableError::Unauthorized)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
