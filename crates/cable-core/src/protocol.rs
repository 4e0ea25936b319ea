//! Wire protocol: JSON frames exchanged over the socket and the bus.
//!
//! Client → server:
//! `{"command": "subscribe"|"unsubscribe"|"message", "identifier": "<json>", "data": "<json>"}`
//!
//! Server → client:
//! `{"identifier": "<key>", "message": <any>}`, the heartbeat
//! `{"identifier": "_ping", "message": <unix seconds>}` and the rejection
//! notice `{"identifier": "<key>", "type": "reject_subscription"}`.
//!
//! Server → server (control topic): `{"type": "disconnect"}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{CableError, Result};

/// Identifier carried by heartbeat frames.
pub const PING_IDENTIFIER: &str = "_ping";

/// Key inside a subscription identifier naming the channel type.
pub const CHANNEL_KEY: &str = "channel";

/// `type` of the frame sent when a subscription is rejected.
pub const REJECT_SUBSCRIPTION: &str = "reject_subscription";

// ─────────────────────────────────────────────────────────────────────────────
// Client commands
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded client command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    /// Create a channel instance under `identifier`.
    Subscribe {
        /// JSON-encoded channel identifier.
        identifier: String,
    },
    /// Tear down the channel instance under `identifier`.
    Unsubscribe {
        /// JSON-encoded channel identifier.
        identifier: String,
    },
    /// Perform an action on the channel instance under `identifier`.
    Message {
        /// JSON-encoded channel identifier.
        identifier: String,
        /// JSON-encoded action payload (must carry an `action` key).
        data: String,
    },
}

impl Command {
    /// Decode a raw text frame.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// The identifier this command targets.
    pub fn identifier(&self) -> &str {
        match self {
            Self::Subscribe { identifier }
            | Self::Unsubscribe { identifier }
            | Self::Message { identifier, .. } => identifier,
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Message { .. } => "message",
        }
    }
}

/// A subscription identifier decoded into its channel type and params.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelIdentifier {
    /// Registered channel type name, e.g. `ChatChannel`.
    pub channel: String,
    /// The whole decoded identifier object (including `channel`).
    pub params: Map<String, Value>,
}

impl ChannelIdentifier {
    /// Decode the JSON-encoded identifier string a client sent.
    pub fn decode(identifier: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(identifier)?;
        let Value::Object(params) = value else {
            return Err(CableError::InvalidCommand(format!(
                "identifier is not an object: {identifier}"
            )));
        };
        let channel = params
            .get(CHANNEL_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CableError::InvalidCommand(format!("identifier has no channel: {identifier}"))
            })?
            .to_owned();
        Ok(Self { channel, params })
    }
}

/// Decode the `data` of a `message` command into an action payload.
pub fn decode_action_data(data: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(data)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(CableError::InvalidCommand(format!(
            "action data is not an object: {data}"
        )))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server frames
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct MessageFrame<'a, T: Serialize + ?Sized> {
    identifier: &'a str,
    message: &'a T,
}

#[derive(Serialize)]
struct TypedFrame<'a> {
    identifier: &'a str,
    #[serde(rename = "type")]
    frame_type: &'a str,
}

/// `{"identifier": identifier, "message": message}`.
pub fn message_frame<T: Serialize + ?Sized>(identifier: &str, message: &T) -> Result<String> {
    Ok(serde_json::to_string(&MessageFrame {
        identifier,
        message,
    })?)
}

/// Heartbeat frame stamped with `at` in unix seconds.
pub fn ping_frame(at: DateTime<Utc>) -> String {
    format!(
        r#"{{"identifier":"{PING_IDENTIFIER}","message":{}}}"#,
        at.timestamp()
    )
}

/// Notice sent when a channel rejects a subscription.
pub fn rejection_frame(identifier: &str) -> Result<String> {
    Ok(serde_json::to_string(&TypedFrame {
        identifier,
        frame_type: REJECT_SUBSCRIPTION,
    })?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal control messages
// ─────────────────────────────────────────────────────────────────────────────

/// Message published on a connection's control topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InternalMessage {
    /// Close the receiving connection.
    Disconnect,
    /// Any `type` this version does not understand.
    #[serde(other)]
    Unknown,
}

impl InternalMessage {
    /// Decode a control payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
