//! Connection identifiers, identity strings and broadcasting names.
//!
//! A connection declares the names it is identified by (e.g. `current_user`)
//! and its `connect` hook fills them in. The rendered values, sorted and
//! joined with `:`, form the connection's identity. That identity keys the
//! per-connection control topic ([`internal_topic`]) used for remote
//! disconnects.
//!
//! Channels derive stream topics from models the same way: a model renders
//! as `Class#id`, strings render as themselves, lists join with `:`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix of every per-connection control topic.
pub const INTERNAL_TOPIC_PREFIX: &str = "cable";

/// Prefix of every channel-derived broadcasting topic.
pub const CHANNEL_TOPIC_PREFIX: &str = "cable:channel";

// ─────────────────────────────────────────────────────────────────────────────
// GlobalId
// ─────────────────────────────────────────────────────────────────────────────

/// Stable reference to an application model (`Class#id`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlobalId {
    /// Model class name, e.g. `User`.
    pub class: String,
    /// Model primary key rendered as text.
    pub id: String,
}

impl GlobalId {
    /// Build a reference from a class name and an id.
    pub fn new(class: impl Into<String>, id: impl ToString) -> Self {
        Self {
            class: class.into(),
            id: id.to_string(),
        }
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class, self.id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// IdentifierValue / Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Value assigned to one declared identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdentifierValue {
    /// A plain token, rendered verbatim.
    Text(String),
    /// A model reference, rendered as `Class#id`.
    Model(GlobalId),
}

impl IdentifierValue {
    /// Render this value the way it appears in identity strings.
    pub fn to_param(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Model(gid) => gid.to_string(),
        }
    }
}

impl From<&str> for IdentifierValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for IdentifierValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<GlobalId> for IdentifierValue {
    fn from(gid: GlobalId) -> Self {
        Self::Model(gid)
    }
}

/// The identifier values of one connection, keyed by declared name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifiers {
    entries: BTreeMap<String, IdentifierValue>,
}

impl Identifiers {
    /// An empty set: the connection is not identified.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<IdentifierValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Assign a value to a declared name, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<IdentifierValue>) {
        let _ = self.entries.insert(name.into(), value.into());
    }

    /// Value for a name.
    pub fn get(&self, name: &str) -> Option<&IdentifierValue> {
        self.entries.get(name)
    }

    /// Declared names that carry a value.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterate name/value pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &IdentifierValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether no identifier has been assigned.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of assigned identifiers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The identity string: rendered values, sorted, joined with `:`.
    ///
    /// Empty for an unidentified connection.
    pub fn identity(&self) -> String {
        let mut parts: Vec<String> = self.entries.values().map(IdentifierValue::to_param).collect();
        parts.sort();
        parts.join(":")
    }
}

impl<K, V> FromIterator<(K, V)> for Identifiers
where
    K: Into<String>,
    V: Into<IdentifierValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ids = Self::new();
        for (k, v) in iter {
            ids.insert(k, v);
        }
        ids
    }
}

/// Control topic a connection with the given identity listens on.
pub fn internal_topic(identity: &str) -> String {
    format!("{INTERNAL_TOPIC_PREFIX}/{identity}")
}

// ─────────────────────────────────────────────────────────────────────────────
// Broadcasting names
// ─────────────────────────────────────────────────────────────────────────────

/// Anything a channel can stream for or broadcast to.
pub trait ToBroadcasting {
    /// Render the stable key used inside topic names.
    fn to_broadcasting(&self) -> String;
}

impl ToBroadcasting for str {
    fn to_broadcasting(&self) -> String {
        self.to_owned()
    }
}

impl ToBroadcasting for String {
    fn to_broadcasting(&self) -> String {
        self.clone()
    }
}

impl ToBroadcasting for GlobalId {
    fn to_broadcasting(&self) -> String {
        self.to_string()
    }
}

impl ToBroadcasting for IdentifierValue {
    fn to_broadcasting(&self) -> String {
        self.to_param()
    }
}

impl<T: ToBroadcasting> ToBroadcasting for [T] {
    fn to_broadcasting(&self) -> String {
        self.iter()
            .map(ToBroadcasting::to_broadcasting)
            .collect::<Vec<_>>()
            .join(":")
    }
}

impl<T: ToBroadcasting> ToBroadcasting for Vec<T> {
    fn to_broadcasting(&self) -> String {
        self.as_slice().to_broadcasting()
    }
}

impl<T: ToBroadcasting + ?Sized> ToBroadcasting for &T {
    fn to_broadcasting(&self) -> String {
        (**self).to_broadcasting()
    }
}

/// Render a model (or list of models, or plain string) as a broadcasting key.
pub fn broadcasting_for<M: ToBroadcasting + ?Sized>(model: &M) -> String {
    model.to_broadcasting()
}

/// Short channel name derived from a channel type name.
///
/// `ChatChannel` → `chat`, `Admin::RoomEventsChannel` → `admin:room_events`.
pub fn channel_name(type_name: &str) -> String {
    let trimmed = type_name.strip_suffix("Channel").unwrap_or(type_name);
    trimmed
        .split("::")
        .filter(|s| !s.is_empty())
        .map(underscore)
        .collect::<Vec<_>>()
        .join(":")
}

/// Topic a channel type streams for / broadcasts to for a given model.
///
/// `("ChatChannel", Room#1)` → `cable:channel:chat:Room#1`.
pub fn channel_broadcasting<M: ToBroadcasting + ?Sized>(type_name: &str, model: &M) -> String {
    format!(
        "{CHANNEL_TOPIC_PREFIX}:{}:{}",
        channel_name(type_name),
        model.to_broadcasting()
    )
}

/// `CamelCase` → `snake_case`, keeping acronyms together (`HTTPPing` → `http_ping`).
fn underscore(segment: &str) -> String {
    let chars: Vec<char> = segment.chars().collect();
    let mut out = String::with_capacity(segment.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev = i.checked_sub(1).map(|j| chars[j]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_ascii_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_ascii_uppercase() => next.is_some_and(|n| n.is_ascii_lowercase()),
                _ => false,
            };
            if boundary {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
