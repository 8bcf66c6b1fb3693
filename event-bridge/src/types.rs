//! Core types for the event-bridge crate.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Describes which business events the bridge should deliver.
///
/// The `id` is assigned by the server and is not needed to create a
/// subscription; it is omitted from the wire payload when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDescriptor {
    /// Server assigned subscription id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Free text description shown in bridge diagnostics
    pub description: String,
    /// Server side boolean filter over event attributes
    pub filter: String,
    /// Whether the bridge retains the subscription across disconnects
    pub is_durable: bool,
}

impl SubscriptionDescriptor {
    /// Create a non-durable subscription descriptor.
    pub fn new(description: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            id: None,
            description: description.into(),
            filter: filter.into(),
            is_durable: false,
        }
    }

    /// Set the durability flag.
    pub fn with_durable(mut self, is_durable: bool) -> Self {
        self.is_durable = is_durable;
        self
    }

    /// Set a known subscription id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Credentials the bridge uses to authorize and scope a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionIdentity {
    /// Session token obtained from the authentication service
    #[serde(rename = "SessionToken")]
    pub session_token: String,
    /// Application id registered with OpenAccess
    #[serde(rename = "ApplicationId")]
    pub application_id: String,
}

impl ConnectionIdentity {
    /// Create a new connection identity.
    pub fn new(session_token: impl Into<String>, application_id: impl Into<String>) -> Self {
        Self {
            session_token: session_token.into(),
            application_id: application_id.into(),
        }
    }
}

/// A business event pushed by the bridge.
///
/// Attribute names are unique and keep the order in which the bridge sent them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusinessEvent(Map<String, Value>);

impl BusinessEvent {
    /// Wrap a decoded attribute map.
    pub fn new(attributes: Map<String, Value>) -> Self {
        Self(attributes)
    }

    /// Look up a single attribute.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Iterate attributes in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the event carries no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the event and return the attribute map.
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl TryFrom<Value> for BusinessEvent {
    type Error = Value;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

impl From<Map<String, Value>> for BusinessEvent {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Local transport state of a bridge connection.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Default)]
pub enum ConnectionState {
    /// No transport is open
    #[default]
    Disconnected,
    /// The transport is being opened
    Connecting,
    /// The transport is open and invocations may be issued
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}
