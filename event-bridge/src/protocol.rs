//! Hub wire format spoken by the web event bridge.
//!
//! Every frame is a JSON text message. The client sends invocations, the bridge
//! answers each one with a completion carrying the same id, and pushes hub
//! messages inside persistent-connection frames. An empty object is a keep-alive.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Remote procedure that creates the subscription.
pub const CREATE_SUBSCRIPTION: &str = "CreateSubscription";

/// Remote procedure that stops the subscription.
pub const STOP_SUBSCRIPTION: &str = "StopSubscription";

/// Client-to-bridge invocation frame.
#[derive(Debug, Serialize)]
pub struct HubInvocation<'a> {
    #[serde(rename = "H")]
    pub hub: &'a str,
    #[serde(rename = "M")]
    pub method: &'a str,
    #[serde(rename = "A")]
    pub args: &'a [Value],
    #[serde(rename = "I")]
    pub id: String,
}

impl HubInvocation<'_> {
    /// Serialize the invocation to a text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A hub method call pushed by the bridge.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HubMessage {
    #[serde(rename = "H", default)]
    pub hub: String,
    #[serde(rename = "M")]
    pub method: String,
    #[serde(rename = "A", default)]
    pub args: Vec<Value>,
}

/// Error reported by the bridge for a failed invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFailure {
    pub message: String,
    pub data: Option<Value>,
    pub is_hub_exception: bool,
}

/// A decoded bridge-to-client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Empty keep-alive frame
    KeepAlive,
    /// Hub messages pushed on the persistent connection
    Push {
        messages: Vec<HubMessage>,
        /// Set on the first frame after the transport is initialized
        initialized: bool,
    },
    /// Completion of an invocation
    Completion {
        id: String,
        outcome: Result<Value, RemoteFailure>,
    },
    /// Progress report for a long-running invocation
    Progress { id: String },
}

#[derive(Debug, Default, Deserialize)]
struct RawFrame {
    #[serde(rename = "I")]
    id: Option<Value>,
    #[serde(rename = "R")]
    result: Option<Value>,
    #[serde(rename = "E")]
    error: Option<String>,
    #[serde(rename = "D")]
    error_data: Option<Value>,
    #[serde(rename = "H")]
    hub_exception: Option<bool>,
    #[serde(rename = "P")]
    progress: Option<Value>,
    #[serde(rename = "M")]
    messages: Option<Vec<Value>>,
    #[serde(rename = "S")]
    initialized: Option<u8>,
}

/// Decode a text frame received from the bridge.
pub fn decode_frame(text: &str) -> Result<ServerFrame, serde_json::Error> {
    let raw: RawFrame = serde_json::from_str(text)?;

    if let Some(id) = raw.id {
        let id = match id {
            Value::String(s) => s,
            other => other.to_string(),
        };

        if raw.progress.is_some() {
            return Ok(ServerFrame::Progress { id });
        }

        let outcome = match raw.error {
            Some(message) => Err(RemoteFailure {
                message,
                data: raw.error_data,
                is_hub_exception: raw.hub_exception.unwrap_or(false),
            }),
            None => Ok(raw.result.unwrap_or(Value::Null)),
        };
        return Ok(ServerFrame::Completion { id, outcome });
    }

    let initialized = raw.initialized == Some(1);
    match raw.messages {
        Some(messages) => Ok(ServerFrame::Push {
            messages: decode_messages(messages),
            initialized,
        }),
        None if initialized => Ok(ServerFrame::Push {
            messages: Vec::new(),
            initialized,
        }),
        None => Ok(ServerFrame::KeepAlive),
    }
}

/// Decode each batched hub message on its own so one bad entry does not
/// take the rest of the batch with it.
fn decode_messages(raw: Vec<Value>) -> Vec<HubMessage> {
    raw.into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value(value) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(index, error = %e, "Skipping malformed hub message");
                None
            }
        })
        .collect()
}
