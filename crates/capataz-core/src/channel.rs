//! Wire format of the out-of-band channel between supervisor and child.
//!
//! The channel is newline-delimited. Each inbound line is decoded as JSON
//! when it parses and as a plain string otherwise. Outbound values are one
//! JSON document per line.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Environment variable carrying the channel's file descriptor number.
pub const CHANNEL_FD_ENV: &str = "CAPATAZ_CHANNEL_FD";
/// Environment variable carrying the child's group.
pub const GROUP_ENV: &str = "CAPATAZ_GROUP";
/// Environment variable carrying the child's port.
pub const PORT_ENV: &str = "CAPATAZ_PORT";
/// Descriptor the channel is installed at in the child.
pub const CHANNEL_FD: i32 = 3;

/// A decoded inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The child sent its ready token.
    Ready,
    /// The child asked for a fan-out.
    Broadcast {
        /// Application event name.
        event: String,
        /// Application payload.
        data: Value,
        /// Deliver to the sender too.
        include_self: bool,
    },
    /// Anything else.
    Message(Value),
}

/// Decodes one channel line.
#[must_use]
pub fn decode_line(line: &str, ready_event: Option<&str>) -> Inbound {
    let value = serde_json::from_str::<Value>(line).unwrap_or_else(|_| Value::String(line.to_string()));

    if let (Value::String(text), Some(ready)) = (&value, ready_event) {
        if text == ready {
            return Inbound::Ready;
        }
    }

    if let Some(request) = broadcast_request(&value) {
        return request;
    }

    Inbound::Message(value)
}

/// `{"type":"broadcast","event":...}` without a `source` is a request.
/// With a `source` it is a relayed broadcast and is treated as a message.
fn broadcast_request(value: &Value) -> Option<Inbound> {
    let object = value.as_object()?;
    if object.get("type").and_then(Value::as_str) != Some("broadcast") || object.contains_key("source") {
        return None;
    }
    let event = object.get("event")?.as_str()?.to_string();
    let include_self = object
        .get("includeSelf")
        .or_else(|| object.get("include_self"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Some(Inbound::Broadcast {
        event,
        data: object.get("data").cloned().unwrap_or(Value::Null),
        include_self,
    })
}

/// Origin of a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastSource {
    /// Sending child's group.
    pub group: String,
    /// Sending child's port.
    pub port: u16,
}

/// A broadcast as delivered to receiving children.
///
/// Serialises as `{"type":"broadcast","event":..,"data":..,"source":{..}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "broadcast")]
pub struct BroadcastMessage {
    /// Application event name.
    pub event: String,
    /// Application payload.
    pub data: Value,
    /// Sender. Receivers never see their own broadcast unless asked for.
    pub source: BroadcastSource,
}

impl BroadcastMessage {
    /// Creates a broadcast from `group:port`.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value, group: impl Into<String>, port: u16) -> Self {
        Self {
            event: event.into(),
            data,
            source: BroadcastSource {
                group: group.into(),
                port,
            },
        }
    }

    /// Whether `group:port` sent this broadcast.
    #[must_use]
    pub fn is_from(&self, group: &str, port: u16) -> bool {
        self.source.group == group && self.source.port == port
    }
}

/// Encodes one outbound line (without the trailing newline).
///
/// # Errors
/// Returns an error if the value cannot be serialised.
pub fn encode_line<T: Serialize>(value: &T) -> serde_json::Result<String> {
    serde_json::to_string(value)
}
