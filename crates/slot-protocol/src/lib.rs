//! Relay protocol: the JSON message envelope exchanged between a slot and
//! the relay, plus typed payloads for every message the slot sends or
//! expects back.
//!
//! Every frame on the wire is one [`Message`]:
//!
//! ```json
//! {
//!   "id": "6f1c…",
//!   "type": "SLOT_REGISTER",
//!   "relay_id": "",
//!   "agent_id": "slot-1",
//!   "payload": { … },
//!   "timestamp": "2024-05-01T12:00:00.000Z"
//! }
//! ```
//!
//! Responses correlate to requests in one of two ways:
//! - `ACK` echoes the request id in `payload.original_message_id`;
//! - `COMMAND` (answer to `GET_COMMANDS`) reuses the request id as its own `id`.

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Protocol version advertised in `SLOT_REGISTER`.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// A JSON object payload.
pub type Payload = Map<String, Value>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{msg_type} payload must be a JSON object")]
    PayloadNotObject { msg_type: MessageType },

    #[error("invalid {msg_type} payload: {reason}")]
    InvalidPayload { msg_type: MessageType, reason: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The `type` discriminator of a [`Message`].
///
/// Unknown discriminators decode into [`MessageType::Other`] so that a
/// single unexpected message never fails the whole frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    /// Slot → Relay: register on the shared endpoint.
    SlotRegister,
    /// Slot → Relay: liveness on the dedicated endpoint.
    SlotHeartbeat,
    /// Slot → Relay: register an agent behind this slot.
    AgentRegister,
    /// Slot → Relay: pull pending commands for an agent.
    GetCommands,
    /// Slot → Relay: command execution result.
    Result,
    /// Slot → Relay: command progress.
    CommandStatusUpdate,
    /// Relay → Slot: acknowledgment.
    Ack,
    /// Relay → Slot: command (pulled or unsolicited).
    Command,
    /// Anything else.
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SlotRegister => "SLOT_REGISTER",
            Self::SlotHeartbeat => "SLOT_HEARTBEAT",
            Self::AgentRegister => "AGENT_REGISTER",
            Self::GetCommands => "GET_COMMANDS",
            Self::Result => "RESULT",
            Self::CommandStatusUpdate => "COMMAND_STATUS_UPDATE",
            Self::Ack => "ACK",
            Self::Command => "COMMAND",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for MessageType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "SLOT_REGISTER" => Self::SlotRegister,
            "SLOT_HEARTBEAT" => Self::SlotHeartbeat,
            "AGENT_REGISTER" => Self::AgentRegister,
            "GET_COMMANDS" => Self::GetCommands,
            "RESULT" => Self::Result,
            "COMMAND_STATUS_UPDATE" => Self::CommandStatusUpdate,
            "ACK" => Self::Ack,
            "COMMAND" => Self::Command,
            _ => Self::Other(raw),
        }
    }
}

impl From<MessageType> for String {
    fn from(t: MessageType) -> Self {
        match t {
            MessageType::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wire envelope shared by every message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Sender-generated id (UUID v4); doubles as the correlation id.
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default)]
    pub relay_id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub payload: Payload,
    /// UTC, millisecond precision, `Z` suffix.
    #[serde(default)]
    pub timestamp: String,
}

impl Message {
    /// Build an outbound message with a fresh id and the current timestamp.
    pub fn new<P: Serialize>(
        msg_type: MessageType,
        agent_id: impl Into<String>,
        payload: &P,
    ) -> Result<Self, ProtocolError> {
        Self::with_id(new_message_id(), msg_type, agent_id, payload)
    }

    /// Build an outbound message with an explicit id.
    pub fn with_id<P: Serialize>(
        id: impl Into<String>,
        msg_type: MessageType,
        agent_id: impl Into<String>,
        payload: &P,
    ) -> Result<Self, ProtocolError> {
        let payload = match serde_json::to_value(payload)? {
            Value::Object(map) => map,
            _ => return Err(ProtocolError::PayloadNotObject { msg_type }),
        };
        Ok(Self {
            id: id.into(),
            msg_type,
            relay_id: String::new(),
            agent_id: agent_id.into(),
            payload,
            timestamp: timestamp_now(),
        })
    }

    /// Decode the payload into a typed struct.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(Value::Object(self.payload.clone())).map_err(|e| {
            ProtocolError::InvalidPayload {
                msg_type: self.msg_type.clone(),
                reason: e.to_string(),
            }
        })
    }

    /// Truthy lookup of a payload flag (`true`, non-zero number, non-empty string).
    pub fn payload_flag(&self, key: &str) -> bool {
        self.payload.get(key).is_some_and(truthy)
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Null => false,
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Payload, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Payload>::deserialize(deserializer)?.unwrap_or_default())
}

/// Encode a message as a JSON text frame.
pub fn encode(message: &Message) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a JSON text frame.
pub fn decode(text: &str) -> Result<Message, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Fresh UUID v4 message id.
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current UTC time as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `SLOT_REGISTER` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRegisterPayload {
    pub agent_id: String,
    #[serde(default)]
    pub relay_id: String,
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub version: String,
}

/// `SLOT_HEARTBEAT` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotHeartbeatPayload {
    pub agent_id: String,
    pub hostname: String,
    pub uptime_seconds: u64,
    pub cpu_percent: f64,
    pub memory_mb: u64,
    pub disk_free_gb: u64,
}

/// `AGENT_REGISTER` payload. Optional identity fields are omitted when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRegisterPayload {
    pub slot_id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// `GET_COMMANDS` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetCommandsPayload {
    pub agent_id: i64,
    pub count: u32,
}

/// Outcome of executing a command, as reported in `RESULT`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CommandResult {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: i32,
    /// Seconds.
    #[serde(default)]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<bool>,
}

impl CommandResult {
    /// A failed execution: exit code 1, error text in `stderr` and `error`.
    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            stdout: String::new(),
            stderr: error.clone(),
            exit_code: 1,
            duration: 0.0,
            error: Some(error),
            finished: None,
        }
    }
}

/// `RESULT` payload: the result fields plus the command they belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    pub command_id: String,
    #[serde(flatten)]
    pub result: CommandResult,
}

/// `COMMAND_STATUS_UPDATE` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdatePayload {
    pub command_id: String,
    pub agent_id: String,
    pub status: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `ACK` payload. Every field is optional on the wire, and a field of the
/// wrong type reads as absent instead of failing the whole payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AckPayload {
    #[serde(default, deserialize_with = "lenient_flag")]
    pub success: bool,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub original_message_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub assigned_port: Option<i64>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub agent_id: Option<i64>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<String>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(truthy(&Value::deserialize(deserializer)?))
}
